// src/engine/page.rs
//
// Per-page decode shared by the worker engine and the main-thread fallback.
// Owns the lazily loaded TIFF codec handle and the reusable raster surface of
// one execution context; never shared across threads.

use super::config::{Capabilities, PipelineConfig};
use crate::codecs::ifd::{COMPRESSION_JPEG2000, COMPRESSION_OJPEG};
use crate::codecs::{ojpeg, RasterEncoding, RasterSurface, TiffCodec, TiffDirectory};
use crate::error::{PipelineError, Result};
use crate::model::{Blob, FallbackReason, Mime};
use once_cell::unsync::OnceCell;

/// Where a decoder runs. Workers defer known-unsupported compressions to the
/// main thread; the main thread is the last resort and tries everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeContext {
    Worker,
    MainThread,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeSettings {
    pub context: DecodeContext,
    pub capabilities: Capabilities,
    pub jpeg_quality: u8,
    pub png_optimization: Option<u8>,
}

impl DecodeSettings {
    pub fn for_workers(config: &PipelineConfig) -> Self {
        Self {
            context: DecodeContext::Worker,
            capabilities: config.worker_capabilities,
            jpeg_quality: config.jpeg_quality,
            png_optimization: config.png_optimization,
        }
    }

    pub fn for_main_thread(config: &PipelineConfig) -> Self {
        Self {
            context: DecodeContext::MainThread,
            capabilities: Capabilities::all(),
            jpeg_quality: config.jpeg_quality,
            png_optimization: config.png_optimization,
        }
    }
}

/// Result of decoding one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageDecode {
    Blob(Blob),
    /// This context cannot produce the page; hand it to the main thread.
    Fallback(FallbackReason),
}

pub struct PageDecoder {
    settings: DecodeSettings,
    // Load failure is cached too: a context without the codec stays without it.
    codec: OnceCell<std::result::Result<TiffCodec, String>>,
    surface: Option<RasterSurface>,
}

impl PageDecoder {
    pub fn new(settings: DecodeSettings) -> Self {
        let surface = settings
            .capabilities
            .contains(Capabilities::RASTER_SURFACE)
            .then(RasterSurface::new);
        Self {
            settings,
            codec: OnceCell::new(),
            surface,
        }
    }

    pub fn settings(&self) -> &DecodeSettings {
        &self.settings
    }

    /// Load the TIFF codec on first use and keep the outcome.
    pub fn ensure_codec(&self) -> Result<&TiffCodec> {
        load_codec(&self.codec, self.settings.capabilities)
    }

    pub fn codec_loaded(&self) -> bool {
        matches!(self.codec.get(), Some(Ok(_)))
    }

    pub fn surface(&self) -> Option<&RasterSurface> {
        self.surface.as_ref()
    }

    /// PNG when available, else JPEG, else nothing.
    pub fn encoding(&self) -> Option<RasterEncoding> {
        let caps = self.settings.capabilities;
        if caps.contains(Capabilities::PNG_ENCODER) {
            Some(RasterEncoding::Png {
                optimization: self.settings.png_optimization,
            })
        } else if caps.contains(Capabilities::JPEG_ENCODER) {
            Some(RasterEncoding::Jpeg {
                quality: self.settings.jpeg_quality,
            })
        } else {
            None
        }
    }

    /// Single-frame rasters pass through unchanged with the declared MIME.
    pub fn decode_single_frame(&self, mime: Mime, bytes: &[u8]) -> Result<Blob> {
        if bytes.is_empty() {
            return Err(PipelineError::empty_source());
        }
        Ok(Blob::new(mime, bytes.to_vec()))
    }

    /// Decode one TIFF page: OJPEG fast path, JPEG 2000 deferral, else RGBA decode.
    pub fn decode_tiff_page(
        &mut self,
        data: &[u8],
        directory: &TiffDirectory,
        page: usize,
    ) -> Result<PageDecode> {
        let ifd = directory.read_ifd(data, page)?;

        match ifd.compression() {
            COMPRESSION_JPEG2000 if self.settings.context == DecodeContext::Worker => {
                return Ok(PageDecode::Fallback(FallbackReason::UnsupportedCompression(
                    COMPRESSION_JPEG2000,
                )));
            }
            COMPRESSION_OJPEG => match ojpeg::reconstruct(data, &ifd) {
                Ok(jpeg) => return Ok(PageDecode::Blob(Blob::new(Mime::Jpeg, jpeg))),
                Err(e) => {
                    tracing::debug!(page, error = %e, "ojpeg reconstruction failed, decoding pixels");
                }
            },
            _ => {}
        }

        let Some(encoding) = self.encoding() else {
            return Ok(PageDecode::Fallback(FallbackReason::EncoderUnavailable));
        };
        let Some(surface) = self.surface.as_mut() else {
            return Ok(PageDecode::Fallback(FallbackReason::RasterSurfaceUnavailable));
        };
        let codec = match load_codec(&self.codec, self.settings.capabilities) {
            Ok(codec) => codec,
            Err(e) => {
                return Ok(PageDecode::Fallback(FallbackReason::CodecUnavailable(
                    e.to_string(),
                )))
            }
        };

        codec.decode_into(data, page, surface)?;
        surface.encode(encoding).map(PageDecode::Blob)
    }
}

fn load_codec(
    cell: &OnceCell<std::result::Result<TiffCodec, String>>,
    capabilities: Capabilities,
) -> Result<&TiffCodec> {
    cell.get_or_init(|| TiffCodec::load(capabilities).map_err(|e| e.to_string()))
        .as_ref()
        .map_err(|message| PipelineError::capability_unavailable(message.clone()))
}
