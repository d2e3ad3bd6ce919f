// src/codecs/raster.rs
//
// Per-worker RGBA raster surface and the encoders that turn it into a page blob.
// The surface is reused across pages: resizing keeps the allocation and only
// grows it when a larger page comes along.

use crate::engine::{check_dimensions, run_with_panic_policy};
use crate::error::{PipelineError, Result};
use crate::model::{Blob, Mime};
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use mozjpeg::{ColorSpace, Compress};

/// How a painted surface is turned into bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RasterEncoding {
    /// Lossless, preferred. `optimization` is an oxipng preset level.
    Png { optimization: Option<u8> },
    /// Used only when PNG encoding is unavailable. Alpha is dropped.
    Jpeg { quality: u8 },
}

/// Reusable RGBA8 pixel arena.
#[derive(Debug, Default)]
pub struct RasterSurface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl RasterSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Size the surface for a page, clearing previous content.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        check_dimensions(width, height)?;
        let len = width as usize * height as usize * 4;
        self.pixels.clear();
        self.pixels.resize(len, 0);
        self.width = width;
        self.height = height;
        Ok(())
    }

    /// Copy a full RGBA8 frame onto the surface.
    pub fn paint(&mut self, width: u32, height: u32, rgba: &[u8]) -> Result<()> {
        self.resize(width, height)?;
        if rgba.len() != self.pixels.len() {
            return Err(PipelineError::decode_failed(format!(
                "frame has {} bytes, expected {} for {width}x{height} RGBA",
                rgba.len(),
                self.pixels.len()
            )));
        }
        self.pixels.copy_from_slice(rgba);
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    /// Allocated bytes, which may exceed the current page.
    pub fn capacity(&self) -> usize {
        self.pixels.capacity()
    }

    pub fn encode(&self, encoding: RasterEncoding) -> Result<Blob> {
        if self.width == 0 || self.height == 0 {
            return Err(PipelineError::encode_failed(
                "raster",
                "surface has not been painted",
            ));
        }
        match encoding {
            RasterEncoding::Png { optimization } => {
                encode_png(&self.pixels, self.width, self.height, optimization)
                    .map(|bytes| Blob::new(Mime::Png, bytes))
            }
            RasterEncoding::Jpeg { quality } => {
                encode_jpeg(&self.pixels, self.width, self.height, quality)
                    .map(|bytes| Blob::new(Mime::Jpeg, bytes))
            }
        }
    }
}

/// Encode RGBA8 pixels as PNG, optionally re-compressed with oxipng.
pub fn encode_png(rgba: &[u8], width: u32, height: u32, optimization: Option<u8>) -> Result<Vec<u8>> {
    run_with_panic_policy("encode:png", || {
        let mut buf = Vec::new();
        PngEncoder::new(&mut buf)
            .write_image(rgba, width, height, ExtendedColorType::Rgba8)
            .map_err(|e| PipelineError::encode_failed("png", format!("PNG encode failed: {e}")))?;

        let Some(level) = optimization else {
            return Ok(buf);
        };
        let options = oxipng::Options::from_preset(level.min(6));
        oxipng::optimize_from_memory(&buf, &options).map_err(|e| {
            PipelineError::encode_failed("png", format!("oxipng optimization failed: {e}"))
        })
    })
}

/// Encode RGBA8 pixels as baseline JPEG with mozjpeg. Alpha is discarded.
pub fn encode_jpeg(rgba: &[u8], width: u32, height: u32, quality: u8) -> Result<Vec<u8>> {
    run_with_panic_policy("encode:jpeg", || {
        let expected_len = width as usize * height as usize * 4;
        if width == 0 || height == 0 || rgba.len() != expected_len {
            return Err(PipelineError::encode_failed(
                "jpeg",
                format!("{} bytes is not a {width}x{height} RGBA frame", rgba.len()),
            ));
        }

        let rgb: Vec<u8> = rgba
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect();

        let mut comp = Compress::new(ColorSpace::JCS_RGB);
        comp.set_size(width as usize, height as usize);
        comp.set_color_space(ColorSpace::JCS_YCbCr);
        comp.set_quality(quality.min(100) as f32);
        comp.set_optimize_coding(true);

        let mut output = Vec::with_capacity((width as usize * height as usize / 4).max(4096));
        let mut writer = comp.start_compress(&mut output).map_err(|e| {
            PipelineError::encode_failed("jpeg", format!("mozjpeg: failed to start compress: {e:?}"))
        })?;
        for row in rgb.chunks(width as usize * 3) {
            writer.write_scanlines(row).map_err(|e| {
                PipelineError::encode_failed(
                    "jpeg",
                    format!("mozjpeg: failed to write scanlines: {e:?}"),
                )
            })?;
        }
        writer.finish().map_err(|e| {
            PipelineError::encode_failed("jpeg", format!("mozjpeg: failed to finish: {e:?}"))
        })?;
        Ok(output)
    })
}
