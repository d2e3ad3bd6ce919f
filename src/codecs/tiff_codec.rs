// src/codecs/tiff_codec.rs
//
// Full pixel decode of a TIFF page into a raster surface, via the `tiff` crate.
// This is the slow path: used for every compression the OJPEG fast path does
// not cover, and for OJPEG pages whose stream could not be rebuilt.

use super::raster::RasterSurface;
use crate::engine::{run_with_panic_policy, Capabilities, MAX_PIXELS};
use crate::error::{PipelineError, Result};
use std::io::Cursor;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;
use tiff::ColorType;

/// Loaded TIFF codec handle. Workers load it on first TIFF job and keep it.
#[derive(Debug, Clone)]
pub struct TiffCodec {
    max_buffer: usize,
}

impl TiffCodec {
    /// Load the codec in an execution context with the given capabilities.
    pub fn load(capabilities: Capabilities) -> Result<Self> {
        if !capabilities.contains(Capabilities::TIFF_CODEC) {
            return Err(PipelineError::capability_unavailable("tiff codec"));
        }
        // 16-bit RGBA at the pixel limit is the largest buffer a page may need.
        let max_buffer = (MAX_PIXELS as usize).saturating_mul(8);
        tracing::debug!(max_buffer, "tiff codec loaded");
        Ok(Self { max_buffer })
    }

    fn limits(&self) -> Limits {
        let mut limits = Limits::default();
        limits.decoding_buffer_size = self.max_buffer;
        limits.intermediate_buffer_size = self.max_buffer;
        limits
    }

    /// Decode page `page` of `data` and paint it onto `surface` as RGBA8.
    pub fn decode_into(&self, data: &[u8], page: usize, surface: &mut RasterSurface) -> Result<()> {
        run_with_panic_policy("decode:tiff", || {
            let mut decoder = Decoder::new(Cursor::new(data))
                .map_err(tiff_error)?
                .with_limits(self.limits());
            decoder.seek_to_image(page).map_err(tiff_error)?;

            let (width, height) = decoder.dimensions().map_err(tiff_error)?;
            let color = decoder.colortype().map_err(tiff_error)?;
            // Photometric 0 means a zero sample is white.
            let white_is_zero = decoder
                .get_tag_u32(Tag::PhotometricInterpretation)
                .map(|p| p == 0)
                .unwrap_or(false);

            // Size (and limit-check) the surface before the decoder allocates.
            surface.resize(width, height)?;
            let image = decoder.read_image().map_err(tiff_error)?;
            to_rgba8(image, color, width, white_is_zero, surface.pixels_mut())
        })
    }
}

fn tiff_error(err: tiff::TiffError) -> PipelineError {
    PipelineError::decode_failed(format!("tiff: {err}"))
}

fn to_rgba8(
    image: DecodingResult,
    color: ColorType,
    width: u32,
    white_is_zero: bool,
    out: &mut [u8],
) -> Result<()> {
    let pixels = out.len() / 4;
    let samples: Vec<u8> = match image {
        DecodingResult::U8(v) => v,
        DecodingResult::U16(v) => v.into_iter().map(|s| (s >> 8) as u8).collect(),
        _ => {
            return Err(PipelineError::decode_failed(format!(
                "unsupported sample format for {color:?}"
            )))
        }
    };

    let channels = match color {
        ColorType::Gray(1) => return unpack_bilevel(&samples, width, white_is_zero, out),
        ColorType::Gray(8 | 16) => 1,
        ColorType::GrayA(8 | 16) => 2,
        ColorType::RGB(8 | 16) => 3,
        ColorType::RGBA(8 | 16) => 4,
        ColorType::CMYK(8 | 16) => 4,
        other => {
            return Err(PipelineError::decode_failed(format!(
                "unsupported color type {other:?}"
            )))
        }
    };
    if samples.len() < pixels * channels {
        return Err(PipelineError::decode_failed(format!(
            "decoded {} samples, expected {}",
            samples.len(),
            pixels * channels
        )));
    }

    let gray = |v: u8| if white_is_zero { 255 - v } else { v };
    for (src, dst) in samples.chunks_exact(channels).zip(out.chunks_exact_mut(4)) {
        let rgba = match (color, src) {
            (ColorType::Gray(_), [g]) => [gray(*g), gray(*g), gray(*g), 255],
            (ColorType::GrayA(_), [g, a]) => [gray(*g), gray(*g), gray(*g), *a],
            (ColorType::RGB(_), [r, g, b]) => [*r, *g, *b, 255],
            (ColorType::CMYK(_), [c, m, y, k]) => {
                let ink = |v: u8| ((255 - v as u32) * (255 - *k as u32) / 255) as u8;
                [ink(*c), ink(*m), ink(*y), 255]
            }
            (_, [r, g, b, a]) => [*r, *g, *b, *a],
            _ => [0, 0, 0, 255],
        };
        dst.copy_from_slice(&rgba);
    }
    Ok(())
}

/// 1-bit rows are packed MSB first and padded to a whole byte.
fn unpack_bilevel(packed: &[u8], width: u32, white_is_zero: bool, out: &mut [u8]) -> Result<()> {
    let width = width as usize;
    let row_bytes = width.div_ceil(8);
    let rows = if width == 0 { 0 } else { out.len() / 4 / width };
    if packed.len() < row_bytes * rows {
        return Err(PipelineError::decode_failed("bilevel strip data is short"));
    }
    for (y, row) in packed.chunks(row_bytes).take(rows).enumerate() {
        for x in 0..width {
            let bit = (row[x / 8] >> (7 - (x % 8))) & 1;
            let white = (bit == 1) != white_is_zero;
            let v = if white { 255 } else { 0 };
            let at = (y * width + x) * 4;
            out[at..at + 4].copy_from_slice(&[v, v, v, 255]);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{PageSpec, TiffBuilder};

    fn codec() -> TiffCodec {
        TiffCodec::load(Capabilities::all()).unwrap()
    }

    #[test]
    fn load_requires_capability() {
        let err = TiffCodec::load(Capabilities::RASTER_SURFACE).unwrap_err();
        assert!(matches!(err, PipelineError::CapabilityUnavailable { .. }));
    }

    #[test]
    fn decodes_uncompressed_rgb_page() {
        let data = TiffBuilder::new()
            .page(PageSpec::rgb(3, 2, |x, y| [x as u8 * 10, y as u8 * 20, 5]))
            .build();
        let mut surface = RasterSurface::new();
        codec().decode_into(&data, 0, &mut surface).unwrap();
        assert_eq!((surface.width(), surface.height()), (3, 2));
        assert_eq!(&surface.pixels()[..4], &[0, 0, 5, 255]);
        assert_eq!(&surface.pixels()[20..24], &[20, 20, 5, 255]);
    }

    #[test]
    fn decodes_lzw_page_by_index() {
        let data = TiffBuilder::new()
            .page(PageSpec::rgb(1, 1, |_, _| [1, 1, 1]))
            .page(PageSpec::lzw(8, 4, |x, _| [x as u8, 200, 100]))
            .build();
        let mut surface = RasterSurface::new();
        codec().decode_into(&data, 1, &mut surface).unwrap();
        assert_eq!((surface.width(), surface.height()), (8, 4));
        assert_eq!(&surface.pixels()[28..32], &[7, 200, 100, 255]);
    }

    #[test]
    fn jpeg2000_page_is_a_decode_error() {
        let data = TiffBuilder::new()
            .page(PageSpec::jpeg2000(4, 4, vec![0; 32]))
            .build();
        let mut surface = RasterSurface::new();
        assert!(codec().decode_into(&data, 0, &mut surface).is_err());
    }

    #[test]
    fn bilevel_rows_are_unpacked() {
        let mut out = vec![0u8; 10 * 2 * 4];
        // Row 0: first pixel set; row 1: last pixel set.
        let packed = [0b1000_0000, 0, 0, 0b0100_0000];
        unpack_bilevel(&packed, 10, false, &mut out).unwrap();
        assert_eq!(&out[..4], &[255, 255, 255, 255]);
        assert_eq!(&out[4..8], &[0, 0, 0, 255]);
        assert_eq!(&out[19 * 4..20 * 4], &[255, 255, 255, 255]);
    }

    #[test]
    fn cmyk_converts_to_rgb() {
        let mut out = [0u8; 4];
        to_rgba8(
            DecodingResult::U8(vec![0, 255, 255, 0]),
            ColorType::CMYK(8),
            1,
            false,
            &mut out,
        )
        .unwrap();
        assert_eq!(out, [255, 0, 0, 255]);
    }
}
