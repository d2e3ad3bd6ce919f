// src/testing.rs
//
// Test fixtures: a small classic-TIFF writer and JPEG/PNG sample generators.
// Compiled into unit tests and shared with the integration tests via
// tests/common/mod.rs. Only std, image and weezl are used so the file can be
// included from outside the crate.

#![allow(dead_code)]

use image::ImageEncoder;

const TYPE_SHORT: u16 = 3;
const TYPE_LONG: u16 = 4;

/// One page of a fixture TIFF.
#[derive(Clone, Debug)]
pub struct PageSpec {
    width: u32,
    height: u32,
    compression: u16,
    photometric: u16,
    strips: Vec<Vec<u8>>,
    jpeg_tables: Option<Vec<u8>>,
    reversed_layout: bool,
}

impl PageSpec {
    /// Uncompressed 8-bit RGB page, one strip.
    pub fn rgb(width: u32, height: u32, pixel: impl Fn(u32, u32) -> [u8; 3]) -> Self {
        Self {
            width,
            height,
            compression: 1,
            photometric: 2,
            strips: vec![rgb_samples(width, height, pixel)],
            jpeg_tables: None,
            reversed_layout: false,
        }
    }

    /// LZW-compressed (compression 5) 8-bit RGB page, one strip.
    pub fn lzw(width: u32, height: u32, pixel: impl Fn(u32, u32) -> [u8; 3]) -> Self {
        let raw = rgb_samples(width, height, pixel);
        let packed = weezl::encode::Encoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8)
            .encode(&raw)
            .expect("LZW encode");
        Self {
            compression: 5,
            strips: vec![packed],
            ..Self::rgb(width, height, |_, _| [0, 0, 0])
        }
    }

    /// Old-style JPEG page with an explicit tables region and strips.
    pub fn ojpeg(width: u32, height: u32, tables: Vec<u8>, strips: Vec<Vec<u8>>) -> Self {
        Self {
            width,
            height,
            compression: 6,
            photometric: 2,
            strips,
            jpeg_tables: Some(tables),
            reversed_layout: false,
        }
    }

    /// Old-style JPEG page holding a real JPEG split into tables and `strip_count` strips.
    pub fn ojpeg_from_jpeg(width: u32, height: u32, jpeg: &[u8], strip_count: usize) -> Self {
        let (tables, strips) = split_jpeg(jpeg, strip_count);
        Self::ojpeg(width, height, tables, strips)
    }

    /// JPEG 2000 page (compression 34712) with an opaque payload.
    pub fn jpeg2000(width: u32, height: u32, payload: Vec<u8>) -> Self {
        Self {
            width,
            height,
            compression: 34712,
            photometric: 2,
            strips: vec![payload],
            jpeg_tables: None,
            reversed_layout: false,
        }
    }

    pub fn with_compression(mut self, compression: u16) -> Self {
        self.compression = compression;
        self
    }

    /// Drop the JPEG tables tags while keeping compression 6.
    pub fn without_jpeg_tables(mut self) -> Self {
        self.jpeg_tables = None;
        self
    }

    /// Write strips to the file in reverse order; the offset array keeps the listed order.
    pub fn with_reversed_strip_layout(mut self) -> Self {
        self.reversed_layout = true;
        self
    }

    fn rows_per_strip(&self) -> u32 {
        let strips = self.strips.len().max(1) as u32;
        self.height.div_ceil(strips).max(1)
    }
}

/// Writes classic TIFF files page by page: data first, then each IFD.
#[derive(Clone, Debug, Default)]
pub struct TiffBuilder {
    big_endian: bool,
    pages: Vec<PageSpec>,
}

impl TiffBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn big_endian() -> Self {
        Self {
            big_endian: true,
            pages: Vec::new(),
        }
    }

    pub fn page(mut self, page: PageSpec) -> Self {
        self.pages.push(page);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Writer {
            buf: Vec::new(),
            big_endian: self.big_endian,
        };
        out.buf
            .extend_from_slice(if self.big_endian { b"MM" } else { b"II" });
        out.u16(42);
        let mut next_pointer_at = out.buf.len();
        out.u32(0);

        for page in &self.pages {
            let mut strip_offsets = vec![0u32; page.strips.len()];
            let order: Vec<usize> = if page.reversed_layout {
                (0..page.strips.len()).rev().collect()
            } else {
                (0..page.strips.len()).collect()
            };
            for i in order {
                out.align();
                strip_offsets[i] = out.buf.len() as u32;
                out.buf.extend_from_slice(&page.strips[i]);
            }
            let tables_offset = page.jpeg_tables.as_ref().map(|tables| {
                out.align();
                let at = out.buf.len() as u32;
                out.buf.extend_from_slice(tables);
                (at, tables.len() as u32)
            });

            let mut entries: Vec<(u16, u16, Vec<u32>)> = vec![
                (256, TYPE_LONG, vec![page.width]),
                (257, TYPE_LONG, vec![page.height]),
                (258, TYPE_SHORT, vec![8, 8, 8]),
                (259, TYPE_SHORT, vec![page.compression as u32]),
                (262, TYPE_SHORT, vec![page.photometric as u32]),
                (273, TYPE_LONG, strip_offsets),
                (277, TYPE_SHORT, vec![3]),
                (278, TYPE_LONG, vec![page.rows_per_strip()]),
                (
                    279,
                    TYPE_LONG,
                    page.strips.iter().map(|s| s.len() as u32).collect(),
                ),
                (284, TYPE_SHORT, vec![1]),
            ];
            if let Some((offset, len)) = tables_offset {
                entries.push((513, TYPE_LONG, vec![offset]));
                entries.push((514, TYPE_LONG, vec![len]));
            }
            entries.sort_by_key(|e| e.0);

            // Out-of-line value arrays go before the IFD itself.
            let mut fields = Vec::with_capacity(entries.len());
            for (tag, field_type, values) in &entries {
                let encoded = out.encode_values(*field_type, values);
                let field = if encoded.len() <= 4 {
                    let mut inline = encoded;
                    inline.resize(4, 0);
                    inline
                } else {
                    out.align();
                    let at = out.buf.len() as u32;
                    out.buf.extend_from_slice(&encoded);
                    out.u32_bytes(at)
                };
                fields.push((*tag, *field_type, values.len() as u32, field));
            }

            out.align();
            let ifd_at = out.buf.len() as u32;
            let pointer = out.u32_bytes(ifd_at);
            out.buf[next_pointer_at..next_pointer_at + 4].copy_from_slice(&pointer);

            out.u16(fields.len() as u16);
            for (tag, field_type, count, field) in fields {
                out.u16(tag);
                out.u16(field_type);
                out.u32(count);
                out.buf.extend_from_slice(&field);
            }
            next_pointer_at = out.buf.len();
            out.u32(0);
        }
        out.buf
    }
}

struct Writer {
    buf: Vec<u8>,
    big_endian: bool,
}

impl Writer {
    fn align(&mut self) {
        if self.buf.len() % 2 == 1 {
            self.buf.push(0);
        }
    }

    fn u16(&mut self, v: u16) {
        let bytes = if self.big_endian {
            v.to_be_bytes()
        } else {
            v.to_le_bytes()
        };
        self.buf.extend_from_slice(&bytes);
    }

    fn u32(&mut self, v: u32) {
        let bytes = self.u32_bytes(v);
        self.buf.extend_from_slice(&bytes);
    }

    fn u32_bytes(&self, v: u32) -> Vec<u8> {
        if self.big_endian {
            v.to_be_bytes().to_vec()
        } else {
            v.to_le_bytes().to_vec()
        }
    }

    fn encode_values(&self, field_type: u16, values: &[u32]) -> Vec<u8> {
        let mut encoded = Vec::new();
        for &v in values {
            if field_type == TYPE_SHORT {
                let v = v as u16;
                encoded.extend_from_slice(&if self.big_endian {
                    v.to_be_bytes()
                } else {
                    v.to_le_bytes()
                });
            } else {
                encoded.extend_from_slice(&self.u32_bytes(v));
            }
        }
        encoded
    }
}

fn rgb_samples(width: u32, height: u32, pixel: impl Fn(u32, u32) -> [u8; 3]) -> Vec<u8> {
    let mut raw = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height {
        for x in 0..width {
            raw.extend_from_slice(&pixel(x, y));
        }
    }
    raw
}

/// Baseline JPEG of a simple gradient.
pub fn sample_jpeg(width: u32, height: u32) -> Vec<u8> {
    let raw = rgb_samples(width, height, |x, y| [(x * 7) as u8, (y * 5) as u8, 128]);
    let mut out = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 80)
        .write_image(&raw, width, height, image::ExtendedColorType::Rgb8)
        .expect("JPEG encode");
    out
}

/// PNG of a simple gradient.
pub fn sample_png(width: u32, height: u32) -> Vec<u8> {
    let mut raw = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            raw.extend_from_slice(&[(x * 3) as u8, (y * 3) as u8, 64, 255]);
        }
    }
    let mut out = Vec::new();
    image::codecs::png::PngEncoder::new(&mut out)
        .write_image(&raw, width, height, image::ExtendedColorType::Rgba8)
        .expect("PNG encode");
    out
}

/// Split a JPEG at its first start-of-scan marker into the tables region and
/// `strip_count` roughly equal strips of scan data.
pub fn split_jpeg(jpeg: &[u8], strip_count: usize) -> (Vec<u8>, Vec<Vec<u8>>) {
    let sos = jpeg
        .windows(2)
        .position(|w| w == [0xFF, 0xDA])
        .expect("JPEG has a scan");
    let (tables, scan) = jpeg.split_at(sos);
    let chunk = scan.len().div_ceil(strip_count.max(1));
    let strips = scan.chunks(chunk.max(1)).map(<[u8]>::to_vec).collect();
    (tables.to_vec(), strips)
}

/// Overwrite the value field of `tag` in the IFD of `page`.
pub fn patch_field(data: &mut [u8], page: usize, tag: u16, value: u32) {
    let big_endian = &data[..2] == b"MM";
    let read_u16 = |b: &[u8], at: usize| {
        let bytes = [b[at], b[at + 1]];
        if big_endian { u16::from_be_bytes(bytes) } else { u16::from_le_bytes(bytes) }
    };
    let read_u32 = |b: &[u8], at: usize| {
        let bytes = [b[at], b[at + 1], b[at + 2], b[at + 3]];
        if big_endian { u32::from_be_bytes(bytes) } else { u32::from_le_bytes(bytes) }
    };
    let mut ifd = read_u32(data, 4) as usize;
    for _ in 0..page {
        let count = read_u16(data, ifd) as usize;
        ifd = read_u32(data, ifd + 2 + count * 12) as usize;
    }
    let count = read_u16(data, ifd) as usize;
    let entry = (0..count)
        .map(|i| ifd + 2 + i * 12)
        .find(|&at| read_u16(data, at) == tag)
        .expect("tag present");
    let encoded = if big_endian { value.to_be_bytes() } else { value.to_le_bytes() };
    data[entry + 8..entry + 12].copy_from_slice(&encoded);
}
