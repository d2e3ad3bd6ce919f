// src/codecs/ifd.rs
//
// Classic TIFF directory reader.
// Reads the header, walks the IFD chain and resolves integer-valued entries.
// Pixel data is never touched here; the scheduler uses this on the main thread
// to count and weigh pages, workers use it to pick a decode path per page.

use crate::error::{PipelineError, Result};
use std::collections::{BTreeMap, HashSet};

// Tag numbers are an interop contract and must not change.
pub const TAG_IMAGE_WIDTH: u16 = 256;
pub const TAG_IMAGE_LENGTH: u16 = 257;
pub const TAG_COMPRESSION: u16 = 259;
pub const TAG_STRIP_OFFSETS: u16 = 273;
pub const TAG_STRIP_BYTE_COUNTS: u16 = 279;
pub const TAG_JPEG_IF_OFFSET: u16 = 513;
pub const TAG_JPEG_IF_BYTE_COUNT: u16 = 514;

pub const COMPRESSION_NONE: u16 = 1;
pub const COMPRESSION_OJPEG: u16 = 6;
pub const COMPRESSION_JPEG2000: u16 = 34712;

/// Upper bound on directories walked per file (guards against crafted chains).
const MAX_PAGES: usize = 65_536;

const IFD_ENTRY_SIZE: usize = 12;

// Field types we resolve. Rationals, floats and strings are skipped.
const TYPE_BYTE: u16 = 1;
const TYPE_SHORT: u16 = 3;
const TYPE_LONG: u16 = 4;
const TYPE_IFD: u16 = 13;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

/// Bounds-checked reads in the file's byte order.
#[derive(Clone, Copy)]
struct Reader<'a> {
    data: &'a [u8],
    order: ByteOrder,
}

impl<'a> Reader<'a> {
    fn slice(&self, offset: usize, len: usize) -> Result<&'a [u8]> {
        offset
            .checked_add(len)
            .and_then(|end| self.data.get(offset..end))
            .ok_or_else(|| {
                PipelineError::malformed_tiff(format!(
                    "read of {len} bytes at offset {offset} exceeds file size {}",
                    self.data.len()
                ))
            })
    }

    fn u16_at(&self, offset: usize) -> Result<u16> {
        let b = self.slice(offset, 2)?;
        Ok(match self.order {
            ByteOrder::LittleEndian => u16::from_le_bytes([b[0], b[1]]),
            ByteOrder::BigEndian => u16::from_be_bytes([b[0], b[1]]),
        })
    }

    fn u32_at(&self, offset: usize) -> Result<u32> {
        let b = self.slice(offset, 4)?;
        Ok(match self.order {
            ByteOrder::LittleEndian => u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            ByteOrder::BigEndian => u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
        })
    }
}

/// The IFD chain of one TIFF file: byte order plus one directory offset per page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TiffDirectory {
    order: ByteOrder,
    ifd_offsets: Vec<u32>,
}

impl TiffDirectory {
    /// Parse the header and walk the IFD chain without resolving any entries.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(PipelineError::malformed_tiff("file shorter than TIFF header"));
        }
        let order = match &data[0..2] {
            b"II" => ByteOrder::LittleEndian,
            b"MM" => ByteOrder::BigEndian,
            _ => return Err(PipelineError::malformed_tiff("missing byte order mark")),
        };
        let reader = Reader { data, order };
        match reader.u16_at(2)? {
            42 => {}
            43 => return Err(PipelineError::unsupported_format("BigTIFF")),
            other => {
                return Err(PipelineError::malformed_tiff(format!(
                    "bad magic number {other}"
                )))
            }
        }

        let mut offset = reader.u32_at(4)?;
        if offset == 0 {
            return Err(PipelineError::malformed_tiff("no image file directories"));
        }

        let mut ifd_offsets = Vec::new();
        let mut seen = HashSet::new();
        while offset != 0 {
            if !seen.insert(offset) {
                return Err(PipelineError::malformed_tiff(format!(
                    "IFD chain loops back to offset {offset}"
                )));
            }
            if ifd_offsets.len() >= MAX_PAGES {
                return Err(PipelineError::malformed_tiff(format!(
                    "more than {MAX_PAGES} image file directories"
                )));
            }
            let base = offset as usize;
            let count = reader.u16_at(base)? as usize;
            let next_at = base + 2 + count * IFD_ENTRY_SIZE;
            ifd_offsets.push(offset);
            offset = reader.u32_at(next_at)?;
        }

        Ok(Self { order, ifd_offsets })
    }

    pub fn page_count(&self) -> usize {
        self.ifd_offsets.len()
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    /// Resolve the integer entries of one page's directory.
    pub fn read_ifd(&self, data: &[u8], page: usize) -> Result<Ifd> {
        let offset = *self
            .ifd_offsets
            .get(page)
            .ok_or_else(|| PipelineError::page_out_of_range(page, self.page_count()))?
            as usize;
        let reader = Reader {
            data,
            order: self.order,
        };

        let count = reader.u16_at(offset)? as usize;
        let mut entries = BTreeMap::new();
        for i in 0..count {
            let at = offset + 2 + i * IFD_ENTRY_SIZE;
            let tag = reader.u16_at(at)?;
            let field_type = reader.u16_at(at + 2)?;
            let value_count = reader.u32_at(at + 4)? as usize;

            let width = match field_type {
                TYPE_BYTE => 1,
                TYPE_SHORT => 2,
                TYPE_LONG | TYPE_IFD => 4,
                _ => continue,
            };
            let total = value_count.checked_mul(width).ok_or_else(|| {
                PipelineError::malformed_tiff(format!("tag {tag} value count overflows"))
            })?;
            // Values that fit in four bytes are stored inline, left-justified.
            let values_at = if total <= 4 {
                at + 8
            } else {
                reader.u32_at(at + 8)? as usize
            };
            let raw = reader.slice(values_at, total)?;

            let values = match field_type {
                TYPE_BYTE => raw.iter().map(|&b| b as u32).collect(),
                TYPE_SHORT => (0..value_count)
                    .map(|n| reader.u16_at(values_at + n * 2).map(u32::from))
                    .collect::<Result<Vec<_>>>()?,
                _ => (0..value_count)
                    .map(|n| reader.u32_at(values_at + n * 4))
                    .collect::<Result<Vec<_>>>()?,
            };
            entries.insert(tag, values);
        }

        Ok(Ifd { page, entries })
    }
}

/// One page's directory. Ephemeral: built per page decode and dropped with it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ifd {
    page: usize,
    entries: BTreeMap<u16, Vec<u32>>,
}

impl Ifd {
    pub fn page(&self) -> usize {
        self.page
    }

    pub fn values(&self, tag: u16) -> Option<&[u32]> {
        self.entries.get(&tag).map(Vec::as_slice)
    }

    pub fn value(&self, tag: u16) -> Option<u32> {
        self.values(tag).and_then(|v| v.first().copied())
    }

    pub fn width(&self) -> Option<u32> {
        self.value(TAG_IMAGE_WIDTH)
    }

    pub fn height(&self) -> Option<u32> {
        self.value(TAG_IMAGE_LENGTH)
    }

    /// Compression tag value; TIFF defaults to 1 (none) when absent.
    pub fn compression(&self) -> u16 {
        self.value(TAG_COMPRESSION)
            .map(|v| v as u16)
            .unwrap_or(COMPRESSION_NONE)
    }

    pub fn strip_offsets(&self) -> Option<&[u32]> {
        self.values(TAG_STRIP_OFFSETS)
    }

    pub fn strip_byte_counts(&self) -> Option<&[u32]> {
        self.values(TAG_STRIP_BYTE_COUNTS)
    }

    pub fn jpeg_tables_offset(&self) -> Option<u32> {
        self.value(TAG_JPEG_IF_OFFSET)
    }

    pub fn jpeg_tables_length(&self) -> Option<u32> {
        self.value(TAG_JPEG_IF_BYTE_COUNT)
    }

    /// Compressed payload size of the page, used to weigh pages when chunking.
    pub fn strip_bytes_total(&self) -> u64 {
        self.strip_byte_counts()
            .map(|counts| counts.iter().map(|&c| c as u64).sum())
            .unwrap_or(0)
    }
}
