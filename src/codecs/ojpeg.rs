// src/codecs/ojpeg.rs
//
// Old-style JPEG (TIFF compression 6) fast path.
//
// Legacy OJPEG pages carry a complete JPEG bitstream split across TIFF tags:
// a tables region (quantization/Huffman tables and frame header) referenced by
// tags 513/514, and the entropy-coded scan spread over the page's strips.
// Rebuilding the stream is pure byte copying: tables first, then every strip
// in tag-array order. Nothing here looks inside the JPEG data.

use super::ifd::{Ifd, TAG_JPEG_IF_BYTE_COUNT, TAG_JPEG_IF_OFFSET, TAG_STRIP_BYTE_COUNTS, TAG_STRIP_OFFSETS};
use crate::error::{PipelineError, Result};

fn region<'a>(data: &'a [u8], offset: u32, len: u32, what: &str) -> Result<&'a [u8]> {
    let start = offset as usize;
    start
        .checked_add(len as usize)
        .and_then(|end| data.get(start..end))
        .ok_or_else(|| {
            PipelineError::malformed_tiff(format!(
                "{what} at {offset}+{len} exceeds file size {}",
                data.len()
            ))
        })
}

/// Rebuild the original JPEG bitstream of an OJPEG page.
///
/// Errors when any of the four location tags is missing, when the strip
/// arrays disagree in length, or when a region falls outside `data`. Callers
/// treat any error as "use the pixel decode path instead".
pub fn reconstruct(data: &[u8], ifd: &Ifd) -> Result<Vec<u8>> {
    let tables_offset = ifd
        .jpeg_tables_offset()
        .ok_or_else(|| PipelineError::missing_tag(TAG_JPEG_IF_OFFSET))?;
    let tables_len = ifd
        .jpeg_tables_length()
        .ok_or_else(|| PipelineError::missing_tag(TAG_JPEG_IF_BYTE_COUNT))?;
    let offsets = ifd
        .strip_offsets()
        .ok_or_else(|| PipelineError::missing_tag(TAG_STRIP_OFFSETS))?;
    let counts = ifd
        .strip_byte_counts()
        .ok_or_else(|| PipelineError::missing_tag(TAG_STRIP_BYTE_COUNTS))?;

    if offsets.len() != counts.len() {
        return Err(PipelineError::malformed_tiff(format!(
            "{} strip offsets but {} strip byte counts",
            offsets.len(),
            counts.len()
        )));
    }

    let tables = region(data, tables_offset, tables_len, "JPEG tables")?;
    let strips = offsets
        .iter()
        .zip(counts)
        .map(|(&offset, &len)| region(data, offset, len, "strip"))
        .collect::<Result<Vec<_>>>()?;

    let total = tables.len() + strips.iter().map(|s| s.len()).sum::<usize>();
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(tables);
    for strip in strips {
        out.extend_from_slice(strip);
    }
    Ok(out)
}
