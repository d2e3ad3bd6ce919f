// tests/common/mod.rs
//
// Shared fixtures for the integration tests. The TIFF writer lives in the
// library's test module and is included here by path.

#![allow(dead_code)]

#[path = "../../src/testing.rs"]
mod testing;

pub use testing::*;

use pagefeed::model::{Epoch, JobTicket, WorkerJob};
use pagefeed::SourceBytes;

/// A job covering `pages` pages of one source, starting at page `start`.
pub fn job(
    id: u64,
    ext: &str,
    bytes: Vec<u8>,
    start: usize,
    pages: usize,
    all_pages_start: usize,
) -> WorkerJob {
    WorkerJob {
        ticket: JobTicket {
            id,
            epoch: Epoch(0),
            file_extension: ext.to_string(),
            file_index: 0,
            page_start_index: start,
            pages_involved: pages,
            all_pages_starting_index: all_pages_start,
            source_url: format!("mem://job-{id}.{ext}"),
        },
        bytes: Some(SourceBytes::from_vec(bytes)),
    }
}

/// OJPEG page, JPEG 2000 page, LZW page.
pub fn mixed_compression_tiff() -> Vec<u8> {
    TiffBuilder::new()
        .page(PageSpec::ojpeg_from_jpeg(16, 16, &sample_jpeg(16, 16), 3))
        .page(PageSpec::jpeg2000(16, 16, vec![0xFF, 0x4F, 0xFF, 0x51, 0, 0, 0, 0]))
        .page(PageSpec::lzw(16, 16, |x, y| [x as u8 * 8, y as u8 * 8, 64]))
        .build()
}
