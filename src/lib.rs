// lib.rs
//
// pagefeed: an off-main-thread page decode pipeline for document viewers
//
// Design goals:
// - The UI thread never decodes or encodes pixels unless a worker gave up
// - Every page gets a fixed global index before any work starts
// - Bounded memory: a fixed in-flight window, no batch buffer outlives its jobs
// - Every page ends as ready or failed, never stuck pending

// Memory allocator optimization - jemalloc for better performance
// Note: jemalloc is not supported on Windows/MSVC, so we exclude it on that platform
#[cfg(all(feature = "jemalloc", not(target_env = "msvc")))]
#[global_allocator]
static ALLOC: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

pub mod codecs;
pub mod engine;
pub mod error;
pub mod model;

#[cfg(test)]
mod testing;

pub use engine::{
    BlobUrls, ByteFetcher, Capabilities, DispatchPolicy, FileFetcher, LoadReport, MemoryFetcher,
    MemorySink, PageSink, Pipeline, PipelineConfig, SourceBytes,
};
pub use error::{ErrorCategory, PipelineError, Result};
pub use model::{
    Blob, Epoch, FallbackReason, Mime, PageEntry, PageRef, PageStatus, SourceFile, SourceFormat,
};

use codecs::{ojpeg, TiffDirectory, COMPRESSION_OJPEG};

/// Header-level view of one TIFF page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSummary {
    pub page: usize,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub compression: u16,
    /// Size of the rebuilt JPEG stream for OJPEG pages that reconstruct cleanly.
    pub ojpeg_stream_len: Option<usize>,
    /// Why the page's tags could not be read; the other fields are empty then.
    pub error: Option<String>,
}

/// Walk every IFD of a TIFF without decoding pixels.
///
/// Page-level problems (bad OJPEG layout, unreadable tags) are reflected in the
/// summary; only a broken header or directory chain is an error.
pub fn inspect_tiff(data: &[u8]) -> Result<Vec<PageSummary>> {
    let directory = TiffDirectory::parse(data)?;
    let mut pages = Vec::with_capacity(directory.page_count());
    for page in 0..directory.page_count() {
        let ifd = match directory.read_ifd(data, page) {
            Ok(ifd) => ifd,
            Err(e) => {
                pages.push(PageSummary {
                    page,
                    width: None,
                    height: None,
                    compression: 0,
                    ojpeg_stream_len: None,
                    error: Some(e.to_string()),
                });
                continue;
            }
        };
        let ojpeg_stream_len = if ifd.compression() == COMPRESSION_OJPEG {
            ojpeg::reconstruct(data, &ifd).ok().map(|stream| stream.len())
        } else {
            None
        };
        pages.push(PageSummary {
            page,
            width: ifd.width(),
            height: ifd.height(),
            compression: ifd.compression(),
            ojpeg_stream_len,
            error: None,
        });
    }
    Ok(pages)
}

/// Get library version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Extensions the pipeline accepts as sources.
pub fn supported_extensions() -> &'static [&'static str] {
    &["tif", "tiff", "jpg", "jpeg", "png", "gif", "bmp", "webp"]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{patch_field, sample_jpeg, PageSpec, TiffBuilder};

    #[test]
    fn inspect_reports_each_page() {
        let data = TiffBuilder::new()
            .page(PageSpec::rgb(3, 2, |_, _| [0, 0, 0]))
            .page(PageSpec::ojpeg_from_jpeg(8, 8, &sample_jpeg(8, 8), 2))
            .page(PageSpec::ojpeg_from_jpeg(8, 8, &sample_jpeg(8, 8), 1).without_jpeg_tables())
            .build();
        let pages = inspect_tiff(&data).unwrap();
        assert_eq!(pages.len(), 3);
        assert_eq!((pages[0].width, pages[0].height), (Some(3), Some(2)));
        assert_eq!(pages[0].compression, 1);
        assert!(pages[0].ojpeg_stream_len.is_none());
        assert_eq!(pages[1].compression, COMPRESSION_OJPEG);
        assert_eq!(pages[1].ojpeg_stream_len, Some(sample_jpeg(8, 8).len()));
        assert!(pages[2].ojpeg_stream_len.is_none());
    }

    #[test]
    fn unreadable_page_is_summarized_not_fatal() {
        let mut data = TiffBuilder::new()
            .page(PageSpec::rgb(3, 2, |_, _| [0, 0, 0]))
            .page(PageSpec::ojpeg_from_jpeg(8, 8, &sample_jpeg(8, 8), 2))
            .page(PageSpec::rgb(4, 4, |_, _| [0, 0, 0]))
            .build();
        patch_field(&mut data, 1, 273, u32::MAX);

        let pages = inspect_tiff(&data).unwrap();
        assert_eq!(pages.len(), 3);
        assert!(pages[0].error.is_none());
        assert!(pages[1].error.as_deref().unwrap().contains("exceeds file size"));
        assert_eq!((pages[1].width, pages[1].height), (None, None));
        assert_eq!(pages[2].width, Some(4));
        assert!(pages[2].error.is_none());
    }

    #[test]
    fn inspect_rejects_non_tiff() {
        assert!(inspect_tiff(b"not a tiff at all").is_err());
    }

    #[test]
    fn every_supported_extension_is_recognized() {
        for ext in supported_extensions() {
            assert!(SourceFormat::from_extension(ext).is_some(), "{ext}");
        }
    }
}
