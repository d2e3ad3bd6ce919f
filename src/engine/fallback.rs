// src/engine/fallback.rs
//
// Main-thread fallback decoder. Last resort for pages the workers could not
// produce: re-fetches the source by URL (workers drop their bytes early) and
// decodes with every capability available. Its failures are terminal.

use super::page::{DecodeSettings, PageDecode, PageDecoder};
use super::source::{ByteFetcher, SourceBytes};
use crate::codecs::TiffDirectory;
use crate::error::{PipelineError, Result};
use crate::model::{Blob, FallbackDescriptor, SourceFormat};
use std::sync::Arc;

/// Most recently fetched source. Descriptors tend to arrive in runs for the
/// same file, so one entry avoids refetching per page.
struct CachedSource {
    url: String,
    bytes: SourceBytes,
    directory: Option<TiffDirectory>,
}

pub struct FallbackDecoder {
    fetcher: Arc<dyn ByteFetcher>,
    decoder: PageDecoder,
    cache: Option<CachedSource>,
}

impl FallbackDecoder {
    pub fn new(fetcher: Arc<dyn ByteFetcher>, settings: DecodeSettings) -> Self {
        Self {
            fetcher,
            decoder: PageDecoder::new(settings),
            cache: None,
        }
    }

    pub fn has_cached_source(&self) -> bool {
        self.cache.is_some()
    }

    /// Drop the cached source buffer. Called when a batch drains.
    pub fn release(&mut self) {
        self.cache = None;
    }

    pub fn decode(&mut self, descriptor: &FallbackDescriptor) -> Result<Blob> {
        let page = &descriptor.page;
        tracing::debug!(
            index = page.all_pages_index,
            url = %page.source_url,
            reason = ?descriptor.reason,
            "decoding page on main thread"
        );
        let format = SourceFormat::from_extension(&page.file_extension)
            .ok_or_else(|| PipelineError::unsupported_format(page.file_extension.clone()))?;

        // Field-level borrows: the decoder and the cache are used together.
        let decoder = &mut self.decoder;
        let cache = {
            // Release the previous buffer before fetching the next one.
            let stale = self.cache.as_ref().map_or(true, |c| c.url != page.source_url);
            if stale {
                self.cache = None;
                let bytes = self.fetcher.fetch(&page.source_url)?;
                self.cache = Some(CachedSource {
                    url: page.source_url.clone(),
                    bytes,
                    directory: None,
                });
            }
            match self.cache.as_mut() {
                Some(cache) => cache,
                None => {
                    return Err(PipelineError::fetch_failed(
                        page.source_url.clone(),
                        "source cache empty",
                    ))
                }
            }
        };

        match format {
            SourceFormat::SingleFrame(mime) => {
                decoder.decode_single_frame(mime, cache.bytes.as_bytes())
            }
            SourceFormat::Tiff => {
                let data = cache.bytes.as_bytes();
                let directory = match cache.directory.take() {
                    Some(directory) => directory,
                    None => TiffDirectory::parse(data)?,
                };
                let decoded = decoder.decode_tiff_page(data, &directory, page.page_index);
                cache.directory = Some(directory);
                match decoded? {
                    PageDecode::Blob(blob) => Ok(blob),
                    PageDecode::Fallback(reason) => Err(PipelineError::decode_failed(format!(
                        "main thread cannot decode page: {reason:?}"
                    ))),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::PipelineConfig;
    use crate::engine::source::MemoryFetcher;
    use crate::error::ErrorCategory;
    use crate::model::{Epoch, FallbackReason, Mime, PageRef};
    use crate::testing::{PageSpec, TiffBuilder};

    struct Counting {
        inner: MemoryFetcher,
        fetches: std::sync::atomic::AtomicUsize,
    }

    impl ByteFetcher for Counting {
        fn fetch(&self, url: &str) -> Result<SourceBytes> {
            self.fetches
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.fetch(url)
        }
    }

    fn descriptor(url: &str, ext: &str, page_index: usize) -> FallbackDescriptor {
        FallbackDescriptor::new(
            PageRef {
                file_index: 0,
                page_index,
                all_pages_index: page_index,
                file_extension: ext.to_string(),
                source_url: url.to_string(),
                epoch: Epoch(0),
            },
            FallbackReason::RasterSurfaceUnavailable,
        )
    }

    fn fallback(fetcher: Arc<Counting>) -> FallbackDecoder {
        FallbackDecoder::new(
            fetcher,
            DecodeSettings::for_main_thread(&PipelineConfig::default()),
        )
    }

    fn counting() -> Arc<Counting> {
        let inner = MemoryFetcher::new();
        inner.insert(
            "mem://doc.tif",
            TiffBuilder::new()
                .page(PageSpec::rgb(4, 4, |_, _| [9, 8, 7]))
                .page(PageSpec::lzw(3, 3, |_, _| [1, 2, 3]))
                .page(PageSpec::jpeg2000(3, 3, vec![0; 8]))
                .build(),
        );
        inner.insert("mem://pic.bmp", b"BM....".to_vec());
        Arc::new(Counting {
            inner,
            fetches: Default::default(),
        })
    }

    #[test]
    fn decodes_pages_and_reuses_the_fetched_source() {
        let fetcher = counting();
        let mut decoder = fallback(Arc::clone(&fetcher));
        let first = decoder.decode(&descriptor("mem://doc.tif", "tif", 0)).unwrap();
        let second = decoder.decode(&descriptor("mem://doc.tif", "tif", 1)).unwrap();
        assert_eq!(first.mime(), Mime::Png);
        assert_eq!(second.mime(), Mime::Png);
        assert_eq!(fetcher.fetches.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(decoder.has_cached_source());

        decoder.release();
        assert!(!decoder.has_cached_source());
    }

    #[test]
    fn single_frame_is_refetched_and_passed_through() {
        let mut decoder = fallback(counting());
        let blob = decoder.decode(&descriptor("mem://pic.bmp", "bmp", 0)).unwrap();
        assert_eq!(blob.mime(), Mime::Bmp);
        assert_eq!(blob.bytes(), b"BM....");
    }

    #[test]
    fn failures_are_reported_not_hidden() {
        let mut decoder = fallback(counting());
        assert!(decoder.decode(&descriptor("mem://doc.tif", "tif", 2)).is_err());
        let missing = decoder
            .decode(&descriptor("mem://missing.tif", "tif", 0))
            .unwrap_err();
        assert_eq!(missing.category(), ErrorCategory::ResourceLimit);
        assert!(missing.is_recoverable());
        let unknown = decoder
            .decode(&descriptor("mem://doc.tif", "psd", 0))
            .unwrap_err();
        assert!(matches!(unknown, PipelineError::UnsupportedFormat { .. }));
        assert_eq!(unknown.category(), ErrorCategory::CodecError);
        assert!(!unknown.is_recoverable());
    }
}
