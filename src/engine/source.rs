// src/engine/source.rs
//
// Source bytes and fetching: SourceBytes enum, ByteFetcher seam, file and in-memory fetchers

use crate::error::{PipelineError, Result};
use memmap2::Mmap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

/// Fetched document bytes - either owned in memory or a memory-mapped file.
///
/// Cloning is cheap: chunk jobs of one document share the same read-only buffer,
/// and the buffer is released once the last job holding it is dropped.
#[derive(Clone, Debug)]
pub enum SourceBytes {
    /// In-memory data
    Memory(Arc<[u8]>),
    /// Memory-mapped file (zero-copy access)
    Mapped(Arc<Mmap>),
}

impl SourceBytes {
    pub fn from_vec(data: Vec<u8>) -> Self {
        SourceBytes::Memory(Arc::from(data))
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            SourceBytes::Memory(data) => data,
            SourceBytes::Mapped(mmap) => mmap.as_ref(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<u8>> for SourceBytes {
    fn from(data: Vec<u8>) -> Self {
        SourceBytes::from_vec(data)
    }
}

impl AsRef<[u8]> for SourceBytes {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

/// Host byte fetching seam. The pipeline calls this once per source file,
/// and the fallback decoder calls it for pages that arrive without bytes.
pub trait ByteFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<SourceBytes>;
}

/// Fetches local files, accepting plain paths and `file://` URLs.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileFetcher;

impl FileFetcher {
    fn resolve(url: &str) -> PathBuf {
        PathBuf::from(url.strip_prefix("file://").unwrap_or(url))
    }
}

impl ByteFetcher for FileFetcher {
    fn fetch(&self, url: &str) -> Result<SourceBytes> {
        let path = Self::resolve(url);
        let file =
            File::open(&path).map_err(|e| PipelineError::source_read_failed(url.to_string(), e))?;
        let len = file
            .metadata()
            .map_err(|e| PipelineError::source_read_failed(url.to_string(), e))?
            .len();
        // Zero-length mappings fail on some platforms.
        if len == 0 {
            return Ok(SourceBytes::from_vec(Vec::new()));
        }

        // Safety: We assume the file won't be modified externally while pages decode.
        // If modified, decoding may fail or produce corrupted pages, and on some
        // platforms truncation can raise SIGBUS.
        let mmap = unsafe {
            Mmap::map(&file).map_err(|e| PipelineError::mmap_failed(url.to_string(), e))?
        };
        Ok(SourceBytes::Mapped(Arc::new(mmap)))
    }
}

/// Serves registered byte buffers by URL. Useful for hosts that already hold
/// the documents in memory, and for tests.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    entries: Mutex<HashMap<String, SourceBytes>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: impl Into<String>, bytes: impl Into<SourceBytes>) {
        self.entries.lock().insert(url.into(), bytes.into());
    }

    pub fn remove(&self, url: &str) -> Option<SourceBytes> {
        self.entries.lock().remove(url)
    }
}

impl ByteFetcher for MemoryFetcher {
    fn fetch(&self, url: &str) -> Result<SourceBytes> {
        self.entries
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| PipelineError::fetch_failed(url.to_string(), "no such entry"))
    }
}

impl<F: ByteFetcher + ?Sized> ByteFetcher for Arc<F> {
    fn fetch(&self, url: &str) -> Result<SourceBytes> {
        (**self).fetch(url)
    }
}
