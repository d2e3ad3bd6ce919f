// src/engine/assembler.rs
//
// Page assembler: the single writer of the global page array.
//
// Results are placed by their pre-assigned allPagesIndex, never by arrival
// order. A slot that is ready is never overwritten; a failed slot may still be
// upgraded by a late real blob. Results stamped with an older epoch are dropped.

use crate::model::{Blob, Epoch, PageEntry, PageRef, PageStatus, WorkerResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// External page-state store.
pub trait PageSink {
    fn insert_page_at_index(&mut self, page: PageEntry, index: usize);
}

/// Sparse in-memory page array. Unfilled indices are pending.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemorySink {
    pages: Vec<Option<PageEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pages(&self) -> &[Option<PageEntry>] {
        &self.pages
    }

    pub fn get(&self, index: usize) -> Option<&PageEntry> {
        self.pages.get(index).and_then(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn status(&self, index: usize) -> PageStatus {
        self.get(index).map_or(PageStatus::Pending, |p| p.status)
    }

    pub fn clear(&mut self) {
        self.pages.clear();
    }
}

impl PageSink for MemorySink {
    fn insert_page_at_index(&mut self, page: PageEntry, index: usize) {
        if self.pages.len() <= index {
            self.pages.resize(index + 1, None);
        }
        self.pages[index] = Some(page);
    }
}

impl<S: PageSink + ?Sized> PageSink for &mut S {
    fn insert_page_at_index(&mut self, page: PageEntry, index: usize) {
        (**self).insert_page_at_index(page, index)
    }
}

/// Object-URL registry for page blobs. Clones share the registry, so the UI
/// can resolve and revoke URLs the assembler created.
#[derive(Debug, Clone, Default)]
pub struct BlobUrls {
    entries: Arc<Mutex<HashMap<String, Arc<Blob>>>>,
}

impl BlobUrls {
    pub fn new() -> Self {
        Self::default()
    }

    /// URLs are a pure function of the page slot, so reassembling the same
    /// results yields the same array.
    pub fn url_for(epoch: Epoch, all_pages_index: usize) -> String {
        format!("blob:pagefeed/{}/{}", epoch.0, all_pages_index)
    }

    fn register(&self, url: String, blob: Blob) {
        self.entries.lock().insert(url, Arc::new(blob));
    }

    pub fn resolve(&self, url: &str) -> Option<Arc<Blob>> {
        self.entries.lock().get(url).cloned()
    }

    pub fn revoke(&self, url: &str) -> bool {
        self.entries.lock().remove(url).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What happened to a result handed to the assembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Inserted,
    MarkedFailed,
    /// Older epoch; dropped without touching the array.
    Stale,
    /// Slot already settled; dropped.
    Duplicate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblyStats {
    pub inserted: usize,
    pub failed: usize,
    pub stale_discarded: usize,
    pub duplicates: usize,
}

pub struct PageAssembler<S: PageSink> {
    sink: S,
    urls: BlobUrls,
    epoch: Epoch,
    slots: Vec<PageStatus>,
    stats: AssemblyStats,
}

impl<S: PageSink> PageAssembler<S> {
    pub fn new(sink: S, urls: BlobUrls) -> Self {
        Self {
            sink,
            urls,
            epoch: Epoch::default(),
            slots: Vec::new(),
            stats: AssemblyStats::default(),
        }
    }

    pub fn begin_epoch(&mut self, epoch: Epoch) {
        self.epoch = epoch;
        self.slots.clear();
        self.stats = AssemblyStats::default();
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn urls(&self) -> &BlobUrls {
        &self.urls
    }

    pub fn stats(&self) -> AssemblyStats {
        self.stats
    }

    pub fn status(&self, index: usize) -> PageStatus {
        self.slots.get(index).copied().unwrap_or(PageStatus::Pending)
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Whether a page still needs work: current epoch and not yet ready.
    pub fn is_open(&self, page: &PageRef) -> bool {
        page.epoch == self.epoch && self.status(page.all_pages_index) != PageStatus::Ready
    }

    fn slot_mut(&mut self, index: usize) -> &mut PageStatus {
        if self.slots.len() <= index {
            self.slots.resize(index + 1, PageStatus::Pending);
        }
        &mut self.slots[index]
    }

    fn admit(&mut self, page: &PageRef) -> Option<Placement> {
        if page.epoch != self.epoch {
            tracing::debug!(
                epoch = page.epoch.0,
                current = self.epoch.0,
                index = page.all_pages_index,
                "discarding result of a previous document"
            );
            self.stats.stale_discarded += 1;
            return Some(Placement::Stale);
        }
        if self.status(page.all_pages_index) == PageStatus::Ready {
            self.stats.duplicates += 1;
            return Some(Placement::Duplicate);
        }
        None
    }

    /// Register a decoded page's blob and publish it at its index.
    pub fn place(&mut self, result: WorkerResult) -> Placement {
        let WorkerResult { blob, page } = result;
        if let Some(rejected) = self.admit(&page) {
            return rejected;
        }
        let index = page.all_pages_index;
        let url = BlobUrls::url_for(self.epoch, index);
        self.urls.register(url.clone(), blob);
        self.sink.insert_page_at_index(PageEntry::ready(&page, url), index);
        *self.slot_mut(index) = PageStatus::Ready;
        self.stats.inserted += 1;
        tracing::trace!(index, "page ready");
        Placement::Inserted
    }

    /// Terminal failure: both the worker and the fallback path gave up.
    pub fn mark_failed(&mut self, page: &PageRef) -> Placement {
        if let Some(rejected) = self.admit(page) {
            return rejected;
        }
        let index = page.all_pages_index;
        if self.status(index) == PageStatus::Failed {
            self.stats.duplicates += 1;
            return Placement::Duplicate;
        }
        self.sink.insert_page_at_index(PageEntry::failed(page), index);
        *self.slot_mut(index) = PageStatus::Failed;
        self.stats.failed += 1;
        Placement::MarkedFailed
    }
}
