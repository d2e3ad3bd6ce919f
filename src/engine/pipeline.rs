// src/engine/pipeline.rs
//
// Pipeline driver: wires the scheduler, the worker pool, the page assembler and
// the fallback decoder together on the main thread.
//
// Flow: source -> fetch -> scheduler (jobs) -> workers -> responses ->
// assembler, with fallback descriptors decoded on the main thread before they
// reach the assembler. Every page ends as ready (1) or failed (-1).

use super::assembler::{AssemblyStats, BlobUrls, PageAssembler, PageSink, Placement};
use super::config::PipelineConfig;
use super::fallback::FallbackDecoder;
use super::page::DecodeSettings;
use super::pool::{HandlerFactory, JobHandler, WorkerEvent, WorkerPool};
use super::scheduler::JobScheduler;
use super::source::{ByteFetcher, SourceBytes};
use super::worker::DecodeEngine;
use crate::error::{PipelineError, Result};
use crate::model::{Epoch, PageOutcome, SourceFile, WorkerResult};
use std::sync::Arc;
use std::time::Duration;

/// How long `load` and `drain` wait for a worker event per iteration.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Summary of one document load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Page indices reserved for the document.
    pub pages: usize,
    /// Pages produced by workers.
    pub decoded: usize,
    /// Pages produced by the main-thread fallback.
    pub recovered: usize,
    /// Pages that ended at status -1.
    pub failed: usize,
    pub stale_discarded: usize,
    pub duplicates: usize,
}

pub struct Pipeline<S: PageSink> {
    fetcher: Arc<dyn ByteFetcher>,
    pool: WorkerPool,
    scheduler: JobScheduler,
    assembler: PageAssembler<S>,
    fallback: FallbackDecoder,
    epoch: Epoch,
    decoded: usize,
    recovered: usize,
}

impl<S: PageSink> Pipeline<S> {
    pub fn new(config: PipelineConfig, fetcher: Arc<dyn ByteFetcher>, sink: S) -> Result<Self> {
        let settings = DecodeSettings::for_workers(&config);
        let factory: HandlerFactory = Arc::new(move |worker| {
            Box::new(DecodeEngine::new(worker, settings)) as Box<dyn JobHandler>
        });
        Self::with_handler_factory(config, fetcher, sink, factory)
    }

    /// Build with custom worker handlers (e.g. instrumented engines).
    pub fn with_handler_factory(
        config: PipelineConfig,
        fetcher: Arc<dyn ByteFetcher>,
        sink: S,
        factory: HandlerFactory,
    ) -> Result<Self> {
        config.validate()?;
        let pool = WorkerPool::new(config.workers, factory)?;
        tracing::info!(
            workers = config.workers,
            max_in_flight = config.max_in_flight(),
            pages_per_job = config.pages_per_job,
            "pipeline ready"
        );
        Ok(Self {
            fallback: FallbackDecoder::new(
                Arc::clone(&fetcher),
                DecodeSettings::for_main_thread(&config),
            ),
            fetcher,
            pool,
            scheduler: JobScheduler::new(&config),
            assembler: PageAssembler::new(sink, BlobUrls::new()),
            epoch: Epoch::default(),
            decoded: 0,
            recovered: 0,
        })
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn urls(&self) -> &BlobUrls {
        self.assembler.urls()
    }

    pub fn sink(&self) -> &S {
        self.assembler.sink()
    }

    /// The host clears or swaps its page store here on document switches.
    pub fn sink_mut(&mut self) -> &mut S {
        self.assembler.sink_mut()
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    pub fn fallback(&self) -> &FallbackDecoder {
        &self.fallback
    }

    /// Switch to a new document. Queued jobs of the previous one are dropped;
    /// results still arriving for it are discarded by the assembler.
    pub fn begin_document(&mut self) -> Epoch {
        self.epoch = self.epoch.next();
        self.scheduler.begin_epoch(self.epoch);
        self.assembler.begin_epoch(self.epoch);
        self.fallback.release();
        self.decoded = 0;
        self.recovered = 0;
        tracing::info!(epoch = self.epoch.0, "document started");
        self.epoch
    }

    pub fn submit(&mut self, source: SourceFile, bytes: SourceBytes) {
        let outcomes = self.scheduler.submit(source, Ok(bytes), &self.pool);
        self.route(outcomes);
    }

    /// Record a source whose bytes could not be fetched. It still gets a page.
    pub fn submit_unfetched(&mut self, source: SourceFile, error: PipelineError) {
        tracing::warn!(
            url = %source.url,
            %error,
            category = error.category().as_str(),
            recoverable = error.is_recoverable(),
            "source fetch failed"
        );
        let outcomes = self.scheduler.submit(source, Err(error), &self.pool);
        self.route(outcomes);
    }

    /// Handle at most one worker event. Returns false on timeout.
    pub fn poll(&mut self, timeout: Duration) -> bool {
        match self.pool.recv_timeout(timeout) {
            Some(event) => {
                self.handle_event(event);
                true
            }
            None => false,
        }
    }

    fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Response { response, .. } => {
                let outcomes = self.scheduler.settle(response);
                self.route(outcomes);
            }
            WorkerEvent::Exited { worker, abnormal } => {
                let outcomes = self.scheduler.worker_exited(worker);
                self.route(outcomes);
                match self.pool.respawn(worker) {
                    Ok(()) => self.scheduler.worker_restarted(worker),
                    Err(e) => {
                        tracing::warn!(worker, abnormal, error = %e, "could not respawn worker");
                        if self.scheduler.open_workers() == 0 {
                            let outcomes = self.scheduler.abandon_pending();
                            self.route(outcomes);
                        }
                    }
                }
            }
        }
        self.scheduler.dispatch_pending(&self.pool);
    }

    fn route(&mut self, outcomes: Vec<PageOutcome>) {
        for outcome in outcomes {
            match outcome {
                PageOutcome::Decoded(result) => {
                    if self.assembler.place(result) == Placement::Inserted {
                        self.decoded += 1;
                    }
                }
                PageOutcome::Fallback(descriptor) => {
                    // Stale or already ready: let the assembler count and drop it.
                    if !self.assembler.is_open(&descriptor.page) {
                        self.assembler.mark_failed(&descriptor.page);
                        continue;
                    }
                    match self.fallback.decode(&descriptor) {
                        Ok(blob) => {
                            let result = WorkerResult {
                                blob,
                                page: descriptor.page,
                            };
                            if self.assembler.place(result) == Placement::Inserted {
                                self.recovered += 1;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(
                                index = descriptor.page.all_pages_index,
                                url = %descriptor.page.source_url,
                                reason = ?descriptor.reason,
                                error = %e,
                                category = e.category().as_str(),
                                "page failed on every path"
                            );
                            self.assembler.mark_failed(&descriptor.page);
                        }
                    }
                }
            }
        }
    }

    /// Wait until every submitted source has settled, then release batch buffers.
    pub fn drain(&mut self) -> LoadReport {
        let outcomes = self.scheduler.flush_waiting(&self.pool);
        self.route(outcomes);

        while !self.scheduler.is_idle() {
            if self.poll(POLL_INTERVAL) {
                continue;
            }
            if self.scheduler.in_flight_len() == 0 && self.scheduler.pending_len() > 0 {
                self.scheduler.dispatch_pending(&self.pool);
                if self.scheduler.open_workers() == 0 {
                    let outcomes = self.scheduler.abandon_pending();
                    self.route(outcomes);
                }
            }
        }

        self.fallback.release();
        let report = self.report();
        tracing::info!(
            pages = report.pages,
            decoded = report.decoded,
            recovered = report.recovered,
            failed = report.failed,
            "document settled"
        );
        report
    }

    /// Fetch and submit sources in order, holding off while the in-flight
    /// window is full, then drain.
    pub fn load(&mut self, sources: impl IntoIterator<Item = SourceFile>) -> LoadReport {
        for source in sources {
            while self.scheduler.is_saturated() {
                self.poll(POLL_INTERVAL);
            }
            while let Some(event) = self.pool.try_recv() {
                self.handle_event(event);
            }
            match self.fetcher.fetch(&source.url) {
                Ok(bytes) => self.submit(source, bytes),
                Err(error) => self.submit_unfetched(source, error),
            }
        }
        self.drain()
    }

    pub fn report(&self) -> LoadReport {
        let AssemblyStats {
            failed,
            stale_discarded,
            duplicates,
            ..
        } = self.assembler.stats();
        LoadReport {
            pages: self.scheduler.reserved_pages(),
            decoded: self.decoded,
            recovered: self.recovered,
            failed,
            stale_discarded,
            duplicates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::assembler::MemorySink;
    use crate::engine::source::MemoryFetcher;
    use crate::model::PageStatus;
    use crate::testing::{sample_png, PageSpec, TiffBuilder};

    fn pipeline(fetcher: Arc<MemoryFetcher>) -> Pipeline<MemorySink> {
        let config = PipelineConfig::default()
            .with_workers(2)
            .with_pages_per_job(2);
        Pipeline::new(config, fetcher, MemorySink::new()).unwrap()
    }

    #[test]
    fn load_places_every_page_in_order() {
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.insert("a.png", sample_png(4, 4));
        fetcher.insert(
            "b.tif",
            TiffBuilder::new()
                .page(PageSpec::rgb(2, 2, |_, _| [1, 1, 1]))
                .page(PageSpec::lzw(2, 2, |_, _| [2, 2, 2]))
                .page(PageSpec::rgb(2, 2, |_, _| [3, 3, 3]))
                .build(),
        );
        let mut pipeline = pipeline(Arc::clone(&fetcher));
        pipeline.begin_document();
        let report = pipeline.load(vec![
            SourceFile::new("a.png", "png", 0),
            SourceFile::new("b.tif", "tif", 1),
            SourceFile::new("c.tif", "tif", 2),
        ]);

        assert_eq!(report.pages, 5);
        assert_eq!(report.decoded, 4);
        assert_eq!(report.failed, 1);
        let sink = pipeline.sink();
        for index in 0..4 {
            assert_eq!(sink.status(index), PageStatus::Ready, "page {index}");
        }
        assert_eq!(sink.status(4), PageStatus::Failed);
        assert_eq!(sink.get(2).unwrap().page_index, 1);
        assert!(!pipeline.fallback().has_cached_source());
        assert!(pipeline.scheduler().is_idle());
    }

    #[test]
    fn source_behind_a_flushed_gap_still_gets_a_page() {
        let mut pipeline = pipeline(Arc::new(MemoryFetcher::new()));
        pipeline.begin_document();
        pipeline.submit(
            SourceFile::new("b.png", "png", 1),
            SourceBytes::from_vec(sample_png(2, 2)),
        );
        assert_eq!(pipeline.drain().pages, 1);

        pipeline.submit(
            SourceFile::new("a.png", "png", 0),
            SourceBytes::from_vec(sample_png(3, 3)),
        );
        let report = pipeline.drain();
        assert_eq!(report.pages, 2);
        assert_eq!(report.decoded, 2);
        assert_eq!(pipeline.sink().len(), 2);
        assert_eq!(pipeline.sink().get(1).unwrap().file_index, 0);
    }

    #[test]
    fn unknown_extension_fails_one_page() {
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.insert("x.psd", vec![1, 2, 3]);
        let mut pipeline = pipeline(fetcher);
        let report = pipeline.load(vec![SourceFile::new("x.psd", "psd", 0)]);
        assert_eq!(report.pages, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(pipeline.sink().status(0), PageStatus::Failed);
    }
}
