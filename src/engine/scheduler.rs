// src/engine/scheduler.rs
//
// Job scheduler: turns fetched sources into bounded jobs and feeds the pool.
//
// - Sources are admitted strictly in file_index order, so every page gets the
//   same allPagesIndex no matter in which order fetches complete.
// - TIFF sources are split into chunks bounded by page count and by the sum of
//   their pages' strip byte counts. Chunks share the source buffer read-only.
// - Sources that cannot be identified or fetched reserve one page index and go
//   straight to the fallback decoder.
// - At most `capacity` jobs are outside the scheduler at once; the rest wait
//   in the pending queue holding their bytes.
// - Every dispatched job is tracked until its response arrives or its worker
//   exits, so no job can be lost.

use super::config::{DispatchPolicy, PipelineConfig};
use super::memory::{JobPermit, JobPermits};
use super::pool::WorkerPool;
use super::source::SourceBytes;
use crate::codecs::TiffDirectory;
use crate::error::PipelineError;
use crate::model::{
    DispatchMessage, Epoch, FallbackReason, JobId, JobTicket, PageOutcome, SourceFile,
    SourceFormat, WorkerJob, WorkerResponse,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::ops::Range;
use std::sync::Arc;

/// Where jobs go. Implemented by the worker pool; tests substitute their own.
pub trait Dispatch {
    /// Deliver a message, or hand it back when the worker cannot take it.
    fn send(&self, worker: usize, message: DispatchMessage) -> Result<(), DispatchMessage>;
}

impl Dispatch for WorkerPool {
    fn send(&self, worker: usize, message: DispatchMessage) -> Result<(), DispatchMessage> {
        WorkerPool::send(self, worker, message)
    }
}

/// Cut a page sequence into job ranges. A chunk closes when it already holds
/// `pages_per_job` pages or when the next page would push it past
/// `max_job_bytes`; a single oversized page still forms its own chunk.
pub fn chunk_pages(weights: &[u64], pages_per_job: usize, max_job_bytes: u64) -> Vec<Range<usize>> {
    let pages_per_job = pages_per_job.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut bytes = 0u64;
    for (page, &weight) in weights.iter().enumerate() {
        let full = page - start == pages_per_job;
        let heavy = bytes.saturating_add(weight) > max_job_bytes;
        if page > start && (full || heavy) {
            chunks.push(start..page);
            start = page;
            bytes = 0;
        }
        bytes = bytes.saturating_add(weight);
    }
    if weights.len() > start {
        chunks.push(start..weights.len());
    }
    chunks
}

struct InFlight {
    ticket: JobTicket,
    worker: usize,
    _permit: JobPermit,
}

pub struct JobScheduler {
    policy: DispatchPolicy,
    pages_per_job: usize,
    max_job_bytes: u64,
    permits: Arc<JobPermits>,
    epoch: Epoch,
    next_job_id: JobId,
    next_file_index: usize,
    next_all_pages_index: usize,
    admitted: HashSet<usize>,
    /// Sources that arrived ahead of a missing file_index.
    waiting: BTreeMap<usize, (SourceFile, Result<SourceBytes, PipelineError>)>,
    pending: VecDeque<WorkerJob>,
    in_flight: HashMap<JobId, InFlight>,
    load: Vec<usize>,
    closed: Vec<bool>,
    cursor: usize,
}

impl JobScheduler {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            policy: config.dispatch_policy,
            pages_per_job: config.pages_per_job,
            max_job_bytes: config.max_job_bytes,
            permits: Arc::new(JobPermits::new(config.max_in_flight())),
            epoch: Epoch::default(),
            next_job_id: 0,
            next_file_index: 0,
            next_all_pages_index: 0,
            admitted: HashSet::new(),
            waiting: BTreeMap::new(),
            pending: VecDeque::new(),
            in_flight: HashMap::new(),
            load: vec![0; config.workers],
            closed: vec![false; config.workers],
            cursor: 0,
        }
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Start a new document. Queued work of the old epoch is dropped; jobs
    /// already on a worker run to completion and are discarded on arrival.
    pub fn begin_epoch(&mut self, epoch: Epoch) {
        let dropped = self.pending.len() + self.waiting.len();
        if dropped > 0 {
            tracing::debug!(dropped, old = self.epoch.0, new = epoch.0, "dropping queued work of old document");
        }
        self.pending.clear();
        self.waiting.clear();
        self.admitted.clear();
        self.epoch = epoch;
        self.next_file_index = 0;
        self.next_all_pages_index = 0;
    }

    /// Page indices reserved so far in this epoch.
    pub fn reserved_pages(&self) -> usize {
        self.next_all_pages_index
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    pub fn permits(&self) -> &Arc<JobPermits> {
        &self.permits
    }

    /// Queued jobs that still hold their source bytes.
    pub fn retained_buffers(&self) -> usize {
        self.pending.iter().filter(|job| job.has_bytes()).count()
    }

    /// True while jobs are waiting for an in-flight slot.
    pub fn is_saturated(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_empty() && self.waiting.is_empty()
    }

    /// Accept a fetched (or failed) source. Returns pages that must go straight
    /// to the fallback decoder.
    pub fn submit(
        &mut self,
        source: SourceFile,
        bytes: Result<SourceBytes, PipelineError>,
        dispatch: &impl Dispatch,
    ) -> Vec<PageOutcome> {
        if self.admitted.contains(&source.file_index) || self.waiting.contains_key(&source.file_index) {
            tracing::warn!(file_index = source.file_index, url = %source.url, "source submitted twice, ignoring");
            return Vec::new();
        }
        let mut outcomes = Vec::new();
        if source.file_index < self.next_file_index {
            // Its gap was already flushed; its pages go after everything reserved so far.
            tracing::warn!(
                file_index = source.file_index,
                reserved = self.next_all_pages_index,
                "source arrived after its gap was flushed, appending"
            );
            outcomes.extend(self.admit(source, bytes));
            self.dispatch_pending(dispatch);
            return outcomes;
        }
        self.waiting.insert(source.file_index, (source, bytes));

        while let Some((source, bytes)) = self.waiting.remove(&self.next_file_index) {
            outcomes.extend(self.admit(source, bytes));
        }
        self.dispatch_pending(dispatch);
        outcomes
    }

    /// Admit everything still waiting for a gap that never filled.
    pub fn flush_waiting(&mut self, dispatch: &impl Dispatch) -> Vec<PageOutcome> {
        let mut outcomes = Vec::new();
        while let Some((file_index, (source, bytes))) = self.waiting.pop_first() {
            tracing::warn!(
                expected = self.next_file_index,
                file_index,
                "file index gap never filled, admitting out of order"
            );
            outcomes.extend(self.admit(source, bytes));
        }
        self.dispatch_pending(dispatch);
        outcomes
    }

    fn next_ticket(&mut self, source: &SourceFile, pages: Range<usize>, base: usize) -> JobTicket {
        let id = self.next_job_id;
        self.next_job_id += 1;
        JobTicket {
            id,
            epoch: self.epoch,
            file_extension: source.ext.clone(),
            file_index: source.file_index,
            page_start_index: pages.start,
            pages_involved: pages.len(),
            all_pages_starting_index: base,
            source_url: source.url.clone(),
        }
    }

    fn reserve(&mut self, pages: usize) -> usize {
        let base = self.next_all_pages_index;
        self.next_all_pages_index += pages;
        base
    }

    /// Reserve one index and send the source straight to the fallback decoder.
    fn defer_source(&mut self, source: &SourceFile, reason: String) -> Vec<PageOutcome> {
        tracing::debug!(file_index = source.file_index, url = %source.url, %reason, "source routed to fallback");
        let base = self.reserve(1);
        let ticket = self.next_ticket(source, 0..1, base);
        ticket
            .fallback_descriptors(FallbackReason::SourceUnavailable(reason))
            .into_iter()
            .map(PageOutcome::Fallback)
            .collect()
    }

    fn admit(
        &mut self,
        source: SourceFile,
        bytes: Result<SourceBytes, PipelineError>,
    ) -> Vec<PageOutcome> {
        self.next_file_index = self.next_file_index.max(source.file_index + 1);
        self.admitted.insert(source.file_index);

        let bytes = match bytes {
            Ok(bytes) => bytes,
            Err(e) => return self.defer_source(&source, e.to_string()),
        };
        let Some(format) = source.format() else {
            let reason = PipelineError::unsupported_format(source.ext.clone()).to_string();
            return self.defer_source(&source, reason);
        };

        let chunks = match format {
            SourceFormat::SingleFrame(_) => vec![0..1],
            SourceFormat::Tiff => match page_weights(bytes.as_bytes()) {
                Ok(weights) => chunk_pages(&weights, self.pages_per_job, self.max_job_bytes),
                Err(e) => return self.defer_source(&source, e.to_string()),
            },
        };

        let pages = chunks.last().map(|c| c.end).unwrap_or(0);
        let base = self.reserve(pages);
        for chunk in chunks {
            let ticket = self.next_ticket(&source, chunk, base);
            tracing::debug!(
                job_id = ticket.id,
                file_index = ticket.file_index,
                pages = ?ticket.page_range(),
                all_pages_starting_index = base,
                "job created"
            );
            self.pending.push_back(WorkerJob {
                ticket,
                bytes: Some(bytes.clone()),
            });
        }
        Vec::new()
    }

    fn choose_worker(&mut self) -> Option<usize> {
        let open = |w: &usize| !self.closed[*w];
        match self.policy {
            DispatchPolicy::LeastLoaded => (0..self.load.len())
                .filter(open)
                .min_by_key(|&w| (self.load[w], w)),
            DispatchPolicy::RoundRobin => {
                let n = self.load.len();
                let worker = (0..n).map(|i| (self.cursor + i) % n).find(open)?;
                self.cursor = (worker + 1) % n;
                Some(worker)
            }
        }
    }

    /// Move queued jobs to workers while in-flight slots are free.
    pub fn dispatch_pending(&mut self, dispatch: &impl Dispatch) {
        while !self.pending.is_empty() {
            let Some(permit) = self.permits.try_acquire() else {
                break;
            };
            let Some(job) = self.pending.pop_front() else {
                break;
            };
            let ticket = job.ticket.clone();
            let mut message = DispatchMessage::single(job);
            loop {
                let Some(worker) = self.choose_worker() else {
                    // Every worker is down; keep the job until one is back.
                    for job in message.jobs.into_iter().rev() {
                        self.pending.push_front(job);
                    }
                    return;
                };
                match dispatch.send(worker, message) {
                    Ok(()) => {
                        tracing::trace!(job_id = ticket.id, worker, "job dispatched");
                        self.load[worker] += 1;
                        self.in_flight.insert(
                            ticket.id,
                            InFlight {
                                ticket,
                                worker,
                                _permit: permit,
                            },
                        );
                        break;
                    }
                    Err(returned) => {
                        tracing::warn!(job_id = ticket.id, worker, "worker channel closed, requeueing job");
                        self.closed[worker] = true;
                        message = returned;
                    }
                }
            }
        }
    }

    fn forget(&mut self, job_id: JobId) -> Option<JobTicket> {
        let entry = self.in_flight.remove(&job_id)?;
        self.load[entry.worker] = self.load[entry.worker].saturating_sub(1);
        Some(entry.ticket)
    }

    /// Account for a worker response and hand back its page outcomes.
    pub fn settle(&mut self, response: WorkerResponse) -> Vec<PageOutcome> {
        let job_id = response.job_id();
        if self.forget(job_id).is_none() {
            tracing::warn!(job_id, "response for an untracked job");
        }
        if let WorkerResponse::Error { error, .. } = &response {
            tracing::warn!(job_id, %error, "job failed in worker");
        }
        response.into_outcomes()
    }

    /// A worker is gone. Its unanswered jobs go to the fallback decoder.
    pub fn worker_exited(&mut self, worker: usize) -> Vec<PageOutcome> {
        if let Some(closed) = self.closed.get_mut(worker) {
            *closed = true;
        }
        let orphaned: Vec<JobId> = self
            .in_flight
            .iter()
            .filter(|(_, entry)| entry.worker == worker)
            .map(|(id, _)| *id)
            .collect();
        let mut outcomes = Vec::new();
        for job_id in orphaned {
            if let Some(ticket) = self.forget(job_id) {
                tracing::warn!(job_id, worker, "job lost with its worker, routing to fallback");
                outcomes.extend(
                    ticket
                        .fallback_descriptors(FallbackReason::WorkerTerminated)
                        .into_iter()
                        .map(PageOutcome::Fallback),
                );
            }
        }
        outcomes
    }

    pub fn worker_restarted(&mut self, worker: usize) {
        if let Some(closed) = self.closed.get_mut(worker) {
            *closed = false;
        }
    }

    pub fn open_workers(&self) -> usize {
        self.closed.iter().filter(|c| !**c).count()
    }

    /// Give up on queued jobs (no worker left to run them).
    pub fn abandon_pending(&mut self) -> Vec<PageOutcome> {
        self.pending
            .drain(..)
            .flat_map(|job| job.ticket.fallback_descriptors(FallbackReason::WorkerTerminated))
            .map(PageOutcome::Fallback)
            .collect()
    }
}

/// Per-page weight (sum of strip byte counts) of every page in a TIFF.
fn page_weights(data: &[u8]) -> crate::error::Result<Vec<u64>> {
    let directory = TiffDirectory::parse(data)?;
    Ok((0..directory.page_count())
        .map(|page| {
            directory
                .read_ifd(data, page)
                .map(|ifd| ifd.strip_bytes_total())
                .unwrap_or(0)
        })
        .collect())
}
