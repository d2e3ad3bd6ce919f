// src/engine/worker.rs
//
// Worker decode engine: one per worker thread.
//
// State machine per job: Idle -> Processing -> {Emit | Fallback | Error} -> Idle.
// - Single-frame rasters are wrapped as blobs with the declared MIME.
// - TIFF pages go through PageDecoder one by one; a page that cannot be
//   produced here becomes a fallback descriptor without touching its siblings.
// - Once the raster surface turns out to be unavailable, the rest of the job
//   is deferred to the main thread.
// - The job's source bytes are released before the response is built.

use super::page::{DecodeSettings, PageDecode, PageDecoder};
use super::pool::JobHandler;
use crate::codecs::TiffDirectory;
use crate::model::{
    FallbackDescriptor, FallbackReason, JobTicket, PageOutcome, SourceFormat, WorkerJob,
    WorkerResponse, WorkerResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Processing,
    Emit,
    Fallback,
    Error,
}

/// Counts of completed jobs by terminal state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub emitted: u64,
    pub fallbacks: u64,
    pub errors: u64,
}

pub struct DecodeEngine {
    worker: usize,
    state: WorkerState,
    stats: EngineStats,
    decoder: PageDecoder,
}

impl DecodeEngine {
    pub fn new(worker: usize, settings: DecodeSettings) -> Self {
        Self {
            worker,
            state: WorkerState::Idle,
            stats: EngineStats::default(),
            decoder: PageDecoder::new(settings),
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn process(&mut self, job: WorkerJob) -> WorkerResponse {
        self.state = WorkerState::Processing;
        let WorkerJob { ticket, bytes } = job;
        tracing::trace!(
            worker = self.worker,
            job_id = ticket.id,
            pages = ticket.pages_involved,
            "job received"
        );

        let response = match (bytes, SourceFormat::from_extension(&ticket.file_extension)) {
            (None, _) => defer_all(&ticket, FallbackReason::SourceUnavailable(
                "job arrived without source bytes".to_string(),
            )),
            (Some(_), None) => defer_all(&ticket, FallbackReason::SourceUnavailable(format!(
                "unsupported extension '{}'",
                ticket.file_extension
            ))),
            (Some(bytes), Some(SourceFormat::SingleFrame(mime))) => {
                let page = ticket.page_ref(ticket.page_start_index);
                let decoded = self.decoder.decode_single_frame(mime, bytes.as_bytes());
                drop(bytes);
                let outcome = match decoded {
                    Ok(blob) => PageOutcome::Decoded(WorkerResult { blob, page }),
                    Err(e) => PageOutcome::Fallback(FallbackDescriptor::new(
                        page,
                        FallbackReason::DecodeFailed(e.to_string()),
                    )),
                };
                respond(&ticket, vec![outcome])
            }
            (Some(bytes), Some(SourceFormat::Tiff)) => {
                let response = self.process_tiff(&ticket, bytes.as_bytes());
                drop(bytes);
                response
            }
        };

        self.finish(&ticket, response)
    }

    fn process_tiff(&mut self, ticket: &JobTicket, data: &[u8]) -> WorkerResponse {
        // Codec module load: failure sends the whole batch to the main thread.
        if let Err(e) = self.decoder.ensure_codec() {
            return defer_all(ticket, FallbackReason::CodecUnavailable(e.to_string()));
        }

        // The scheduler parsed this header already; failing here is unexpected.
        let directory = match TiffDirectory::parse(data) {
            Ok(directory) => directory,
            Err(e) => {
                let error = e.to_string();
                return WorkerResponse::Error {
                    job_id: ticket.id,
                    jobs: ticket.fallback_descriptors(FallbackReason::WorkerError(error.clone())),
                    error,
                };
            }
        };

        let end = ticket.page_range().end.min(directory.page_count());
        let mut surface_missing = false;
        let mut outcomes = Vec::with_capacity(ticket.pages_involved);
        for page_index in ticket.page_start_index..end {
            let page = ticket.page_ref(page_index);
            if surface_missing {
                outcomes.push(PageOutcome::Fallback(FallbackDescriptor::new(
                    page,
                    FallbackReason::RasterSurfaceUnavailable,
                )));
                continue;
            }
            let outcome = match self.decoder.decode_tiff_page(data, &directory, page_index) {
                Ok(PageDecode::Blob(blob)) => PageOutcome::Decoded(WorkerResult { blob, page }),
                Ok(PageDecode::Fallback(reason)) => {
                    surface_missing = reason == FallbackReason::RasterSurfaceUnavailable;
                    PageOutcome::Fallback(FallbackDescriptor::new(page, reason))
                }
                Err(e) => {
                    tracing::debug!(
                        worker = self.worker,
                        page = page_index,
                        error = %e,
                        "page decode failed in worker"
                    );
                    PageOutcome::Fallback(FallbackDescriptor::new(
                        page,
                        FallbackReason::DecodeFailed(e.to_string()),
                    ))
                }
            };
            outcomes.push(outcome);
        }
        respond(ticket, outcomes)
    }

    fn finish(&mut self, ticket: &JobTicket, response: WorkerResponse) -> WorkerResponse {
        self.state = match &response {
            WorkerResponse::Success { .. } => WorkerState::Emit,
            WorkerResponse::Fallback { .. } => WorkerState::Fallback,
            WorkerResponse::Error { .. } => WorkerState::Error,
        };
        match self.state {
            WorkerState::Emit => self.stats.emitted += 1,
            WorkerState::Fallback => self.stats.fallbacks += 1,
            _ => self.stats.errors += 1,
        }
        tracing::debug!(
            worker = self.worker,
            job_id = ticket.id,
            state = ?self.state,
            "job finished"
        );
        self.state = WorkerState::Idle;
        response
    }
}

impl JobHandler for DecodeEngine {
    fn handle(&mut self, job: WorkerJob) -> WorkerResponse {
        self.process(job)
    }
}

fn defer_all(ticket: &JobTicket, reason: FallbackReason) -> WorkerResponse {
    WorkerResponse::Fallback {
        job_id: ticket.id,
        jobs: ticket.fallback_descriptors(reason),
        file_extension: ticket.file_extension.clone(),
    }
}

/// Success when at least one page produced a blob, else a whole-job fallback.
fn respond(ticket: &JobTicket, outcomes: Vec<PageOutcome>) -> WorkerResponse {
    if outcomes.iter().any(|o| o.blob().is_some()) {
        return WorkerResponse::Success {
            job_id: ticket.id,
            jobs: outcomes,
            file_extension: ticket.file_extension.clone(),
        };
    }
    WorkerResponse::Fallback {
        job_id: ticket.id,
        jobs: outcomes
            .into_iter()
            .filter_map(|o| match o {
                PageOutcome::Fallback(descriptor) => Some(descriptor),
                PageOutcome::Decoded(_) => None,
            })
            .collect(),
        file_extension: ticket.file_extension.clone(),
    }
}
