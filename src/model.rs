// src/model.rs
//
// Data model shared by the scheduler, the workers and the page assembler.
// These are cheap to move across channels - the only heavy payloads are
// `SourceBytes` (shared, read-only) and `Blob` (owned, moved once).

use crate::engine::SourceBytes;

/// Scheduler-assigned job identifier, unique for the lifetime of a pipeline.
pub type JobId = u64;

/// Document generation. Every job is stamped with the epoch current at creation;
/// results from an older epoch are discarded instead of inserted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epoch(pub u64);

impl Epoch {
    pub fn next(self) -> Self {
        Epoch(self.0.wrapping_add(1))
    }
}

/// MIME types a page blob can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Mime {
    Png,
    Jpeg,
    Webp,
    Gif,
    Bmp,
}

impl Mime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mime::Png => "image/png",
            Mime::Jpeg => "image/jpeg",
            Mime::Webp => "image/webp",
            Mime::Gif => "image/gif",
            Mime::Bmp => "image/bmp",
        }
    }
}

/// Tagged format dispatch, derived once from the declared extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceFormat {
    Tiff,
    SingleFrame(Mime),
}

impl SourceFormat {
    /// Accepts extensions with or without a leading dot, in any case.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let normalized = ext.trim().trim_start_matches('.').to_ascii_lowercase();
        match normalized.as_str() {
            "tif" | "tiff" => Some(SourceFormat::Tiff),
            "png" => Some(SourceFormat::SingleFrame(Mime::Png)),
            "jpg" | "jpeg" | "jpe" => Some(SourceFormat::SingleFrame(Mime::Jpeg)),
            "webp" => Some(SourceFormat::SingleFrame(Mime::Webp)),
            "gif" => Some(SourceFormat::SingleFrame(Mime::Gif)),
            "bmp" => Some(SourceFormat::SingleFrame(Mime::Bmp)),
            _ => None,
        }
    }

    pub fn is_multi_page(&self) -> bool {
        matches!(self, SourceFormat::Tiff)
    }
}

/// One document file as yielded by the source enumerator.
/// `file_index` is continuous 0..N-1 across the whole document set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceFile {
    pub url: String,
    pub ext: String,
    pub file_index: usize,
}

impl SourceFile {
    pub fn new(url: impl Into<String>, ext: impl Into<String>, file_index: usize) -> Self {
        Self {
            url: url.into(),
            ext: ext.into(),
            file_index,
        }
    }

    pub fn format(&self) -> Option<SourceFormat> {
        SourceFormat::from_extension(&self.ext)
    }
}

/// Identity of a single page: where it came from and where it goes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PageRef {
    pub file_index: usize,
    pub page_index: usize,
    pub all_pages_index: usize,
    pub file_extension: String,
    pub source_url: String,
    pub epoch: Epoch,
}

/// Job metadata without the byte payload. The scheduler keeps one of these per
/// in-flight job so it can account for the job even after the bytes moved away.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobTicket {
    pub id: JobId,
    pub epoch: Epoch,
    pub file_extension: String,
    pub file_index: usize,
    pub page_start_index: usize,
    pub pages_involved: usize,
    pub all_pages_starting_index: usize,
    pub source_url: String,
}

impl JobTicket {
    /// The page's global position comes from the index range reserved when the
    /// job was created; workers only ever read it back through here.
    pub fn page_ref(&self, page_index: usize) -> PageRef {
        PageRef {
            file_index: self.file_index,
            page_index,
            all_pages_index: self.all_pages_starting_index + page_index,
            file_extension: self.file_extension.clone(),
            source_url: self.source_url.clone(),
            epoch: self.epoch,
        }
    }

    pub fn page_range(&self) -> std::ops::Range<usize> {
        self.page_start_index..self.page_start_index + self.pages_involved
    }

    pub fn fallback_descriptors(&self, reason: FallbackReason) -> Vec<FallbackDescriptor> {
        self.page_range()
            .map(|page| FallbackDescriptor::new(self.page_ref(page), reason.clone()))
            .collect()
    }
}

/// A bounded page range of one source file, ready to be moved to a worker.
#[derive(Debug)]
pub struct WorkerJob {
    pub ticket: JobTicket,
    /// Released by the worker as soon as it is consumed; `None` afterwards.
    pub bytes: Option<SourceBytes>,
}

impl WorkerJob {
    pub fn id(&self) -> JobId {
        self.ticket.id
    }

    pub fn has_bytes(&self) -> bool {
        self.bytes.is_some()
    }

    pub fn take_bytes(&mut self) -> Option<SourceBytes> {
        self.bytes.take()
    }
}

/// An encoded page ready for display.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Blob {
    mime: Mime,
    bytes: Vec<u8>,
}

impl Blob {
    pub fn new(mime: Mime, bytes: Vec<u8>) -> Self {
        Self { mime, bytes }
    }

    pub fn mime(&self) -> Mime {
        self.mime
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerResult {
    pub blob: Blob,
    pub page: PageRef,
}

/// Why a page left the worker without a blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FallbackReason {
    /// Compression scheme the worker never decodes (JPEG2000).
    UnsupportedCompression(u16),
    RasterSurfaceUnavailable,
    EncoderUnavailable,
    /// The TIFF codec could not be loaded in this worker.
    CodecUnavailable(String),
    DecodeFailed(String),
    /// Unexpected failure while handling the job.
    WorkerError(String),
    WorkerTerminated,
    /// The source could not be fetched or identified on the main thread.
    SourceUnavailable(String),
}

/// A page the main thread has to decode. Carries no byte payload; the fallback
/// path re-fetches from `page.source_url`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FallbackDescriptor {
    pub page: PageRef,
    pub reason: FallbackReason,
}

impl FallbackDescriptor {
    pub fn new(page: PageRef, reason: FallbackReason) -> Self {
        Self { page, reason }
    }

    pub fn handle_in_main_thread(&self) -> bool {
        true
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PageOutcome {
    Decoded(WorkerResult),
    Fallback(FallbackDescriptor),
}

impl PageOutcome {
    pub fn page(&self) -> &PageRef {
        match self {
            PageOutcome::Decoded(result) => &result.page,
            PageOutcome::Fallback(descriptor) => &descriptor.page,
        }
    }

    pub fn blob(&self) -> Option<&Blob> {
        match self {
            PageOutcome::Decoded(result) => Some(&result.blob),
            PageOutcome::Fallback(_) => None,
        }
    }
}

/// Main thread -> worker.
#[derive(Debug)]
pub struct DispatchMessage {
    pub jobs: Vec<WorkerJob>,
    pub file_extension: String,
}

impl DispatchMessage {
    pub fn single(job: WorkerJob) -> Self {
        let file_extension = job.ticket.file_extension.clone();
        Self {
            jobs: vec![job],
            file_extension,
        }
    }

    pub fn tickets(&self) -> Vec<JobTicket> {
        self.jobs.iter().map(|job| job.ticket.clone()).collect()
    }
}

/// Worker -> main thread, one per job. None of the variants carry source bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkerResponse {
    /// Per-page outcomes; individual pages may still need the main thread.
    Success {
        job_id: JobId,
        jobs: Vec<PageOutcome>,
        file_extension: String,
    },
    /// The whole job must be handled on the main thread.
    Fallback {
        job_id: JobId,
        jobs: Vec<FallbackDescriptor>,
        file_extension: String,
    },
    /// Unexpected failure, reduced to a message and descriptors.
    Error {
        job_id: JobId,
        error: String,
        jobs: Vec<FallbackDescriptor>,
    },
}

impl WorkerResponse {
    pub fn job_id(&self) -> JobId {
        match self {
            WorkerResponse::Success { job_id, .. }
            | WorkerResponse::Fallback { job_id, .. }
            | WorkerResponse::Error { job_id, .. } => *job_id,
        }
    }

    pub fn handle_in_main_thread(&self) -> bool {
        !matches!(self, WorkerResponse::Success { .. })
    }

    pub fn into_outcomes(self) -> Vec<PageOutcome> {
        match self {
            WorkerResponse::Success { jobs, .. } => jobs,
            WorkerResponse::Fallback { jobs, .. } | WorkerResponse::Error { jobs, .. } => {
                jobs.into_iter().map(PageOutcome::Fallback).collect()
            }
        }
    }
}

/// Display state of a page: 0 pending, 1 ready, -1 failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PageStatus {
    Pending,
    Ready,
    Failed,
}

impl PageStatus {
    pub fn as_i8(&self) -> i8 {
        match self {
            PageStatus::Pending => 0,
            PageStatus::Ready => 1,
            PageStatus::Failed => -1,
        }
    }
}

/// What the page-state store receives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageEntry {
    pub full_size_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub status: PageStatus,
    pub file_extension: String,
    pub file_index: usize,
    pub page_index: usize,
    pub all_pages_index: usize,
}

impl PageEntry {
    pub fn ready(page: &PageRef, url: String) -> Self {
        Self {
            thumbnail_url: Some(url.clone()),
            full_size_url: Some(url),
            status: PageStatus::Ready,
            file_extension: page.file_extension.clone(),
            file_index: page.file_index,
            page_index: page.page_index,
            all_pages_index: page.all_pages_index,
        }
    }

    pub fn failed(page: &PageRef) -> Self {
        Self {
            full_size_url: None,
            thumbnail_url: None,
            status: PageStatus::Failed,
            file_extension: page.file_extension.clone(),
            file_index: page.file_index,
            page_index: page.page_index,
            all_pages_index: page.all_pages_index,
        }
    }
}
