// src/engine/config.rs
//
// Pipeline configuration: pool sizing, backpressure, chunking, encoding and
// worker capability contracts.
//
// **Pool size**:
// - Uses std::thread::available_parallelism() to respect cgroup/CPU quota
// - Reserves one thread for the main (UI) thread
// - Clamped to [MIN_WORKERS, MAX_WORKERS]
// - PAGEFEED_WORKERS overrides detection
//
// Environment overrides are read by `from_env()` only; `Default` never looks
// at the environment.

use crate::error::{PipelineError, Result};
use bitflags::bitflags;

pub const MIN_WORKERS: usize = 1;
pub const MAX_WORKERS: usize = 16;

/// Main-thread reserve subtracted from detected parallelism.
const RESERVED_MAIN_THREADS: usize = 1;

pub const DEFAULT_INFLIGHT_PER_WORKER: usize = 2;
pub const DEFAULT_PAGES_PER_JOB: usize = 8;
pub const DEFAULT_MAX_JOB_BYTES: u64 = 32 * 1024 * 1024;
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

bitflags! {
    /// What an execution context can do. Workers may lack some of these;
    /// the main-thread fallback always has all of them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        const TIFF_CODEC = 1 << 0;
        const RASTER_SURFACE = 1 << 1;
        const PNG_ENCODER = 1 << 2;
        const JPEG_ENCODER = 1 << 3;
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Capabilities::all()
    }
}

/// How the scheduler picks a worker for the next job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchPolicy {
    /// Fewest jobs in flight; ties go to the lowest worker id.
    #[default]
    LeastLoaded,
    RoundRobin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub workers: usize,
    pub inflight_per_worker: usize,
    pub pages_per_job: usize,
    /// Upper bound on the strip bytes a single job decodes. Chunks of one file
    /// share its buffer, so this caps work per job, not the bytes a job keeps alive.
    pub max_job_bytes: u64,
    pub dispatch_policy: DispatchPolicy,
    pub jpeg_quality: u8,
    /// oxipng preset level (0-6); `None` keeps the plain PNG encoder output.
    pub png_optimization: Option<u8>,
    pub worker_capabilities: Capabilities,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_pool_size(),
            inflight_per_worker: DEFAULT_INFLIGHT_PER_WORKER,
            pages_per_job: DEFAULT_PAGES_PER_JOB,
            max_job_bytes: DEFAULT_MAX_JOB_BYTES,
            dispatch_policy: DispatchPolicy::default(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            png_optimization: None,
            worker_capabilities: Capabilities::all(),
        }
    }
}

/// Pool size from hardware concurrency, minus the main thread.
pub fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(MIN_WORKERS + RESERVED_MAIN_THREADS)
        .saturating_sub(RESERVED_MAIN_THREADS)
        .clamp(MIN_WORKERS, MAX_WORKERS)
}

fn env_value<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            PipelineError::invalid_argument(name, raw, "expected a non-negative integer")
        }),
        Err(_) => Ok(None),
    }
}

impl PipelineConfig {
    /// Defaults with `PAGEFEED_*` environment overrides applied, then validated.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(workers) = env_value("PAGEFEED_WORKERS")? {
            config.workers = workers;
        }
        if let Some(inflight) = env_value("PAGEFEED_INFLIGHT_PER_WORKER")? {
            config.inflight_per_worker = inflight;
        }
        if let Some(pages) = env_value("PAGEFEED_PAGES_PER_JOB")? {
            config.pages_per_job = pages;
        }
        if let Some(bytes) = env_value("PAGEFEED_MAX_JOB_BYTES")? {
            config.max_job_bytes = bytes;
        }
        if let Some(quality) = env_value("PAGEFEED_JPEG_QUALITY")? {
            config.jpeg_quality = quality;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_inflight_per_worker(mut self, inflight: usize) -> Self {
        self.inflight_per_worker = inflight;
        self
    }

    pub fn with_pages_per_job(mut self, pages: usize) -> Self {
        self.pages_per_job = pages;
        self
    }

    pub fn with_max_job_bytes(mut self, bytes: u64) -> Self {
        self.max_job_bytes = bytes;
        self
    }

    pub fn with_dispatch_policy(mut self, policy: DispatchPolicy) -> Self {
        self.dispatch_policy = policy;
        self
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }

    pub fn with_png_optimization(mut self, level: Option<u8>) -> Self {
        self.png_optimization = level;
        self
    }

    pub fn with_worker_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.worker_capabilities = capabilities;
        self
    }

    /// Maximum number of jobs holding source bytes outside the scheduler.
    pub fn max_in_flight(&self) -> usize {
        self.workers.saturating_mul(self.inflight_per_worker)
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&self.workers) {
            return Err(PipelineError::invalid_argument(
                "workers",
                self.workers.to_string(),
                format!("must be between {MIN_WORKERS} and {MAX_WORKERS}"),
            ));
        }
        if self.inflight_per_worker == 0 {
            return Err(PipelineError::invalid_argument(
                "inflight_per_worker",
                "0",
                "must be at least 1",
            ));
        }
        if self.pages_per_job == 0 {
            return Err(PipelineError::invalid_argument(
                "pages_per_job",
                "0",
                "must be at least 1",
            ));
        }
        if self.max_job_bytes == 0 {
            return Err(PipelineError::invalid_argument(
                "max_job_bytes",
                "0",
                "must be at least 1",
            ));
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(PipelineError::invalid_argument(
                "jpeg_quality",
                self.jpeg_quality.to_string(),
                "must be between 1 and 100",
            ));
        }
        if let Some(level) = self.png_optimization {
            if level > 6 {
                return Err(PipelineError::invalid_argument(
                    "png_optimization",
                    level.to_string(),
                    "oxipng presets range from 0 to 6",
                ));
            }
        }
        Ok(())
    }
}
