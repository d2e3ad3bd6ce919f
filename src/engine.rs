// src/engine.rs
//
// The core of pagefeed. A page decode pipeline that:
// 1. Splits document sources into page-range jobs, in file order
// 2. Decodes and re-encodes pages on a fixed pool of worker threads
// 3. Falls back to the main thread for pages a worker could not produce
// 4. Publishes every page at its pre-assigned global index
//
// This file is a facade over the modules in engine/

// =============================================================================
// SECURITY LIMITS
// =============================================================================

/// Maximum allowed page dimension (width or height).
/// Pages larger than 32768x32768 are rejected to prevent decompression bombs.
pub const MAX_DIMENSION: u32 = 32768;

/// Maximum allowed total pixels (width * height).
/// 100 megapixels = 400MB of RGBA per worker surface.
pub const MAX_PIXELS: u64 = 100_000_000;

// =============================================================================
// MODULE DECOMPOSITION
// =============================================================================

mod assembler;
mod common;
mod config;
mod fallback;
mod memory;
mod page;
mod pipeline;
mod pool;
mod scheduler;
mod source;
mod worker;

pub use assembler::{AssemblyStats, BlobUrls, MemorySink, PageAssembler, PageSink, Placement};
pub use common::{check_dimensions, run_with_panic_policy};
pub use config::{
    default_pool_size, Capabilities, DispatchPolicy, PipelineConfig, DEFAULT_INFLIGHT_PER_WORKER,
    DEFAULT_MAX_JOB_BYTES, DEFAULT_PAGES_PER_JOB, MAX_WORKERS, MIN_WORKERS,
};
pub use fallback::FallbackDecoder;
pub use memory::{JobPermit, JobPermits};
pub use page::{DecodeContext, DecodeSettings, PageDecode, PageDecoder};
pub use pipeline::{LoadReport, Pipeline};
pub use pool::{HandlerFactory, JobHandler, WorkerCommand, WorkerEvent, WorkerPool};
pub use scheduler::{chunk_pages, Dispatch, JobScheduler};
pub use source::{ByteFetcher, FileFetcher, MemoryFetcher, SourceBytes};
pub use worker::{DecodeEngine, EngineStats, WorkerState};
