// src/engine/memory.rs
//
// In-flight job permits for byte-buffer backpressure.
//
// Every dispatched job holds one permit for as long as it (and its source
// bytes) are outside the scheduler. Capacity is pool size x inflight-per-worker,
// so at most that many source buffers are pinned by workers at any time and the
// rest wait in the scheduler's pending queue or are not fetched yet.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// Counting semaphore over in-flight jobs.
#[derive(Debug)]
pub struct JobPermits {
    capacity: usize,
    state: Mutex<usize>, // available permits
    cvar: Condvar,
}

/// Released on drop, so every exit path of a job gives its slot back.
#[derive(Debug)]
pub struct JobPermit {
    permits: Arc<JobPermits>,
}

impl JobPermits {
    pub fn new(capacity: usize) -> Self {
        // A zero-capacity pool would never make progress.
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(capacity),
            cvar: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        *self.state.lock()
    }

    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }

    /// Take a permit if one is free. Never blocks; the main thread uses this.
    pub fn try_acquire(self: &Arc<Self>) -> Option<JobPermit> {
        let mut available = self.state.lock();
        if *available == 0 {
            return None;
        }
        *available -= 1;
        Some(JobPermit {
            permits: Arc::clone(self),
        })
    }

    /// Block until a permit is free. The pipeline itself only polls with
    /// `try_acquire`; this is for hosts that submit from a thread of their own.
    pub fn acquire(self: &Arc<Self>) -> JobPermit {
        let mut available = self.state.lock();
        while *available == 0 {
            self.cvar.wait(&mut available);
        }
        *available -= 1;
        JobPermit {
            permits: Arc::clone(self),
        }
    }

    fn release(&self) {
        let mut available = self.state.lock();
        *available = (*available + 1).min(self.capacity);
        self.cvar.notify_one();
    }
}

impl Drop for JobPermit {
    fn drop(&mut self) {
        self.permits.release();
    }
}
