// src/engine/pool.rs
//
// Fixed-size pool of decode worker threads.
//
// **Architecture**:
// - Each worker is an OS thread running its own message loop over a private
//   command channel; all workers report on one shared event channel.
// - Job handlers are built inside the worker thread by a factory, so their
//   per-thread state (codec handle, raster surface) never crosses threads.
// - A panic escaping a job is caught, reported as an Error response for that
//   job, and the worker exits. An exit guard reports every termination, so the
//   scheduler learns about abnormal exits even when the guard is the only code
//   that still runs.
// - Sending to a worker whose channel is closed hands the message back to the
//   caller together with its bytes.
// - Dropping the pool shuts every worker down and joins it.

use super::common::panic_message;
use crate::error::{PipelineError, Result};
use crate::model::{DispatchMessage, FallbackReason, WorkerJob, WorkerResponse};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Per-thread job processor. Called once per job, on the worker thread.
pub trait JobHandler {
    fn handle(&mut self, job: WorkerJob) -> WorkerResponse;
}

/// Builds the handler for worker `id`, on that worker's thread.
pub type HandlerFactory = Arc<dyn Fn(usize) -> Box<dyn JobHandler> + Send + Sync>;

#[derive(Debug)]
pub enum WorkerCommand {
    Decode(DispatchMessage),
    Shutdown,
}

#[derive(Debug)]
pub enum WorkerEvent {
    Response {
        worker: usize,
        response: WorkerResponse,
    },
    Exited {
        worker: usize,
        abnormal: bool,
    },
}

struct WorkerSlot {
    sender: Sender<WorkerCommand>,
    handle: Option<JoinHandle<()>>,
}

pub struct WorkerPool {
    slots: Vec<WorkerSlot>,
    events_tx: Sender<WorkerEvent>,
    events_rx: Receiver<WorkerEvent>,
    factory: HandlerFactory,
}

/// Reports the worker's exit when dropped, whatever the reason.
struct ExitGuard {
    worker: usize,
    events: Sender<WorkerEvent>,
    abnormal: bool,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if self.abnormal {
            tracing::warn!(worker = self.worker, "decode worker terminated abnormally");
        }
        let _ = self.events.send(WorkerEvent::Exited {
            worker: self.worker,
            abnormal: self.abnormal,
        });
    }
}

fn worker_loop(
    worker: usize,
    commands: Receiver<WorkerCommand>,
    events: Sender<WorkerEvent>,
    factory: HandlerFactory,
) {
    let mut guard = ExitGuard {
        worker,
        events: events.clone(),
        abnormal: true,
    };
    // Declared after the guard so the channel closes before the exit is reported.
    let commands = commands;
    let mut handler = factory(worker);
    tracing::trace!(worker, "decode worker started");

    while let Ok(command) = commands.recv() {
        let message = match command {
            WorkerCommand::Decode(message) => message,
            WorkerCommand::Shutdown => break,
        };
        for job in message.jobs {
            let ticket = job.ticket.clone();
            match catch_unwind(AssertUnwindSafe(|| handler.handle(job))) {
                Ok(response) => {
                    if events.send(WorkerEvent::Response { worker, response }).is_err() {
                        // Pool is gone; nobody is listening.
                        guard.abnormal = false;
                        return;
                    }
                }
                Err(payload) => {
                    let error = panic_message(payload.as_ref());
                    tracing::warn!(worker, job_id = ticket.id, %error, "decode job panicked");
                    let _ = events.send(WorkerEvent::Response {
                        worker,
                        response: WorkerResponse::Error {
                            job_id: ticket.id,
                            jobs: ticket.fallback_descriptors(FallbackReason::WorkerError(
                                error.clone(),
                            )),
                            error,
                        },
                    });
                    // Handler state may be poisoned; let the pool replace this worker.
                    return;
                }
            }
        }
    }
    guard.abnormal = false;
}

impl WorkerPool {
    pub fn new(size: usize, factory: HandlerFactory) -> Result<Self> {
        if size == 0 {
            return Err(PipelineError::invalid_argument(
                "workers",
                "0",
                "pool needs at least one worker",
            ));
        }
        let (events_tx, events_rx) = mpsc::channel();
        let mut pool = Self {
            slots: Vec::with_capacity(size),
            events_tx,
            events_rx,
            factory,
        };
        for worker in 0..size {
            let slot = pool.spawn(worker)?;
            pool.slots.push(slot);
        }
        tracing::debug!(workers = size, "decode worker pool started");
        Ok(pool)
    }

    fn spawn(&self, worker: usize) -> Result<WorkerSlot> {
        let (sender, commands) = mpsc::channel();
        let events = self.events_tx.clone();
        let factory = Arc::clone(&self.factory);
        let handle = std::thread::Builder::new()
            .name(format!("pagefeed-worker-{worker}"))
            .spawn(move || worker_loop(worker, commands, events, factory))
            .map_err(|e| PipelineError::generic(format!("failed to spawn worker {worker}: {e}")))?;
        Ok(WorkerSlot {
            sender,
            handle: Some(handle),
        })
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Hand a message to a worker. On a closed channel the message comes back.
    pub fn send(
        &self,
        worker: usize,
        message: DispatchMessage,
    ) -> std::result::Result<(), DispatchMessage> {
        let Some(slot) = self.slots.get(worker) else {
            return Err(message);
        };
        slot.sender
            .send(WorkerCommand::Decode(message))
            .map_err(|mpsc::SendError(command)| match command {
                WorkerCommand::Decode(message) => message,
                // Only Decode commands are sent here.
                WorkerCommand::Shutdown => unreachable!("shutdown is never sent through send()"),
            })
    }

    /// Replace an exited worker with a fresh thread.
    pub fn respawn(&mut self, worker: usize) -> Result<()> {
        if worker >= self.slots.len() {
            return Err(PipelineError::invalid_argument(
                "worker",
                worker.to_string(),
                "no such worker slot",
            ));
        }
        let slot = self.spawn(worker)?;
        let old = std::mem::replace(&mut self.slots[worker], slot);
        if let Some(handle) = old.handle {
            // The old thread has already reported its exit.
            let _ = handle.join();
        }
        tracing::info!(worker, "decode worker respawned");
        Ok(())
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<WorkerEvent> {
        match self.events_rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_recv(&self) -> Option<WorkerEvent> {
        self.events_rx.try_recv().ok()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for slot in &self.slots {
            let _ = slot.sender.send(WorkerCommand::Shutdown);
        }
        for slot in &mut self.slots {
            if let Some(handle) = slot.handle.take() {
                let _ = handle.join();
            }
        }
    }
}
