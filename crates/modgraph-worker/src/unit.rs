use crate::errors::panic_failure;
use crate::routing::RouteTarget;
use crate::worker::Worker;
use crossbeam_channel::{unbounded, Sender};
use modgraph_core::{ModGraphError, Result, TransformFailure, TransformOptions, TransformedFile};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, trace};

pub(crate) type TransformReply = std::result::Result<TransformedFile, TransformFailure>;

pub(crate) enum Job {
    Transform {
        path: String,
        options: TransformOptions,
        reply: oneshot::Sender<TransformReply>,
    },
    Ping {
        reply: oneshot::Sender<usize>,
    },
}

/// One persistent execution unit: a dedicated thread draining its own queue.
pub struct WorkerUnit {
    id: usize,
    sender: Mutex<Option<Sender<Job>>>,
    pending: Arc<AtomicUsize>,
    completed: Arc<AtomicU64>,
}

impl WorkerUnit {
    pub(crate) fn spawn(id: usize, worker: Arc<Worker>) -> Result<Self> {
        let (tx, rx) = unbounded::<Job>();
        let pending = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicU64::new(0));

        {
            let pending = pending.clone();
            let completed = completed.clone();
            std::thread::Builder::new()
                .name(format!("modgraph-worker-{}", id))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        match job {
                            Job::Transform {
                                path,
                                options,
                                reply,
                            } => {
                                let outcome =
                                    catch_unwind(AssertUnwindSafe(|| worker.transform(&path, &options)))
                                        .unwrap_or_else(|payload| Err(panic_failure(payload)));
                                // the caller may have stopped waiting
                                let _ = reply.send(outcome);
                            }
                            Job::Ping { reply } => {
                                let _ = reply.send(id);
                            }
                        }
                        pending.fetch_sub(1, Ordering::AcqRel);
                        completed.fetch_add(1, Ordering::Relaxed);
                    }
                    trace!("worker unit {} exiting", id);
                })?;
        }

        debug!("Started worker unit {}", id);
        Ok(Self {
            id,
            sender: Mutex::new(Some(tx)),
            pending,
            completed,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub(crate) fn dispatch(&self, job: Job) -> Result<()> {
        let guard = self.sender.lock();
        let sender = guard
            .as_ref()
            .ok_or_else(|| ModGraphError::Worker(format!("worker unit {} is shut down", self.id)))?;
        self.pending.fetch_add(1, Ordering::AcqRel);
        sender.send(job).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            ModGraphError::Worker(format!("worker unit {} is gone", self.id))
        })
    }

    /// Close the queue; already queued jobs still run to completion.
    pub(crate) fn shutdown(&self) {
        self.sender.lock().take();
    }
}

impl RouteTarget for WorkerUnit {
    fn route_id(&self) -> u64 {
        self.id as u64
    }

    fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}
