use crate::errors::{format_transform_failure, panic_failure};
use crate::routing::{pick_by_key, pick_least_pending};
use crate::unit::{Job, TransformReply, WorkerUnit};
use crate::worker::Worker;
use modgraph_core::{
    ModGraphConfig, ModGraphError, Result, TransformOptions, TransformedFile, Transformer,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct WorkerFarmConfig {
    /// 1 (or 0) keeps transforms in-process
    pub max_workers: usize,
    pub project_root: PathBuf,
}

impl WorkerFarmConfig {
    pub fn from_config(config: &ModGraphConfig) -> Self {
        Self {
            max_workers: config.workers.max_workers,
            project_root: config.project_root.clone(),
        }
    }

    pub fn in_process(project_root: impl Into<PathBuf>) -> Self {
        Self {
            max_workers: 1,
            project_root: project_root.into(),
        }
    }
}

impl Default for WorkerFarmConfig {
    fn default() -> Self {
        Self {
            max_workers: num_cpus::get().max(1),
            project_root: PathBuf::from("."),
        }
    }
}

/// Runs the transformer off the coordinating task, either in-process on the
/// blocking pool or on a fixed pool of persistent units.
pub struct WorkerFarm {
    worker: Arc<Worker>,
    units: Vec<WorkerUnit>,
    killed: AtomicBool,
    transforms: AtomicU64,
}

impl WorkerFarm {
    pub fn new(transformer: Arc<dyn Transformer>, config: WorkerFarmConfig) -> Result<Self> {
        let worker = Arc::new(Worker::new(transformer, config.project_root));
        let units = if config.max_workers > 1 {
            (0..config.max_workers)
                .map(|id| WorkerUnit::spawn(id, worker.clone()))
                .collect::<Result<Vec<_>>>()?
        } else {
            Vec::new()
        };

        info!(
            "Worker farm ready: {}",
            if units.is_empty() {
                "in-process".to_string()
            } else {
                format!("{} units", units.len())
            }
        );

        Ok(Self {
            worker,
            units,
            killed: AtomicBool::new(false),
            transforms: AtomicU64::new(0),
        })
    }

    pub fn is_in_process(&self) -> bool {
        self.units.is_empty()
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Number of transforms dispatched so far.
    pub fn transform_count(&self) -> u64 {
        self.transforms.load(Ordering::Relaxed)
    }

    /// Unit a path is routed to, `None` when running in-process.
    pub fn unit_for(&self, path: &str) -> Option<usize> {
        pick_by_key(&self.units, path.as_bytes()).map(WorkerUnit::id)
    }

    pub async fn transform(&self, path: &str, options: &TransformOptions) -> Result<TransformedFile> {
        self.ensure_alive()?;
        self.transforms.fetch_add(1, Ordering::Relaxed);

        let reply: TransformReply = match pick_by_key(&self.units, path.as_bytes()) {
            None => {
                let worker = self.worker.clone();
                let path = path.to_string();
                let options = options.clone();
                tokio::task::spawn_blocking(move || {
                    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        worker.transform(&path, &options)
                    }))
                    .unwrap_or_else(|payload| Err(panic_failure(payload)))
                })
                .await
                .map_err(|e| ModGraphError::Worker(format!("in-process transform aborted: {}", e)))?
            }
            Some(unit) => {
                debug!(file = %path, unit = unit.id(), "Dispatching transform");
                let (tx, rx) = oneshot::channel();
                unit.dispatch(Job::Transform {
                    path: path.to_string(),
                    options: options.clone(),
                    reply: tx,
                })?;
                rx.await.map_err(|_| {
                    ModGraphError::Worker(format!("worker unit {} dropped the request", unit.id()))
                })?
            }
        };

        reply.map_err(|failure| ModGraphError::Transform(format_transform_failure(path, failure)))
    }

    /// Round-trip to the least busy unit; returns the id of the unit that answered.
    pub async fn ping(&self) -> Result<usize> {
        self.ensure_alive()?;
        let Some(unit) = pick_least_pending(&self.units) else {
            return Ok(0);
        };
        let (tx, rx) = oneshot::channel();
        unit.dispatch(Job::Ping { reply: tx })?;
        rx.await
            .map_err(|_| ModGraphError::Worker(format!("worker unit {} dropped the request", unit.id())))
    }

    /// Stop accepting work. Idempotent; queued and running jobs still finish.
    pub fn kill(&self) {
        if self.killed.swap(true, Ordering::AcqRel) {
            return;
        }
        for unit in &self.units {
            unit.shutdown();
        }
        info!(
            "Worker farm stopped after {} transform(s)",
            self.transform_count()
        );
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_killed() {
            return Err(ModGraphError::Worker("worker farm has been killed".to_string()));
        }
        Ok(())
    }
}

impl Drop for WorkerFarm {
    fn drop(&mut self) {
        self.kill();
    }
}
