use crate::graph::{Graph, TraversalContext};
use crate::loader::ModuleLoader;
use crate::module::Module;
use crate::traversal::ProgressFn;
use indexmap::{IndexMap, IndexSet};
use modgraph_core::{
    ChangeBatch, ChangeEvent, ChangeSource, ModGraphError, Resolver, Result, TransformOptions,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeltaOptions {
    /// Rebuild from scratch and report every module as added.
    pub reset: bool,
    /// Process only the changed modules, never adding their dependencies.
    ///
    /// New edges to modules already in the graph are recorded without
    /// counting them as referrers, so a later delta may release a module that
    /// is still imported. Request a `reset` before relying on a graph that a
    /// shallow delta has touched.
    pub shallow: bool,
}

impl DeltaOptions {
    pub fn reset() -> Self {
        Self {
            reset: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeltaResult {
    pub added: IndexMap<String, Arc<Module>>,
    pub modified: IndexMap<String, Arc<Module>>,
    pub deleted: IndexSet<String>,
    /// The result describes the whole graph rather than a change to it.
    pub reset: bool,
}

impl DeltaResult {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// File changes observed since the last delta.
#[derive(Debug, Clone, Default)]
pub struct ChangeSets {
    pub added: IndexSet<String>,
    pub modified: IndexSet<String>,
    pub deleted: IndexSet<String>,
    /// Events were lost; only a full rebuild is trustworthy.
    pub overflowed: bool,
}

impl ChangeSets {
    pub fn record(&mut self, event: &ChangeEvent) {
        match event {
            ChangeEvent::Deleted(path) => {
                self.added.shift_remove(path);
                self.modified.shift_remove(path);
                self.deleted.insert(path.clone());
            }
            ChangeEvent::Added(path) => {
                self.deleted.shift_remove(path);
                self.added.insert(path.clone());
            }
            ChangeEvent::Modified(path) => {
                if !self.added.contains(path) {
                    self.deleted.shift_remove(path);
                    self.modified.insert(path.clone());
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty() && !self.overflowed
    }

    /// Put back changes taken by a failed delta. Changes recorded in the
    /// meantime are newer and win.
    fn restore(&mut self, older: ChangeSets) {
        let newer = std::mem::replace(self, older);
        self.overflowed |= newer.overflowed;
        for path in newer.deleted {
            self.record(&ChangeEvent::Deleted(path));
        }
        for path in newer.added {
            self.record(&ChangeEvent::Added(path));
        }
        for path in newer.modified {
            self.record(&ChangeEvent::Modified(path));
        }
    }
}

struct CalculatorState {
    graph: Graph,
    built: bool,
}

/// Turns file change events into graph deltas for one set of entry points.
pub struct DeltaCalculator {
    resolver: Arc<dyn Resolver>,
    loader: Arc<dyn ModuleLoader>,
    on_progress: Option<ProgressFn>,
    state: tokio::sync::Mutex<CalculatorState>,
    changes: Mutex<ChangeSets>,
    subscription: Mutex<Option<broadcast::Receiver<ChangeBatch>>>,
    ended: AtomicBool,
}

impl DeltaCalculator {
    pub fn new(
        entry_points: Vec<String>,
        options: TransformOptions,
        resolver: Arc<dyn Resolver>,
        loader: Arc<dyn ModuleLoader>,
        changes: &dyn ChangeSource,
    ) -> Self {
        Self {
            resolver,
            loader,
            on_progress: None,
            state: tokio::sync::Mutex::new(CalculatorState {
                graph: Graph::new(entry_points, options),
                built: false,
            }),
            changes: Mutex::new(ChangeSets::default()),
            subscription: Mutex::new(Some(changes.subscribe())),
            ended: AtomicBool::new(false),
        }
    }

    pub fn with_progress(mut self, on_progress: ProgressFn) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    /// Changes recorded but not yet turned into a delta.
    pub fn pending_changes(&self) -> ChangeSets {
        self.drain_events();
        self.changes.lock().clone()
    }

    /// A copy of the graph as of the last successful delta.
    pub async fn graph(&self) -> Option<Graph> {
        let state = self.state.lock().await;
        state.built.then(|| state.graph.clone())
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// Stop listening for changes. Later calls to `get_delta` fail.
    pub fn end(&self) {
        if !self.ended.swap(true, Ordering::SeqCst) {
            self.subscription.lock().take();
            debug!("Delta calculator ended");
        }
    }

    /// Compute what changed since the previous call. Calls are serialized;
    /// a failed call leaves the graph as it was and keeps its changes pending.
    pub async fn get_delta(&self, options: DeltaOptions) -> Result<DeltaResult> {
        if self.is_ended() {
            return Err(ModGraphError::InvalidOperation(
                "delta calculator has ended".to_string(),
            ));
        }

        let mut state = self.state.lock().await;
        self.drain_events();
        let taken = std::mem::take(&mut *self.changes.lock());
        let ctx = TraversalContext {
            resolver: self.resolver.clone(),
            loader: self.loader.clone(),
            shallow: options.shallow,
            on_progress: self.on_progress.clone(),
        };

        if options.reset || !state.built || taken.overflowed {
            if taken.overflowed {
                warn!("Change events were dropped, rebuilding the graph");
            }
            let mut graph = Graph::new(
                state.graph.entry_points().iter().cloned(),
                state.graph.transform_options().clone(),
            );
            return match graph.initial_traverse(&ctx).await {
                Ok(delta) => {
                    state.graph = graph;
                    state.built = true;
                    Ok(DeltaResult {
                        added: delta.added,
                        reset: true,
                        ..DeltaResult::default()
                    })
                }
                Err(e) => {
                    self.changes.lock().restore(taken);
                    Err(e)
                }
            };
        }

        let modified: Vec<String> = taken
            .modified
            .iter()
            .chain(taken.added.iter())
            .filter(|p| state.graph.contains(p))
            .cloned()
            .collect();
        let deleted: Vec<String> = taken
            .deleted
            .iter()
            .filter(|p| state.graph.contains(p))
            .cloned()
            .collect();
        if modified.is_empty() && deleted.is_empty() {
            return Ok(DeltaResult::default());
        }

        let snapshot = state.graph.clone();
        match state.graph.traverse_dependencies(&modified, &deleted, &ctx).await {
            Ok(delta) => {
                info!(
                    "Delta ready: {} added, {} modified, {} deleted",
                    delta.added.len(),
                    delta.modified.len(),
                    delta.deleted.len()
                );
                Ok(DeltaResult {
                    added: delta.added,
                    modified: delta.modified,
                    deleted: delta.deleted,
                    reset: false,
                })
            }
            Err(e) => {
                warn!("Delta failed, keeping changes for the next attempt: {}", e);
                state.graph = snapshot;
                self.changes.lock().restore(taken);
                Err(e)
            }
        }
    }

    fn drain_events(&self) {
        let mut subscription = self.subscription.lock();
        let Some(receiver) = subscription.as_mut() else {
            return;
        };
        let mut changes = self.changes.lock();
        let mut closed = false;
        loop {
            match receiver.try_recv() {
                Ok(batch) => {
                    for event in batch.iter() {
                        changes.record(event);
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!("Missed {} change batches", skipped);
                    changes.overflowed = true;
                }
                Err(TryRecvError::Closed) => {
                    debug!("Change source closed");
                    closed = true;
                    break;
                }
            }
        }
        if closed {
            subscription.take();
        }
    }
}
