use crate::queue::TaskOutcome;
use futures::future::{BoxFuture, Shared};
use futures::{FutureExt, TryFutureExt};
use modgraph_cache::TransformCache;
use modgraph_core::{ModGraphError, Result, TransformOptions, TransformedFile};
use std::collections::HashMap;
use std::sync::Arc;

/// Produces the transformed contents of a file.
pub trait ModuleLoader: Send + Sync {
    fn load(&self, path: &str) -> BoxFuture<'static, Result<TransformedFile>>;
}

/// Loads through the transform cache with a fixed set of options.
pub struct CacheLoader {
    cache: Arc<TransformCache>,
    options: TransformOptions,
}

impl CacheLoader {
    pub fn new(cache: Arc<TransformCache>, options: TransformOptions) -> Self {
        Self { cache, options }
    }

    pub fn options(&self) -> &TransformOptions {
        &self.options
    }
}

impl ModuleLoader for CacheLoader {
    fn load(&self, path: &str) -> BoxFuture<'static, Result<TransformedFile>> {
        let cache = self.cache.clone();
        let options = self.options.clone();
        let path = path.to_string();
        async move { cache.transform_file(&path, &options).await }.boxed()
    }
}

type SharedLoad = Shared<BoxFuture<'static, std::result::Result<TransformedFile, Arc<ModGraphError>>>>;

enum LoadState {
    Ready(TransformedFile),
    InFlight(SharedLoad),
}

/// Per-traversal memo: each path is loaded at most once, and every request
/// for a path whose load is still in flight joins that load.
pub struct MemoizingLoader {
    loader: Arc<dyn ModuleLoader>,
    entries: HashMap<String, LoadState>,
    loads: usize,
}

impl MemoizingLoader {
    pub fn new(loader: Arc<dyn ModuleLoader>) -> Self {
        Self {
            loader,
            entries: HashMap::new(),
            loads: 0,
        }
    }

    pub fn load(&mut self, path: &str) -> TaskOutcome<TransformedFile> {
        match self.entries.get(path) {
            Some(LoadState::Ready(file)) => TaskOutcome::Ready(Ok(file.clone())),
            Some(LoadState::InFlight(shared)) => {
                TaskOutcome::Pending(shared.clone().map_err(ModGraphError::Shared).boxed())
            }
            None => {
                self.loads += 1;
                let shared = self.loader.load(path).map_err(Arc::new).boxed().shared();
                self.entries
                    .insert(path.to_string(), LoadState::InFlight(shared.clone()));
                TaskOutcome::Pending(shared.map_err(ModGraphError::Shared).boxed())
            }
        }
    }

    /// Record a completed load so later requests are answered synchronously.
    pub fn settle(&mut self, path: &str, file: &TransformedFile) {
        self.entries
            .insert(path.to_string(), LoadState::Ready(file.clone()));
    }

    /// Number of distinct loads started.
    pub fn load_count(&self) -> usize {
        self.loads
    }
}
