#![allow(dead_code)]

use futures::future::BoxFuture;
use futures::FutureExt;
use modgraph_cache::{MemoryStore, TransformCache, TransformCacheConfig};
use modgraph_core::{
    AsyncKind, DependencyDescriptor, ModGraphError, ModuleOutput, ResolutionError, Resolver,
    Result, TransformContext, TransformFailure, TransformResult, TransformedFile, Transformer,
    TransformerConfig,
};
use modgraph_graph::{CacheLoader, Graph, ModuleLoader};
use modgraph_worker::{WorkerFarm, WorkerFarmConfig};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Line-oriented test language:
/// `import x` (sync), `lazy x` (deferred), `maybe x` (optional), `@syntax`.
pub struct ImportTransformer;

impl Transformer for ImportTransformer {
    fn transform(
        &self,
        source: &[u8],
        _context: &TransformContext,
    ) -> std::result::Result<TransformResult, TransformFailure> {
        let text = String::from_utf8_lossy(source);
        let mut dependencies = Vec::new();
        for line in text.lines() {
            if line.trim() == "@syntax" {
                return Err(TransformFailure::syntax("Unexpected token", 1, 1));
            }
            if let Some(name) = line.strip_prefix("import ") {
                dependencies.push(DependencyDescriptor::new(name.trim()));
            } else if let Some(name) = line.strip_prefix("lazy ") {
                dependencies.push(
                    DependencyDescriptor::new(name.trim())
                        .with_key(format!("lazy:{}", name.trim()))
                        .with_async_kind(AsyncKind::Deferred),
                );
            } else if let Some(name) = line.strip_prefix("maybe ") {
                dependencies.push(DependencyDescriptor::new(name.trim()).optional());
            }
        }
        Ok(TransformResult {
            dependencies,
            output: vec![ModuleOutput::new(
                "js/module",
                serde_json::json!({ "code": text }),
            )],
        })
    }
}

/// Maps `name` to `<root>/<name>.js` when that file exists.
pub struct FileResolver {
    root: PathBuf,
}

impl Resolver for FileResolver {
    fn resolve(
        &self,
        origin: Option<&str>,
        dependency: &DependencyDescriptor,
        _platform: Option<&str>,
    ) -> std::result::Result<String, ResolutionError> {
        let path = self.root.join(format!("{}.js", dependency.name));
        if path.exists() {
            Ok(path.to_string_lossy().to_string())
        } else {
            Err(ResolutionError::not_found(origin, dependency.name.clone()))
        }
    }
}

/// Delays every load and counts loads per path.
pub struct CountingLoader {
    inner: Arc<dyn ModuleLoader>,
    delay: Duration,
    pub calls: Mutex<HashMap<String, usize>>,
}

impl CountingLoader {
    pub fn new(inner: Arc<dyn ModuleLoader>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_calls_per_path(&self) -> usize {
        self.calls.lock().values().copied().max().unwrap_or(0)
    }
}

impl ModuleLoader for CountingLoader {
    fn load(&self, path: &str) -> BoxFuture<'static, Result<TransformedFile>> {
        *self.calls.lock().entry(path.to_string()).or_insert(0) += 1;
        let delay = self.delay;
        let inner = self.inner.load(path);
        async move {
            tokio::time::sleep(delay).await;
            inner.await
        }
        .boxed()
    }
}

/// Modules kept in memory as path -> imported paths. Serves as both the
/// resolver and the loader, so large graphs need no files or workers.
#[derive(Default)]
pub struct MemoryModules {
    imports: Mutex<HashMap<String, Vec<String>>>,
}

impl MemoryModules {
    pub fn set(&self, path: &str, imports: &[&str]) {
        self.imports
            .lock()
            .insert(path.to_string(), imports.iter().map(|i| i.to_string()).collect());
    }

    /// `head -> 0 -> 1 -> ... -> len-1`, module paths `/mem/{i}`.
    pub fn chain(&self, head: &str, len: usize) -> Vec<String> {
        let paths: Vec<String> = (0..len).map(|i| format!("/mem/{}", i)).collect();
        self.set(head, &[paths[0].as_str()]);
        for pair in paths.windows(2) {
            self.set(&pair[0], &[pair[1].as_str()]);
        }
        self.set(&paths[len - 1], &[]);
        paths
    }
}

impl Resolver for MemoryModules {
    fn resolve(
        &self,
        origin: Option<&str>,
        dependency: &DependencyDescriptor,
        _platform: Option<&str>,
    ) -> std::result::Result<String, ResolutionError> {
        if self.imports.lock().contains_key(&dependency.name) {
            Ok(dependency.name.clone())
        } else {
            Err(ResolutionError::not_found(origin, dependency.name.clone()))
        }
    }
}

impl ModuleLoader for MemoryModules {
    fn load(&self, path: &str) -> BoxFuture<'static, Result<TransformedFile>> {
        let loaded = match self.imports.lock().get(path) {
            Some(imports) => Ok(TransformedFile {
                result: Arc::new(TransformResult {
                    dependencies: imports.iter().map(|i| DependencyDescriptor::new(i.as_str())).collect(),
                    output: Vec::new(),
                }),
                digest: format!("{}:{}", path, imports.len()),
            }),
            None => Err(ModGraphError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                path.to_string(),
            ))),
        };
        futures::future::ready(loaded).boxed()
    }
}

pub struct Project {
    dir: TempDir,
}

impl Project {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Absolute path of module `name`.
    pub fn path(&self, name: &str) -> String {
        self.root().join(format!("{}.js", name)).to_string_lossy().to_string()
    }

    pub fn write(&self, name: &str, body: &str) -> String {
        let path = self.path(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    pub fn remove(&self, name: &str) -> String {
        let path = self.path(name);
        std::fs::remove_file(&path).unwrap();
        path
    }

    pub fn resolver(&self) -> Arc<dyn Resolver> {
        Arc::new(FileResolver {
            root: self.root().to_path_buf(),
        })
    }

    pub fn farm(&self, max_workers: usize) -> Arc<WorkerFarm> {
        let config = WorkerFarmConfig {
            max_workers,
            project_root: self.root().to_path_buf(),
        };
        Arc::new(WorkerFarm::new(Arc::new(ImportTransformer), config).unwrap())
    }

    pub fn cache(&self, farm: Arc<WorkerFarm>) -> Arc<TransformCache> {
        let config = TransformCacheConfig {
            project_root: self.root().to_path_buf(),
            cache_version: "test".to_string(),
            transformer: TransformerConfig::default(),
        };
        Arc::new(TransformCache::new(config, farm, vec![Arc::new(MemoryStore::new())]).unwrap())
    }

    /// Farm, cache and loader wired together with dev options.
    pub fn pipeline(&self, max_workers: usize) -> (Arc<WorkerFarm>, Arc<dyn ModuleLoader>) {
        let farm = self.farm(max_workers);
        let cache = self.cache(farm.clone());
        let loader: Arc<dyn ModuleLoader> =
            Arc::new(CacheLoader::new(cache, modgraph_core::TransformOptions::dev()));
        (farm, loader)
    }

    /// Module paths as names relative to the project, for readable assertions.
    pub fn names<'a>(&self, paths: impl IntoIterator<Item = &'a String>) -> Vec<String> {
        paths
            .into_iter()
            .map(|p| {
                Path::new(p)
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default()
            })
            .collect()
    }
}

/// No edge points outside the graph and every inverse count matches.
pub fn assert_consistent(graph: &Graph) {
    assert!(graph.dangling_edges().is_empty(), "dangling: {:?}", graph.dangling_edges());
    assert!(graph.inverse_dependencies_consistent());
}
