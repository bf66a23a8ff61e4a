use crate::counting_set::CountingSet;
use crate::loader::{MemoizingLoader, ModuleLoader};
use crate::module::{BuildResult, Module};
use crate::queue::{Accumulator, TaskOutcome, TaskQueue};
use indexmap::{IndexMap, IndexSet};
use modgraph_core::{
    DependencyDescriptor, ModGraphError, ResolutionError, ResolvedDependency, Resolver, Result,
    TransformedFile,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Called with (processed, discovered) after every module is handled.
pub type ProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;

#[derive(Clone, Default)]
pub struct BuildOptions {
    pub platform: Option<String>,
    /// Paths that are recorded as edge targets but never loaded.
    pub skip: IndexSet<String>,
    pub on_progress: Option<ProgressFn>,
}

impl BuildOptions {
    pub fn for_platform(platform: impl Into<String>) -> Self {
        Self {
            platform: Some(platform.into()),
            ..Self::default()
        }
    }
}

/// Resolve one dependency; an optional one that cannot be found yields `None`.
pub(crate) fn resolve_dependency(
    resolver: &dyn Resolver,
    origin: Option<&str>,
    dependency: &DependencyDescriptor,
    platform: Option<&str>,
) -> std::result::Result<Option<String>, ResolutionError> {
    match resolver.resolve(origin, dependency, platform) {
        Ok(path) => Ok(Some(path)),
        Err(err) if dependency.optional && err.is_not_found() => {
            debug!(
                origin = origin.unwrap_or("<entry>"),
                reference = %dependency.name,
                "Skipping unresolvable optional dependency"
            );
            Ok(None)
        }
        Err(err) => Err(err.with_location(dependency.first_location())),
    }
}

/// Resolve a module's declared dependencies into an edge map keyed by
/// dependency key.
pub(crate) fn resolve_dependencies(
    resolver: &dyn Resolver,
    origin: &str,
    dependencies: &[DependencyDescriptor],
    platform: Option<&str>,
) -> Result<IndexMap<String, ResolvedDependency>> {
    let mut edges = IndexMap::with_capacity(dependencies.len());
    for dependency in dependencies {
        if edges.contains_key(&dependency.key) {
            return Err(ModGraphError::DuplicateDependencyKey {
                origin: origin.to_string(),
                key: dependency.key.clone(),
            });
        }
        if let Some(absolute_path) = resolve_dependency(resolver, Some(origin), dependency, platform)? {
            edges.insert(
                dependency.key.clone(),
                ResolvedDependency {
                    absolute_path,
                    data: dependency.clone(),
                },
            );
        }
    }
    Ok(edges)
}

/// Depth-first pre-order over `children`, skipping nodes already visited.
/// Children `children` does not know about are left out.
pub(crate) fn dfs_preorder<'a, F, I>(starts: impl IntoIterator<Item = &'a str>, mut children: F) -> Vec<String>
where
    F: FnMut(&str) -> Option<I>,
    I: IntoIterator<Item = String>,
    I::IntoIter: DoubleEndedIterator,
{
    let mut visited = IndexSet::new();
    let mut stack: Vec<String> = starts.into_iter().map(str::to_string).collect();
    stack.reverse();

    while let Some(path) = stack.pop() {
        if visited.contains(&path) {
            continue;
        }
        let Some(next) = children(&path) else {
            continue;
        };
        stack.extend(next.into_iter().rev());
        visited.insert(path);
    }
    visited.into_iter().collect()
}

struct DependencyTask {
    /// `None` for entry points.
    origin: Option<String>,
    index: usize,
    dependency: DependencyDescriptor,
}

struct Loaded {
    path: String,
    /// `None` when the path is skipped.
    file: Option<TransformedFile>,
}

struct Discovered {
    file: TransformedFile,
    edges: Vec<Option<ResolvedDependency>>,
}

/// Mutable state of one `build_graph` call.
struct GraphBuilder<'a> {
    resolver: &'a dyn Resolver,
    loader: MemoizingLoader,
    options: &'a BuildOptions,
    modules: HashMap<String, Discovered>,
    entries: Vec<Option<ResolvedDependency>>,
    requested: IndexSet<String>,
    processed: usize,
}

impl GraphBuilder<'_> {
    fn edge_slot(&mut self, origin: Option<&str>, index: usize) -> Option<&mut Option<ResolvedDependency>> {
        match origin {
            None => self.entries.get_mut(index),
            Some(origin) => self
                .modules
                .get_mut(origin)
                .and_then(|m| m.edges.get_mut(index)),
        }
    }

    fn report_progress(&self) {
        if let Some(on_progress) = &self.options.on_progress {
            on_progress(self.processed, self.requested.len());
        }
    }
}

impl Accumulator<DependencyTask, Option<Loaded>> for GraphBuilder<'_> {
    fn run(&mut self, task: &DependencyTask) -> TaskOutcome<Option<Loaded>> {
        let resolved = resolve_dependency(
            self.resolver,
            task.origin.as_deref(),
            &task.dependency,
            self.options.platform.as_deref(),
        );
        let path = match resolved {
            Ok(Some(path)) => path,
            Ok(None) => return TaskOutcome::Ready(Ok(None)),
            Err(err) => return TaskOutcome::Ready(Err(err.into())),
        };

        if self.options.skip.contains(&path) || self.modules.contains_key(&path) {
            return TaskOutcome::Ready(Ok(Some(Loaded { path, file: None })));
        }
        self.requested.insert(path.clone());
        self.loader.load(&path).map(move |file| {
            Some(Loaded {
                path,
                file: Some(file),
            })
        })
    }

    fn accumulate(
        &mut self,
        task: DependencyTask,
        loaded: Option<Loaded>,
        next: &mut Vec<DependencyTask>,
    ) -> Result<()> {
        let Some(Loaded { path, file }) = loaded else {
            return Ok(());
        };

        if let Some(slot) = self.edge_slot(task.origin.as_deref(), task.index) {
            *slot = Some(ResolvedDependency {
                absolute_path: path.clone(),
                data: task.dependency,
            });
        }

        let Some(file) = file else {
            return Ok(());
        };
        if self.modules.contains_key(&path) {
            return Ok(());
        }

        self.loader.settle(&path, &file);
        let dependencies = &file.result.dependencies;
        let mut seen = IndexSet::with_capacity(dependencies.len());
        for (index, dependency) in dependencies.iter().enumerate() {
            if !seen.insert(dependency.key.as_str()) {
                return Err(ModGraphError::DuplicateDependencyKey {
                    origin: path,
                    key: dependency.key.clone(),
                });
            }
            next.push(DependencyTask {
                origin: Some(path.clone()),
                index,
                dependency: dependency.clone(),
            });
        }

        self.processed += 1;
        self.report_progress();

        let edges = vec![None; dependencies.len()];
        self.modules.insert(path, Discovered { file, edges });
        Ok(())
    }
}

/// Discover every module reachable from `entry_points`, loading each path at
/// most once. Fails on the first resolution or load error.
pub async fn build_graph(
    entry_points: &[String],
    resolver: &dyn Resolver,
    loader: Arc<dyn ModuleLoader>,
    options: &BuildOptions,
) -> Result<BuildResult> {
    let start_time = std::time::Instant::now();
    info!("Building dependency graph from {} entry points", entry_points.len());

    let mut builder = GraphBuilder {
        resolver,
        loader: MemoizingLoader::new(loader),
        options,
        modules: HashMap::new(),
        entries: vec![None; entry_points.len()],
        requested: IndexSet::new(),
        processed: 0,
    };
    let seeds = entry_points
        .iter()
        .enumerate()
        .map(|(index, entry)| DependencyTask {
            origin: None,
            index,
            dependency: DependencyDescriptor::new(entry.clone()),
        });
    TaskQueue::new(seeds).drain(&mut builder).await?;

    let result = collect(builder.entries, builder.modules)?;
    info!(
        "Dependency graph built in {}ms: {} modules",
        start_time.elapsed().as_millis(),
        result.modules.len()
    );
    Ok(result)
}

fn collect(
    entries: Vec<Option<ResolvedDependency>>,
    mut discovered: HashMap<String, Discovered>,
) -> Result<BuildResult> {
    let entry_paths: Vec<String> = entries.into_iter().flatten().map(|e| e.absolute_path).collect();

    let mut inverse: HashMap<String, CountingSet<String>> = HashMap::new();
    for (origin, module) in &discovered {
        for edge in module.edges.iter().flatten() {
            inverse
                .entry(edge.absolute_path.clone())
                .or_default()
                .add(origin.clone());
        }
    }

    let order = dfs_preorder(entry_paths.iter().map(String::as_str), |path| {
        discovered.get(path).map(|m| {
            m.edges
                .iter()
                .flatten()
                .map(|e| e.absolute_path.clone())
                .collect::<Vec<_>>()
        })
    });

    let mut built: IndexMap<String, Arc<Module>> = IndexMap::with_capacity(order.len());
    for path in order {
        let Some(Discovered { file, edges }) = discovered.remove(&path) else {
            continue;
        };
        let dependencies = edges
            .into_iter()
            .flatten()
            .map(|edge| (edge.data.key.clone(), edge))
            .collect();
        let module = Module {
            inverse_dependencies: inverse.remove(&path).unwrap_or_default(),
            path: path.clone(),
            dependencies,
            transform: file.result,
            digest: file.digest,
        };
        built.insert(path, Arc::new(module));
    }

    let mut entry_modules = Vec::new();
    let mut seen = IndexSet::new();
    for path in &entry_paths {
        if seen.insert(path.as_str()) {
            if let Some(module) = built.get(path) {
                entry_modules.push(module.clone());
            }
        }
    }

    Ok(BuildResult {
        modules: built.into_values().collect(),
        entry_modules,
    })
}
