//! The live dependency graph kept between builds.
//!
//! Modules are reference counted through their inverse dependencies. Removing
//! an edge releases its target once nothing refers to it; targets that are
//! still referenced become candidates for cycle collection, which frees groups
//! of modules that only keep each other alive.

use crate::counting_set::CountingSet;
use crate::loader::{MemoizingLoader, ModuleLoader};
use crate::module::{BuildResult, Module};
use crate::queue::{Accumulator, TaskOutcome, TaskQueue};
use crate::traversal::{dfs_preorder, resolve_dependencies, ProgressFn};
use indexmap::{IndexMap, IndexSet};
use modgraph_core::{
    ModGraphError, ResolvedDependency, Resolver, Result, TransformOptions, TransformedFile,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    /// In use.
    Black,
    /// Possible member of a garbage cycle.
    Gray,
    /// Member of a garbage cycle.
    White,
    /// Possible root of a garbage cycle.
    Purple,
}

/// Everything a traversal needs besides the graph itself.
#[derive(Clone)]
pub struct TraversalContext {
    pub resolver: Arc<dyn Resolver>,
    pub loader: Arc<dyn ModuleLoader>,
    /// Process the given modules without adding their dependencies as nodes.
    /// Edges added this way do not count toward their target's referrers.
    pub shallow: bool,
    pub on_progress: Option<ProgressFn>,
}

impl TraversalContext {
    pub fn new(resolver: Arc<dyn Resolver>, loader: Arc<dyn ModuleLoader>) -> Self {
        Self {
            resolver,
            loader,
            shallow: false,
            on_progress: None,
        }
    }

    pub fn shallow(mut self, shallow: bool) -> Self {
        self.shallow = shallow;
        self
    }
}

/// What one traversal changed.
#[derive(Debug, Clone, Default)]
pub struct GraphDelta {
    pub added: IndexMap<String, Arc<Module>>,
    pub modified: IndexMap<String, Arc<Module>>,
    pub deleted: IndexSet<String>,
}

impl GraphDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Graph {
    entry_points: IndexSet<String>,
    transform_options: TransformOptions,
    modules: IndexMap<String, Arc<Module>>,
    colors: HashMap<String, Color>,
    possible_cycle_roots: IndexSet<String>,
}

impl Graph {
    pub fn new(entry_points: impl IntoIterator<Item = String>, transform_options: TransformOptions) -> Self {
        Self {
            entry_points: entry_points.into_iter().collect(),
            transform_options,
            modules: IndexMap::new(),
            colors: HashMap::new(),
            possible_cycle_roots: IndexSet::new(),
        }
    }

    pub fn entry_points(&self) -> &IndexSet<String> {
        &self.entry_points
    }

    pub fn transform_options(&self) -> &TransformOptions {
        &self.transform_options
    }

    pub fn modules(&self) -> &IndexMap<String, Arc<Module>> {
        &self.modules
    }

    pub fn get(&self, path: &str) -> Option<&Arc<Module>> {
        self.modules.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.modules.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Modules in depth-first order from the entry points.
    pub fn build_result(&self) -> BuildResult {
        let order = dfs_preorder(self.entry_points.iter().map(String::as_str), |path| {
            self.modules
                .get(path)
                .map(|m| m.dependency_paths().map(str::to_string).collect::<Vec<_>>())
        });
        BuildResult {
            modules: order.iter().filter_map(|p| self.modules.get(p).cloned()).collect(),
            entry_modules: self
                .entry_points
                .iter()
                .filter_map(|p| self.modules.get(p).cloned())
                .collect(),
        }
    }

    /// Edges whose target is not a node, as (origin, target) pairs.
    pub fn dangling_edges(&self) -> Vec<(String, String)> {
        let mut dangling = Vec::new();
        for module in self.modules.values() {
            for target in module.dependency_paths() {
                if !self.modules.contains_key(target) {
                    dangling.push((module.path.clone(), target.to_string()));
                }
            }
        }
        dangling
    }

    /// Every inverse count matches the edges pointing at the module.
    pub fn inverse_dependencies_consistent(&self) -> bool {
        let mut expected: HashMap<&str, CountingSet<String>> = HashMap::new();
        for module in self.modules.values() {
            for target in module.dependency_paths() {
                expected.entry(target).or_default().add(module.path.clone());
            }
        }
        self.modules.values().all(|module| {
            let want = expected.remove(module.path.as_str()).unwrap_or_default();
            want == module.inverse_dependencies
        })
    }

    /// Build the graph from scratch. Every reachable module is reported as added.
    pub async fn initial_traverse(&mut self, ctx: &TraversalContext) -> Result<GraphDelta> {
        if !self.modules.is_empty() {
            return Err(ModGraphError::InvalidOperation(
                "initial traversal requires an empty graph".to_string(),
            ));
        }
        let start_time = std::time::Instant::now();
        info!(
            "Initial traversal from {} entry points (shallow: {})",
            self.entry_points.len(),
            ctx.shallow
        );

        self.colors.clear();
        self.possible_cycle_roots.clear();
        for entry in &self.entry_points {
            self.colors.insert(entry.clone(), Color::Black);
        }

        let seeds: Vec<String> = self.entry_points.iter().cloned().collect();
        let mut traversal = Traversal::new(self, ctx);
        for entry in &seeds {
            traversal.enqueue_new(entry, None);
        }
        traversal.progress_total = seeds.len();
        TaskQueue::new(seeds).drain(&mut traversal).await?;
        drop(traversal);

        self.reorder(ctx.shallow)?;

        info!(
            "Initial traversal completed in {}ms: {} modules",
            start_time.elapsed().as_millis(),
            self.modules.len()
        );
        Ok(GraphDelta {
            added: self.modules.clone(),
            ..GraphDelta::default()
        })
    }

    /// Re-process `modified` modules and drop `deleted` ones, updating edges
    /// and releasing whatever becomes unreachable.
    pub async fn traverse_dependencies(
        &mut self,
        modified: &[String],
        deleted: &[String],
        ctx: &TraversalContext,
    ) -> Result<GraphDelta> {
        let start_time = std::time::Instant::now();
        info!(
            "Traversing {} modified and {} deleted files",
            modified.len(),
            deleted.len()
        );

        let mut traversal = Traversal::new(self, ctx);
        let mut seeds: IndexSet<String> = modified
            .iter()
            .filter(|p| traversal.graph.modules.contains_key(p.as_str()))
            .cloned()
            .collect();

        for path in deleted {
            let Some(module) = traversal.graph.modules.get(path) else {
                continue;
            };
            let referrers: Vec<String> = module.inverse_dependencies.iter().cloned().collect();
            debug!(file = %path, referrers = referrers.len(), "Releasing deleted file");
            traversal.release_module(path);
            seeds.shift_remove(path);
            seeds.extend(referrers);
            if traversal.graph.entry_points.contains(path) {
                // an entry point must be loadable; retrying surfaces the failure
                traversal.enqueue_new(path, None);
                seeds.insert(path.clone());
            }
        }
        seeds.retain(|p| {
            traversal.graph.modules.contains_key(p.as_str()) || traversal.early_inverse.contains_key(p)
        });
        for path in &seeds {
            if traversal.graph.modules.contains_key(path.as_str()) {
                traversal.modified.insert(path.clone());
            }
        }

        traversal.progress_total = seeds.len();
        TaskQueue::new(seeds).drain(&mut traversal).await?;
        traversal.collect_cycles();

        let added = std::mem::take(&mut traversal.added);
        let modified = std::mem::take(&mut traversal.modified);
        let deleted = std::mem::take(&mut traversal.deleted);
        drop(traversal);

        let delta = GraphDelta {
            added: added
                .iter()
                .filter_map(|p| self.modules.get(p).map(|m| (p.clone(), m.clone())))
                .collect(),
            modified: modified
                .iter()
                .filter(|p| !added.contains(*p) && !deleted.contains(*p))
                .filter_map(|p| self.modules.get(p).map(|m| (p.clone(), m.clone())))
                .collect(),
            deleted,
        };

        info!(
            "Traversal completed in {}ms: {} added, {} modified, {} deleted",
            start_time.elapsed().as_millis(),
            delta.added.len(),
            delta.modified.len(),
            delta.deleted.len()
        );
        Ok(delta)
    }

    /// Put modules in depth-first order from the entry points.
    fn reorder(&mut self, shallow: bool) -> Result<()> {
        let order = dfs_preorder(self.entry_points.iter().map(String::as_str), |path| {
            self.modules
                .get(path)
                .map(|m| m.dependency_paths().map(str::to_string).collect::<Vec<_>>())
        });
        if !shallow && order.len() != self.modules.len() {
            return Err(ModGraphError::InvalidOperation(format!(
                "{} modules are not reachable from the entry points",
                self.modules.len().abs_diff(order.len())
            )));
        }
        let mut reordered = IndexMap::with_capacity(order.len());
        for path in order {
            if let Some(module) = self.modules.shift_remove(&path) {
                reordered.insert(path, module);
            }
        }
        reordered.extend(self.modules.drain(..));
        self.modules = reordered;
        Ok(())
    }
}

/// Mutable state of one traversal over a graph.
struct Traversal<'g> {
    graph: &'g mut Graph,
    resolver: Arc<dyn Resolver>,
    loader: MemoizingLoader,
    shallow: bool,
    on_progress: Option<ProgressFn>,
    added: IndexSet<String>,
    modified: IndexSet<String>,
    deleted: IndexSet<String>,
    /// Referrers of modules that are discovered but not yet loaded.
    early_inverse: HashMap<String, CountingSet<String>>,
    progress_done: usize,
    progress_total: usize,
}

/// One level of an explicit depth-first walk: a module and the children it
/// still has to visit.
struct Frame<C> {
    path: String,
    children: std::vec::IntoIter<C>,
}

impl<C> Frame<C> {
    fn new(path: &str, children: impl IntoIterator<Item = C>) -> Self {
        Self {
            path: path.to_string(),
            children: children.into_iter().collect::<Vec<_>>().into_iter(),
        }
    }

    fn next_child(&mut self) -> Option<C> {
        self.children.next()
    }
}

impl<'g> Traversal<'g> {
    fn new(graph: &'g mut Graph, ctx: &TraversalContext) -> Self {
        Self {
            graph,
            resolver: ctx.resolver.clone(),
            loader: MemoizingLoader::new(ctx.loader.clone()),
            shallow: ctx.shallow,
            on_progress: ctx.on_progress.clone(),
            added: IndexSet::new(),
            modified: IndexSet::new(),
            deleted: IndexSet::new(),
            early_inverse: HashMap::new(),
            progress_done: 0,
            progress_total: 0,
        }
    }

    fn is_entry(&self, path: &str) -> bool {
        self.graph.entry_points.contains(path)
    }

    fn color(&self, path: &str) -> Color {
        self.graph.colors.get(path).copied().unwrap_or(Color::Black)
    }

    fn set_color(&mut self, path: &str, color: Color) {
        self.graph.colors.insert(path.to_string(), color);
    }

    fn module_mut(&mut self, path: &str) -> Option<&mut Module> {
        self.graph.modules.get_mut(path).map(Arc::make_mut)
    }

    fn children(&self, path: &str) -> Vec<String> {
        self.graph
            .modules
            .get(path)
            .map(|m| m.dependency_paths().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Register a module that is about to be loaded. A module freed earlier in
    /// the same traversal comes back as modified rather than added.
    fn enqueue_new(&mut self, path: &str, parent: Option<&str>) {
        if self.deleted.shift_remove(path) {
            self.modified.insert(path.to_string());
        } else {
            self.added.insert(path.to_string());
        }
        let mut inverse = CountingSet::new();
        if let Some(parent) = parent {
            inverse.add(parent.to_string());
        }
        self.early_inverse.insert(path.to_string(), inverse);
    }

    fn process_module(&mut self, path: String, file: TransformedFile, next: &mut Vec<String>) -> Result<()> {
        let existing = self.graph.modules.get(&path).cloned();
        let inverse_dependencies = match &existing {
            Some(module) => module.inverse_dependencies.clone(),
            None => match self.early_inverse.remove(&path) {
                Some(inverse) => inverse,
                None if self.is_entry(&path) => CountingSet::new(),
                // released while its load was in flight
                None => return Ok(()),
            },
        };

        if existing.is_none() && inverse_dependencies.is_empty() && !self.is_entry(&path) {
            debug!(file = %path, "Dropping module that lost its last referrer while loading");
            self.forget(&path);
            return Ok(());
        }

        let current = resolve_dependencies(
            self.resolver.as_ref(),
            &path,
            &file.result.dependencies,
            self.graph.transform_options.platform.as_deref(),
        )?;
        let previous = existing
            .as_ref()
            .map(|m| m.dependencies.clone())
            .unwrap_or_default();

        let module = Module {
            path: path.clone(),
            dependencies: previous.clone(),
            inverse_dependencies,
            transform: file.result,
            digest: file.digest,
        };
        self.graph.modules.insert(path.clone(), Arc::new(module));
        if existing.is_none() {
            self.set_color(&path, Color::Black);
        }

        for (key, dependency) in &previous {
            let unchanged = current
                .get(key)
                .is_some_and(|c| c.absolute_path == dependency.absolute_path);
            if !unchanged {
                self.remove_dependency(&path, key, dependency);
            }
        }

        // removing edges may have released this module through a cycle
        if !self.graph.modules.contains_key(&path) {
            return Ok(());
        }

        for (key, dependency) in &current {
            let unchanged = previous
                .get(key)
                .is_some_and(|p| p.absolute_path == dependency.absolute_path);
            let target = dependency.absolute_path.as_str();
            let missing = !self.graph.modules.contains_key(target) && !self.early_inverse.contains_key(target);
            if !unchanged || (missing && !self.shallow) {
                self.add_dependency(&path, dependency, next);
            }
        }

        if let Some(module) = self.module_mut(&path) {
            module.dependencies = current;
        }
        Ok(())
    }

    fn add_dependency(&mut self, parent: &str, dependency: &ResolvedDependency, next: &mut Vec<String>) {
        if self.shallow {
            return;
        }
        let target = dependency.absolute_path.as_str();
        if let Some(module) = self.module_mut(target) {
            module.inverse_dependencies.add(parent.to_string());
            self.set_color(target, Color::Black);
        } else if let Some(inverse) = self.early_inverse.get_mut(target) {
            inverse.add(parent.to_string());
        } else {
            self.enqueue_new(target, Some(parent));
            self.progress_total += 1;
            next.push(target.to_string());
        }
    }

    fn remove_dependency(&mut self, parent: &str, key: &str, dependency: &ResolvedDependency) {
        if self.detach(parent, key, dependency) {
            self.release_module(&dependency.absolute_path);
        }
    }

    /// Remove one edge. Returns true when its target lost its last referrer
    /// and has to be released.
    fn detach(&mut self, parent: &str, key: &str, dependency: &ResolvedDependency) -> bool {
        if let Some(module) = self.module_mut(parent) {
            module.dependencies.shift_remove(key);
        }

        let target = dependency.absolute_path.as_str();
        if let Some(inverse) = self.early_inverse.get_mut(target) {
            inverse.delete(&parent.to_string());
            return false;
        }
        let is_entry = self.is_entry(target);
        let Some(module) = self.module_mut(target) else {
            return false;
        };
        module.inverse_dependencies.delete(&parent.to_string());
        if !module.inverse_dependencies.is_empty() || is_entry {
            self.mark_as_possible_cycle_root(target);
            false
        } else {
            true
        }
    }

    /// Drop every outgoing edge of a module, then the module itself. Targets
    /// left without referrers are released the same way, children first.
    fn release_module(&mut self, path: &str) {
        let Some(module) = self.graph.modules.get(path) else {
            return;
        };
        let mut stack = vec![Frame::new(path, module.dependencies.clone())];
        while let Some(frame) = stack.last_mut() {
            let Some((key, dependency)) = frame.next_child() else {
                let path = frame.path.clone();
                stack.pop();
                self.set_color(&path, Color::Black);
                self.free_module(&path);
                continue;
            };
            let parent = frame.path.clone();
            if self.detach(&parent, &key, &dependency) {
                if let Some(target) = self.graph.modules.get(&dependency.absolute_path) {
                    stack.push(Frame::new(&dependency.absolute_path, target.dependencies.clone()));
                }
            }
        }
    }

    fn free_module(&mut self, path: &str) {
        self.forget(path);
        self.graph.modules.shift_remove(path);
        self.graph.possible_cycle_roots.shift_remove(path);
        self.graph.colors.remove(path);
    }

    fn forget(&mut self, path: &str) {
        if !self.added.shift_remove(path) {
            self.deleted.insert(path.to_string());
        }
        self.early_inverse.remove(path);
    }

    fn mark_as_possible_cycle_root(&mut self, path: &str) {
        if self.color(path) != Color::Purple {
            self.set_color(path, Color::Purple);
            self.graph.possible_cycle_roots.insert(path.to_string());
        }
    }

    /// Synchronous cycle collection over the possible roots recorded while
    /// removing edges.
    fn collect_cycles(&mut self) {
        let roots: Vec<String> = self.graph.possible_cycle_roots.iter().cloned().collect();
        for path in &roots {
            let Some(module) = self.graph.modules.get(path) else {
                self.graph.possible_cycle_roots.shift_remove(path);
                continue;
            };
            let unreferenced = module.inverse_dependencies.is_empty();
            match self.color(path) {
                Color::Purple => self.mark_gray(path),
                color => {
                    self.graph.possible_cycle_roots.shift_remove(path);
                    if color == Color::Black && unreferenced && !self.is_entry(path) {
                        self.free_module(path);
                    }
                }
            }
        }

        let roots: Vec<String> = self.graph.possible_cycle_roots.iter().cloned().collect();
        for path in &roots {
            self.scan(path);
        }

        let roots: Vec<String> = self.graph.possible_cycle_roots.iter().cloned().collect();
        for path in &roots {
            self.graph.possible_cycle_roots.shift_remove(path);
            if self.graph.modules.contains_key(path) {
                self.collect_white(path);
            }
        }
    }

    fn mark_gray(&mut self, path: &str) {
        if self.color(path) == Color::Gray {
            return;
        }
        self.set_color(path, Color::Gray);
        let mut stack = vec![Frame::new(path, self.children(path))];
        while let Some(frame) = stack.last_mut() {
            let Some(child) = frame.next_child() else {
                stack.pop();
                continue;
            };
            let parent = frame.path.clone();
            let Some(module) = self.module_mut(&child) else {
                continue;
            };
            module.inverse_dependencies.delete(&parent);
            if self.color(&child) != Color::Gray {
                self.set_color(&child, Color::Gray);
                stack.push(Frame::new(&child, self.children(&child)));
            }
        }
    }

    /// Gray modules still referenced from outside are restored; the rest turn
    /// white.
    fn scan(&mut self, path: &str) {
        let Some(children) = self.scan_enter(path) else {
            return;
        };
        let mut stack = vec![Frame::new(path, children)];
        while let Some(frame) = stack.last_mut() {
            let Some(child) = frame.next_child() else {
                stack.pop();
                continue;
            };
            if !self.graph.modules.contains_key(&child) {
                continue;
            }
            if let Some(children) = self.scan_enter(&child) {
                stack.push(Frame::new(&child, children));
            }
        }
    }

    /// Returns the children still to scan when `path` turns white.
    fn scan_enter(&mut self, path: &str) -> Option<Vec<String>> {
        if self.color(path) != Color::Gray {
            return None;
        }
        let referenced = self
            .graph
            .modules
            .get(path)
            .is_some_and(|m| !m.inverse_dependencies.is_empty());
        if referenced || self.is_entry(path) {
            self.scan_black(path);
            None
        } else {
            self.set_color(path, Color::White);
            Some(self.children(path))
        }
    }

    fn scan_black(&mut self, path: &str) {
        self.set_color(path, Color::Black);
        let mut stack = vec![Frame::new(path, self.children(path))];
        while let Some(frame) = stack.last_mut() {
            let Some(child) = frame.next_child() else {
                stack.pop();
                continue;
            };
            let parent = frame.path.clone();
            let Some(module) = self.module_mut(&child) else {
                continue;
            };
            module.inverse_dependencies.add(parent);
            if self.color(&child) != Color::Black {
                self.set_color(&child, Color::Black);
                stack.push(Frame::new(&child, self.children(&child)));
            }
        }
    }

    fn collect_white(&mut self, path: &str) {
        if !self.is_collectable(path) {
            return;
        }
        self.set_color(path, Color::Black);
        let mut stack = vec![Frame::new(path, self.children(path))];
        while let Some(frame) = stack.last_mut() {
            let Some(child) = frame.next_child() else {
                let path = frame.path.clone();
                stack.pop();
                debug!(file = %path, "Collecting module in unreachable cycle");
                self.free_module(&path);
                continue;
            };
            if self.graph.modules.contains_key(&child) && self.is_collectable(&child) {
                self.set_color(&child, Color::Black);
                stack.push(Frame::new(&child, self.children(&child)));
            }
        }
    }

    fn is_collectable(&self, path: &str) -> bool {
        self.color(path) == Color::White && !self.graph.possible_cycle_roots.contains(path)
    }

    fn report_progress(&self) {
        if let Some(on_progress) = &self.on_progress {
            on_progress(self.progress_done, self.progress_total);
        }
    }
}

impl Accumulator<String, TransformedFile> for Traversal<'_> {
    fn run(&mut self, path: &String) -> TaskOutcome<TransformedFile> {
        self.loader.load(path)
    }

    fn accumulate(&mut self, path: String, file: TransformedFile, next: &mut Vec<String>) -> Result<()> {
        self.loader.settle(&path, &file);
        self.process_module(path, file, next)?;
        self.progress_done += 1;
        self.report_progress();
        Ok(())
    }
}
