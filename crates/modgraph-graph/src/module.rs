use crate::counting_set::CountingSet;
use indexmap::IndexMap;
use modgraph_core::{content_digest, ModuleOutput, ResolvedDependency, TransformResult};
use std::sync::Arc;

/// A node of the dependency graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub path: String,
    /// Resolved outgoing edges, keyed by dependency key in source order.
    pub dependencies: IndexMap<String, ResolvedDependency>,
    /// Referrers, counted once per edge.
    pub inverse_dependencies: CountingSet<String>,
    pub transform: Arc<TransformResult>,
    pub digest: String,
}

impl Module {
    pub fn output(&self) -> &[ModuleOutput] {
        &self.transform.output
    }

    /// Distinct dependency targets, in edge order.
    pub fn dependency_paths(&self) -> impl Iterator<Item = &str> {
        self.dependencies.values().map(|d| d.absolute_path.as_str())
    }

    /// A module that exists only in the bundle, never on disk.
    pub fn virtual_script(path: impl Into<String>, code: impl Into<String>) -> Self {
        let code = code.into();
        let digest = content_digest(code.as_bytes());
        let line_count = code.lines().count().max(1);
        Self {
            path: path.into(),
            dependencies: IndexMap::new(),
            inverse_dependencies: CountingSet::new(),
            transform: Arc::new(TransformResult {
                dependencies: Vec::new(),
                output: vec![ModuleOutput::new(
                    "js/script/virtual",
                    serde_json::json!({
                        "code": code,
                        "lineCount": line_count,
                        "map": [],
                    }),
                )],
            }),
            digest,
        }
    }
}

/// Output of a one-shot traversal.
#[derive(Debug, Clone, Default)]
pub struct BuildResult {
    /// Every reachable module, depth-first pre-order from the entries.
    pub modules: Vec<Arc<Module>>,
    /// The modules the entry points resolved to, in entry order.
    pub entry_modules: Vec<Arc<Module>>,
}

impl BuildResult {
    pub fn get(&self, path: &str) -> Option<&Arc<Module>> {
        self.modules.iter().find(|m| m.path == path)
    }

    pub fn paths(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.path.as_str()).collect()
    }
}
