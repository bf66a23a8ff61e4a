use crate::module::Module;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Path of the generated module that defines build-time globals.
pub const PRELUDE_PATH: &str = "__prelude__";

#[derive(Debug, Clone, Default)]
pub struct PreludeOptions {
    pub dev: bool,
    /// Extra globals, emitted as `name=<json value>`.
    pub globals: BTreeMap<String, serde_json::Value>,
}

impl PreludeOptions {
    pub fn dev() -> Self {
        Self {
            dev: true,
            ..Self::default()
        }
    }

    pub fn with_global(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.globals.insert(name.into(), value);
        self
    }
}

pub fn prelude_code(options: &PreludeOptions) -> String {
    let mut vars = vec![
        "__BUNDLE_START_TIME__=this.nativePerformanceNow?nativePerformanceNow():Date.now()".to_string(),
        format!("__DEV__={}", options.dev),
        "process=this.process||{}".to_string(),
    ];
    for (name, value) in &options.globals {
        vars.push(format!("{}={}", name, value));
    }
    let env = if options.dev { "development" } else { "production" };
    format!(
        "var {};process.env=process.env||{{}};process.env.NODE_ENV=process.env.NODE_ENV||\"{}\";",
        vars.join(","),
        env
    )
}

pub fn prelude_module(options: &PreludeOptions) -> Arc<Module> {
    Arc::new(Module::virtual_script(PRELUDE_PATH, prelude_code(options)))
}

/// Lay out the final module sequence: the module-system loader, each
/// polyfill graph in order, the prelude, then the entry graph.
///
/// `post_process` may reorder or filter the entry graph only; the scripts in
/// front of it keep their positions.
pub fn assemble<F>(
    entry_graph: Vec<Arc<Module>>,
    module_system: &[Arc<Module>],
    polyfills: &[Vec<Arc<Module>>],
    prelude: &PreludeOptions,
    post_process: F,
) -> Vec<Arc<Module>>
where
    F: FnOnce(Vec<Arc<Module>>) -> Vec<Arc<Module>>,
{
    let entry_graph = post_process(entry_graph);
    let polyfill_count: usize = polyfills.iter().map(Vec::len).sum();

    let mut modules = Vec::with_capacity(module_system.len() + polyfill_count + 1 + entry_graph.len());
    modules.extend(module_system.iter().cloned());
    for polyfill in polyfills {
        modules.extend(polyfill.iter().cloned());
    }
    modules.push(prelude_module(prelude));
    modules.extend(entry_graph);
    modules
}
