use crate::delta_calculator::{DeltaCalculator, DeltaOptions, DeltaResult};
use crate::loader::{CacheLoader, ModuleLoader};
use crate::module::BuildResult;
use crate::traversal::{build_graph, BuildOptions};
use dashmap::DashMap;
use modgraph_cache::{build_stores, TransformCache, TransformCacheConfig};
use modgraph_core::{
    ChangeSource, ModGraphConfig, ModGraphError, Resolver, Result, TransformOptions, Transformer,
};
use modgraph_worker::{WorkerFarm, WorkerFarmConfig};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub type GraphId = Uuid;

/// One bundling session: a transform cache backed by a worker farm, plus the
/// incremental graphs created against it.
pub struct Bundler {
    resolver: Arc<dyn Resolver>,
    cache: Arc<TransformCache>,
    change_source: Arc<dyn ChangeSource>,
    graphs: DashMap<GraphId, Arc<DeltaCalculator>>,
}

impl Bundler {
    pub fn new(
        resolver: Arc<dyn Resolver>,
        cache: Arc<TransformCache>,
        change_source: Arc<dyn ChangeSource>,
    ) -> Self {
        Self {
            resolver,
            cache,
            change_source,
            graphs: DashMap::new(),
        }
    }

    /// Wire up the farm, stores and cache described by `config`.
    pub fn from_config(
        config: &ModGraphConfig,
        transformer: Arc<dyn Transformer>,
        resolver: Arc<dyn Resolver>,
        change_source: Arc<dyn ChangeSource>,
    ) -> Result<Self> {
        let farm = Arc::new(WorkerFarm::new(transformer, WorkerFarmConfig::from_config(config))?);
        let stores = build_stores(&config.cache.stores);
        info!(
            "Starting bundler for {} ({} workers, {} cache stores)",
            config.project_root.display(),
            farm.unit_count(),
            stores.len()
        );
        let cache = TransformCache::new(TransformCacheConfig::from_config(config), farm, stores)?;
        Ok(Self::new(resolver, Arc::new(cache), change_source))
    }

    pub fn cache(&self) -> &Arc<TransformCache> {
        &self.cache
    }

    pub fn graph_count(&self) -> usize {
        self.graphs.len()
    }

    pub fn loader(&self, options: &TransformOptions) -> Arc<dyn ModuleLoader> {
        Arc::new(CacheLoader::new(self.cache.clone(), options.clone()))
    }

    /// One-shot build of everything reachable from `entry_points`.
    pub async fn build(&self, entry_points: &[String], options: &TransformOptions) -> Result<BuildResult> {
        let build_options = BuildOptions {
            platform: options.platform.clone(),
            ..BuildOptions::default()
        };
        build_graph(
            entry_points,
            self.resolver.as_ref(),
            self.loader(options),
            &build_options,
        )
        .await
    }

    /// Register an incremental graph. Nothing is built until the first
    /// `get_delta`.
    pub fn create_graph(&self, entry_points: Vec<String>, options: TransformOptions) -> GraphId {
        let id = Uuid::new_v4();
        let calculator = DeltaCalculator::new(
            entry_points,
            options.clone(),
            self.resolver.clone(),
            self.loader(&options),
            self.change_source.as_ref(),
        );
        self.graphs.insert(id, Arc::new(calculator));
        id
    }

    pub fn calculator(&self, id: &GraphId) -> Result<Arc<DeltaCalculator>> {
        self.graphs
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ModGraphError::GraphNotFound(id.to_string()))
    }

    pub async fn get_delta(&self, id: &GraphId, options: DeltaOptions) -> Result<DeltaResult> {
        let calculator = self.calculator(id)?;
        calculator.get_delta(options).await
    }

    pub fn end_graph(&self, id: &GraphId) -> Result<()> {
        let (_, calculator) = self
            .graphs
            .remove(id)
            .ok_or_else(|| ModGraphError::GraphNotFound(id.to_string()))?;
        calculator.end();
        Ok(())
    }

    /// End every graph, wait for pending cache writes and stop the farm.
    pub async fn end(&self) {
        let ids: Vec<GraphId> = self.graphs.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, calculator)) = self.graphs.remove(&id) {
                calculator.end();
            }
        }
        self.cache.flush().await;
        self.cache.farm().kill();
        info!("Bundler ended");
    }
}
