use crate::cache::Cache;
use crate::metrics::{CacheMetrics, ForwardingReporter, MetricsCollector};
use modgraph_core::{
    content_digest, normalize_relative_path, stable_hash, to_hex, CacheKey, CacheReporter,
    CacheStore, ModGraphConfig, Result, TransformOptions, TransformedFile, TransformerConfig,
};
use modgraph_worker::WorkerFarm;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct TransformCacheConfig {
    pub project_root: PathBuf,
    pub cache_version: String,
    pub transformer: TransformerConfig,
}

impl TransformCacheConfig {
    pub fn from_config(config: &ModGraphConfig) -> Self {
        Self {
            project_root: config.project_root.clone(),
            cache_version: config.cache_version.clone(),
            transformer: config.transformer.clone(),
        }
    }
}

#[derive(Serialize)]
struct BaseKey<'a> {
    cache_version: &'a str,
    project_root: String,
    transformer: &'a TransformerConfig,
}

/// Serves transform results by content-addressed key, falling back to the
/// worker farm.
pub struct TransformCache {
    cache: Cache,
    farm: Arc<WorkerFarm>,
    base_hash: String,
    project_root: PathBuf,
    metrics: Arc<MetricsCollector>,
}

impl TransformCache {
    pub fn new(
        config: TransformCacheConfig,
        farm: Arc<WorkerFarm>,
        stores: Vec<Arc<dyn CacheStore>>,
    ) -> Result<Self> {
        let metrics = Arc::new(MetricsCollector::new());
        Self::build(config, farm, stores, metrics.clone(), metrics)
    }

    /// Like `new`, but failures are also passed on to `reporter`.
    pub fn with_reporter(
        config: TransformCacheConfig,
        farm: Arc<WorkerFarm>,
        stores: Vec<Arc<dyn CacheStore>>,
        reporter: Arc<dyn CacheReporter>,
    ) -> Result<Self> {
        let metrics = Arc::new(MetricsCollector::new());
        let forwarding = Arc::new(ForwardingReporter {
            metrics: metrics.clone(),
            inner: reporter,
        });
        Self::build(config, farm, stores, metrics, forwarding)
    }

    fn build(
        config: TransformCacheConfig,
        farm: Arc<WorkerFarm>,
        stores: Vec<Arc<dyn CacheStore>>,
        metrics: Arc<MetricsCollector>,
        reporter: Arc<dyn CacheReporter>,
    ) -> Result<Self> {
        let base_hash = to_hex(&stable_hash(&BaseKey {
            cache_version: &config.cache_version,
            project_root: config.project_root.to_string_lossy().to_string(),
            transformer: &config.transformer,
        })?);

        Ok(Self {
            cache: Cache::new(stores, reporter),
            farm,
            base_hash,
            project_root: config.project_root,
            metrics,
        })
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn farm(&self) -> &Arc<WorkerFarm> {
        &self.farm
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.metrics.snapshot()
    }

    /// Everything but the content digest; computable before reading the file.
    pub fn partial_key(&self, path: &str, options: &TransformOptions) -> Result<Vec<u8>> {
        let local_path = normalize_relative_path(&self.project_root, path);
        stable_hash(&(&self.base_hash, options, local_path))
    }

    pub async fn get(
        &self,
        path: &str,
        content: &[u8],
        options: &TransformOptions,
    ) -> Result<TransformedFile> {
        let key = CacheKey::new(self.partial_key(path, options)?, content_digest(content));

        if let Some(result) = self.cache.get(&key).await? {
            self.metrics.record_hit();
            let result = Arc::new(result);
            self.cache.set(key.clone(), result.clone());
            return Ok(TransformedFile {
                result,
                digest: key.digest,
            });
        }

        self.metrics.record_miss();
        let transformed = self.farm.transform(path, options).await?;

        // the file may have changed between our read and the worker's
        let full_key = if transformed.digest == key.digest {
            key
        } else {
            debug!(file = %path, "Content changed during transform, re-keying cache entry");
            key.with_digest(transformed.digest.clone())
        };
        self.cache.set(full_key, transformed.result.clone());

        Ok(transformed)
    }

    /// Read the file, then `get`. An unreadable file fails the call.
    pub async fn transform_file(&self, path: &str, options: &TransformOptions) -> Result<TransformedFile> {
        let content = tokio::fs::read(path).await?;
        self.get(path, &content, options).await
    }

    /// Wait for outstanding cache writes.
    pub async fn flush(&self) {
        self.cache.flush().await;
    }
}
