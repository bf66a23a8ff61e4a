use async_trait::async_trait;
use modgraph_cache::{Cache, MemoryStore, MetricsCollector, TransformCache, TransformCacheConfig};
use modgraph_core::{
    content_digest, CacheKey, CacheStore, DependencyDescriptor, ModGraphError, ModuleOutput,
    Result, TransformContext, TransformFailure, TransformOptions, TransformResult, Transformer,
    TransformerConfig,
};
use modgraph_worker::{WorkerFarm, WorkerFarmConfig};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

struct LineTransformer;

impl Transformer for LineTransformer {
    fn transform(
        &self,
        source: &[u8],
        _context: &TransformContext,
    ) -> std::result::Result<TransformResult, TransformFailure> {
        let text = String::from_utf8_lossy(source);
        Ok(TransformResult {
            dependencies: text
                .lines()
                .filter_map(|l| l.strip_prefix("import "))
                .map(DependencyDescriptor::new)
                .collect(),
            output: vec![ModuleOutput::new("js/module", serde_json::json!({ "code": text }))],
        })
    }
}

/// Counts calls; optionally fails reads or writes.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    gets: AtomicUsize,
    fail_get: bool,
    fail_set: bool,
}

#[async_trait]
impl CacheStore for FlakyStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<TransformResult>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.fail_get {
            return Err(ModGraphError::CacheRead("store offline".into()));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &CacheKey, value: &TransformResult) -> Result<()> {
        if self.fail_set {
            return Err(ModGraphError::CacheWrite("disk full".into()));
        }
        self.inner.set(key, value).await
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

fn config(root: &Path, version: &str) -> TransformCacheConfig {
    TransformCacheConfig {
        project_root: root.to_path_buf(),
        cache_version: version.to_string(),
        transformer: TransformerConfig::default(),
    }
}

fn farm(root: &Path) -> Arc<WorkerFarm> {
    Arc::new(WorkerFarm::new(Arc::new(LineTransformer), WorkerFarmConfig::in_process(root)).unwrap())
}

fn write(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path.to_string_lossy().to_string()
}

#[tokio::test]
async fn second_transform_is_served_from_cache() {
    let dir = TempDir::new().unwrap();
    let path = write(dir.path(), "a.js", "import ./b");
    let farm = farm(dir.path());
    let cache = TransformCache::new(
        config(dir.path(), "1"),
        farm.clone(),
        vec![Arc::new(MemoryStore::new())],
    )
    .unwrap();
    let options = TransformOptions::dev();

    let first = cache.transform_file(&path, &options).await.unwrap();
    cache.flush().await;
    let second = cache.transform_file(&path, &options).await.unwrap();

    assert_eq!(first.digest, second.digest);
    assert_eq!(first.result, second.result);
    assert_eq!(farm.transform_count(), 1);
    let metrics = cache.metrics();
    assert_eq!((metrics.hits, metrics.misses), (1, 1));
}

#[tokio::test]
async fn different_options_miss() {
    let dir = TempDir::new().unwrap();
    let path = write(dir.path(), "a.js", "x");
    let farm = farm(dir.path());
    let cache =
        TransformCache::new(config(dir.path(), "1"), farm.clone(), vec![Arc::new(MemoryStore::new())])
            .unwrap();

    cache.transform_file(&path, &TransformOptions::dev()).await.unwrap();
    cache.flush().await;
    cache
        .transform_file(&path, &TransformOptions::dev().for_platform("ios"))
        .await
        .unwrap();
    assert_eq!(farm.transform_count(), 2);
}

#[tokio::test]
async fn partial_keys_are_reproducible_across_instances() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("src/a.js").to_string_lossy().to_string();
    let options = TransformOptions::dev();

    let a = TransformCache::new(config(dir.path(), "1"), farm(dir.path()), vec![]).unwrap();
    let b = TransformCache::new(config(dir.path(), "1"), farm(dir.path()), vec![]).unwrap();
    let c = TransformCache::new(config(dir.path(), "2"), farm(dir.path()), vec![]).unwrap();

    assert_eq!(a.partial_key(&path, &options).unwrap(), b.partial_key(&path, &options).unwrap());
    assert_ne!(a.partial_key(&path, &options).unwrap(), c.partial_key(&path, &options).unwrap());
}

#[tokio::test]
async fn result_is_stored_under_the_workers_digest() {
    let dir = TempDir::new().unwrap();
    let path = write(dir.path(), "a.js", "on disk");
    let store = Arc::new(MemoryStore::new());
    let cache =
        TransformCache::new(config(dir.path(), "1"), farm(dir.path()), vec![store.clone()]).unwrap();
    let options = TransformOptions::default();

    // caller read stale bytes
    let out = cache.get(&path, b"stale read", &options).await.unwrap();
    cache.flush().await;
    assert_eq!(out.digest, content_digest(b"on disk"));

    let partial = cache.partial_key(&path, &options).unwrap();
    let stale = CacheKey::new(partial.clone(), content_digest(b"stale read"));
    let fresh = CacheKey::new(partial, content_digest(b"on disk"));
    assert!(store.get(&stale).await.unwrap().is_none());
    assert!(store.get(&fresh).await.unwrap().is_some());
}

#[tokio::test]
async fn write_failures_are_reported_not_returned() {
    let dir = TempDir::new().unwrap();
    let path = write(dir.path(), "a.js", "x");
    let store = Arc::new(FlakyStore {
        fail_set: true,
        ..FlakyStore::default()
    });
    let cache =
        TransformCache::new(config(dir.path(), "1"), farm(dir.path()), vec![store]).unwrap();

    cache.transform_file(&path, &TransformOptions::default()).await.unwrap();
    cache.flush().await;
    assert_eq!(cache.metrics().write_failures, 1);
}

#[tokio::test]
async fn read_failures_fail_the_caller_without_transforming() {
    let dir = TempDir::new().unwrap();
    let path = write(dir.path(), "a.js", "x");
    let farm = farm(dir.path());
    let reporter = Arc::new(MetricsCollector::new());
    let store = Arc::new(FlakyStore {
        fail_get: true,
        ..FlakyStore::default()
    });
    let cache = TransformCache::with_reporter(
        config(dir.path(), "1"),
        farm.clone(),
        vec![store],
        reporter.clone(),
    )
    .unwrap();

    let err = cache
        .transform_file(&path, &TransformOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ModGraphError::CacheRead(_)));
    assert_eq!(farm.transform_count(), 0);
    assert_eq!(reporter.snapshot().read_failures, 1);
    assert_eq!(cache.metrics().read_failures, 1);
}

#[tokio::test]
async fn unreadable_files_surface_io_errors() {
    let dir = TempDir::new().unwrap();
    let cache = TransformCache::new(config(dir.path(), "1"), farm(dir.path()), vec![]).unwrap();
    let missing = dir.path().join("gone.js").to_string_lossy().to_string();
    let err = cache
        .transform_file(&missing, &TransformOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn composite_get_stops_at_first_hit() {
    let first = Arc::new(FlakyStore::default());
    let second = Arc::new(FlakyStore::default());
    let third = Arc::new(FlakyStore::default());
    let key = CacheKey::new(vec![1, 2], "ab");
    second.inner.set(&key, &TransformResult::default()).await.unwrap();

    let cache = Cache::new(
        vec![first.clone(), second.clone(), third.clone()],
        Arc::new(MetricsCollector::new()),
    );
    assert!(cache.get(&key).await.unwrap().is_some());
    assert_eq!(first.gets.load(Ordering::SeqCst), 1);
    assert_eq!(second.gets.load(Ordering::SeqCst), 1);
    assert_eq!(third.gets.load(Ordering::SeqCst), 0);

    // set after a hit only backfills the stores in front of the hit
    cache.set(key.clone(), Arc::new(TransformResult::default()));
    cache.flush().await;
    assert!(first.inner.get(&key).await.unwrap().is_some());
    assert!(third.inner.get(&key).await.unwrap().is_none());

    let missing = CacheKey::new(vec![3], "cd");
    assert!(cache.get(&missing).await.unwrap().is_none());
    assert_eq!(third.gets.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn hit_in_a_later_store_backfills_earlier_ones() {
    let dir = TempDir::new().unwrap();
    let path = write(dir.path(), "a.js", "x");
    let farm = farm(dir.path());
    let local = Arc::new(MemoryStore::new());
    let shared = Arc::new(MemoryStore::new());

    let warm = TransformCache::new(config(dir.path(), "1"), farm.clone(), vec![shared.clone()]).unwrap();
    warm.transform_file(&path, &TransformOptions::default()).await.unwrap();
    warm.flush().await;

    let layered = TransformCache::new(
        config(dir.path(), "1"),
        farm.clone(),
        vec![local.clone(), shared.clone()],
    )
    .unwrap();
    layered.transform_file(&path, &TransformOptions::default()).await.unwrap();
    layered.flush().await;

    assert_eq!(farm.transform_count(), 1);
    assert_eq!(local.len(), 1);
    assert_eq!(shared.len(), 1);
}
