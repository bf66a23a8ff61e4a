use crate::{
    CacheKey, ChangeBatch, DependencyDescriptor, ResolutionError, Result, TransformContext,
    TransformFailure, TransformResult,
};
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Maps a dependency reference to an absolute path.
///
/// Must be pure for the lifetime of a build: the traversal memoizes by the
/// resolved path and the delta calculator diffs edges by it.
pub trait Resolver: Send + Sync {
    fn resolve(
        &self,
        origin: Option<&str>,
        dependency: &DependencyDescriptor,
        platform: Option<&str>,
    ) -> std::result::Result<String, ResolutionError>;
}

/// The per-file content transform. Runs on worker units, never on the
/// coordinating task.
pub trait Transformer: Send + Sync {
    fn transform(
        &self,
        source: &[u8],
        context: &TransformContext,
    ) -> std::result::Result<TransformResult, TransformFailure>;
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<TransformResult>>;
    async fn set(&self, key: &CacheKey, value: &TransformResult) -> Result<()>;

    fn name(&self) -> &str {
        "store"
    }
}

/// Observability sink for cache failures that are not surfaced to callers.
pub trait CacheReporter: Send + Sync {
    fn cache_read_failed(&self, store: &str, key: &CacheKey, error: &str);
    fn cache_write_failed(&self, store: &str, key: &CacheKey, error: &str);
}

/// A stream of batched file change events.
pub trait ChangeSource: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<ChangeBatch>;
}
