use modgraph_core::{CacheKey, CacheReporter, CacheStore, ModGraphError, Result, TransformResult};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::trace;

/// Fan-out over several stores, consulted in order.
///
/// Reads stop at the first store that has the key. A later `set` for that key
/// only writes the stores in front of the one that answered, which backfills
/// fast local stores from slower shared ones.
pub struct Cache {
    stores: Vec<Arc<dyn CacheStore>>,
    hits: DashMap<CacheKey, usize>,
    reporter: Arc<dyn CacheReporter>,
    writes: Mutex<Vec<JoinHandle<()>>>,
}

impl Cache {
    pub fn new(stores: Vec<Arc<dyn CacheStore>>, reporter: Arc<dyn CacheReporter>) -> Self {
        Self {
            stores,
            hits: DashMap::new(),
            reporter,
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn store_count(&self) -> usize {
        self.stores.len()
    }

    pub async fn get(&self, key: &CacheKey) -> Result<Option<TransformResult>> {
        for (index, store) in self.stores.iter().enumerate() {
            match store.get(key).await {
                Ok(Some(value)) => {
                    trace!(store = store.name(), "cache hit");
                    self.hits.insert(key.clone(), index);
                    return Ok(Some(value));
                }
                Ok(None) => continue,
                Err(e) => {
                    let message = e.to_string();
                    self.reporter.cache_read_failed(store.name(), key, &message);
                    return Err(ModGraphError::CacheRead(format!("{}: {}", store.name(), message)));
                }
            }
        }
        Ok(None)
    }

    /// Fire-and-forget write. Failures go to the reporter, never to the caller.
    pub fn set(&self, key: CacheKey, value: Arc<TransformResult>) {
        let limit = self
            .hits
            .remove(&key)
            .map(|(_, index)| index)
            .unwrap_or(self.stores.len());
        if limit == 0 {
            return;
        }

        let stores: Vec<Arc<dyn CacheStore>> = self.stores[..limit].to_vec();
        let reporter = self.reporter.clone();
        let handle = tokio::spawn(async move {
            for store in stores {
                if let Err(e) = store.set(&key, &value).await {
                    reporter.cache_write_failed(store.name(), &key, &e.to_string());
                }
            }
        });

        let mut writes = self.writes.lock();
        writes.retain(|h| !h.is_finished());
        writes.push(handle);
    }

    /// Wait for every write issued so far.
    pub async fn flush(&self) {
        let pending = std::mem::take(&mut *self.writes.lock());
        for handle in pending {
            let _ = handle.await;
        }
    }
}
