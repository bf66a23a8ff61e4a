use async_trait::async_trait;
use dashmap::DashMap;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use modgraph_core::{CacheKey, CacheStore, CacheStoreConfig, ModGraphError, Result, TransformResult};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task;

/// In-memory store, lives as long as the process.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<Vec<u8>, Arc<TransformResult>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<TransformResult>> {
        Ok(self
            .entries
            .get(&key.to_bytes())
            .map(|entry| entry.value().as_ref().clone()))
    }

    async fn set(&self, key: &CacheKey, value: &TransformResult) -> Result<()> {
        self.entries
            .entry(key.to_bytes())
            .or_insert_with(|| Arc::new(value.clone()));
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// One file per entry under `root/<first two hex chars>/<rest>`.
pub struct FileStore {
    root: PathBuf,
    gzip: bool,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            gzip: false,
        }
    }

    pub fn with_gzip(mut self, gzip: bool) -> Self {
        self.gzip = gzip;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        let hex = key.to_string();
        let (shard, rest) = hex.split_at(2.min(hex.len()));
        self.root.join(shard).join(rest)
    }

    fn decode(bytes: &[u8], gzip: bool) -> Result<TransformResult> {
        if gzip {
            let mut json = Vec::new();
            GzDecoder::new(bytes).read_to_end(&mut json)?;
            Ok(serde_json::from_slice(&json)?)
        } else {
            Ok(serde_json::from_slice(bytes)?)
        }
    }

    fn encode(value: &TransformResult, gzip: bool) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(value)?;
        if gzip {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&json)?;
            Ok(encoder.finish()?)
        } else {
            Ok(json)
        }
    }
}

#[async_trait]
impl CacheStore for FileStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<TransformResult>> {
        let path = self.path_for(key);
        let gzip = self.gzip;

        task::spawn_blocking(move || -> Result<Option<TransformResult>> {
            match std::fs::read(&path) {
                Ok(bytes) => Self::decode(&bytes, gzip).map(Some),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(ModGraphError::Io(e)),
            }
        })
        .await
        .map_err(|e| ModGraphError::CacheRead(format!("Task failed: {}", e)))?
    }

    async fn set(&self, key: &CacheKey, value: &TransformResult) -> Result<()> {
        let path = self.path_for(key);
        let bytes = Self::encode(value, self.gzip)?;

        task::spawn_blocking(move || -> Result<()> {
            let dir = path
                .parent()
                .ok_or_else(|| ModGraphError::CacheWrite(format!("no parent for {}", path.display())))?;
            std::fs::create_dir_all(dir)?;
            // readers never observe a partially written entry
            let tmp = dir.join(format!(
                ".{}.{}.tmp",
                std::process::id(),
                TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
            ));
            std::fs::write(&tmp, &bytes)?;
            std::fs::rename(&tmp, &path)?;
            Ok(())
        })
        .await
        .map_err(|e| ModGraphError::CacheWrite(format!("Task failed: {}", e)))?
    }

    fn name(&self) -> &str {
        "file"
    }
}

/// Instantiate the configured stores in lookup order.
pub fn build_stores(configs: &[CacheStoreConfig]) -> Vec<Arc<dyn CacheStore>> {
    configs
        .iter()
        .map(|config| -> Arc<dyn CacheStore> {
            match config {
                CacheStoreConfig::Memory => Arc::new(MemoryStore::new()),
                CacheStoreConfig::File { root, gzip } => {
                    Arc::new(FileStore::new(root.clone()).with_gzip(*gzip))
                }
            }
        })
        .collect()
}
