use crate::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

/// Hash of a serializable value that is identical across processes.
///
/// The value goes through `serde_json::Value` first so object keys are
/// emitted in sorted order.
pub fn stable_hash<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let canonical = serde_json::to_value(value)?;
    let bytes = serde_json::to_vec(&canonical)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hasher.finalize().to_vec())
}

/// Hex sha-256 of raw file bytes.
pub fn content_digest(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// `path` relative to `root`, `/`-separated, so keys match across machines.
pub fn normalize_relative_path(root: &Path, path: &str) -> String {
    match Path::new(path).strip_prefix(root) {
        Ok(relative) => relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => path.replace('\\', "/"),
    }
}

pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Two-part cache key: the partial key is known before the file is read,
/// the digest only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub partial: Vec<u8>,
    pub digest: String,
}

impl CacheKey {
    pub fn new(partial: Vec<u8>, digest: impl Into<String>) -> Self {
        Self {
            partial,
            digest: digest.into(),
        }
    }

    /// `partial ++ digest`, the form stores persist.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.partial.len() + self.digest.len());
        out.extend_from_slice(&self.partial);
        out.extend_from_slice(self.digest.as_bytes());
        out
    }

    pub fn partial_hex(&self) -> String {
        to_hex(&self.partial)
    }

    pub fn with_digest(&self, digest: impl Into<String>) -> Self {
        Self::new(self.partial.clone(), digest)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.partial_hex(), self.digest)
    }
}
