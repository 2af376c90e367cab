//! Artifact object storage.

mod fs;
mod memory;

pub use fs::FsObjectStore;
pub use memory::MemoryObjectStore;

use std::time::Duration;

use async_trait::async_trait;
use certbatch_core::{CertError, Result};

/// Key/value blob store holding chunk archives.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write (or overwrite) an object.
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<()>;

    /// Read an object; a missing key is `NotFound`.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Whether an object exists.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Keys under `prefix`, sorted. A prefix holding nothing is `NotFound`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Delete the given keys; returns how many existed.
    async fn delete_many(&self, keys: &[String]) -> Result<usize>;

    /// Time-limited retrieval URL for `key`.
    fn presign_get(&self, key: &str, ttl: Duration) -> Result<String>;
}

/// Unix timestamp `ttl` from now, as put in signed URLs.
pub(crate) fn expiry_timestamp(ttl: Duration) -> i64 {
    let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
    chrono::Utc::now().timestamp().saturating_add(ttl)
}

/// Reject keys that could escape the store's namespace.
pub(crate) fn check_key(key: &str) -> Result<()> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if bad {
        return Err(CertError::Storage(format!("invalid object key '{key}'")));
    }
    Ok(())
}
