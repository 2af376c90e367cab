use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use certbatch_core::{CertError, Result};
use tokio::sync::RwLock;
use url::Url;

use super::{check_key, expiry_timestamp, ObjectStore};

/// Object store held in process memory.
///
/// Signed URLs look like `memory://{bucket}/{key}?expires={unix}`.
pub struct MemoryObjectStore {
    bucket: String,
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    /// Create an empty bucket.
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Whether the bucket is empty.
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<()> {
        check_key(key)?;
        self.objects.write().await.insert(key.to_string(), body);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| CertError::not_found(format!("object {key}")))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.read().await.contains_key(key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let keys: Vec<String> = self
            .objects
            .read()
            .await
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        if keys.is_empty() {
            return Err(CertError::not_found(format!("objects under {prefix}")));
        }
        Ok(keys)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<usize> {
        let mut objects = self.objects.write().await;
        Ok(keys.iter().filter(|key| objects.remove(*key).is_some()).count())
    }

    fn presign_get(&self, key: &str, ttl: Duration) -> Result<String> {
        check_key(key)?;
        let mut url = Url::parse(&format!("memory://{}/{key}", self.bucket))
            .map_err(|e| CertError::Storage(format!("bad object url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("expires", &expiry_timestamp(ttl).to_string());
        Ok(url.into())
    }
}
