//! Object store on the local filesystem.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use certbatch_core::{CertError, Result};
use tracing::debug;
use url::Url;

use super::{check_key, expiry_timestamp, ObjectStore};

/// Objects stored as files under a root directory; keys map to relative
/// paths. Signed URLs are `file://` URLs carrying an `expires` parameter.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Use `root` as the bucket, creating it if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let root = if root.is_absolute() {
            root
        } else {
            std::env::current_dir()?.join(root)
        };
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Bucket root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        check_key(key)?;
        Ok(self.root.join(key))
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(parts.join("/"))
    }

    /// Remove empty directories between `dir` and the root.
    async fn prune(&self, mut dir: PathBuf) {
        while dir.starts_with(&self.root) && dir != self.root {
            if tokio::fs::remove_dir(&dir).await.is_err() {
                break;
            }
            match dir.parent() {
                Some(parent) => dir = parent.to_path_buf(),
                None => break,
            }
        }
    }
}

fn not_found(key: &str) -> impl FnOnce(std::io::Error) -> CertError + '_ {
    move |e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            CertError::not_found(format!("object {key}"))
        } else {
            CertError::Storage(format!("{key}: {e}"))
        }
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("part");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(key, path = %path.display(), "stored object");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path).await.map_err(not_found(key))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(&path).await? && path.is_file())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        // Walk only the deepest directory the prefix names.
        let dir = match prefix.rsplit_once('/') {
            Some((dir, _)) => self.path_for(dir)?,
            None => self.root.clone(),
        };
        if !tokio::fs::try_exists(&dir).await? {
            return Err(CertError::not_found(format!("objects under {prefix}")));
        }

        let mut keys = Vec::new();
        let mut pending = vec![dir];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if let Some(key) = self.key_for(&path) {
                    if key.starts_with(prefix) && !key.ends_with(".part") {
                        keys.push(key);
                    }
                }
            }
        }

        if keys.is_empty() {
            return Err(CertError::not_found(format!("objects under {prefix}")));
        }
        keys.sort();
        Ok(keys)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<usize> {
        let mut deleted = 0;
        for key in keys {
            let path = self.path_for(key)?;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => deleted += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(CertError::Storage(format!("{key}: {e}"))),
            }
            if let Some(parent) = path.parent() {
                self.prune(parent.to_path_buf()).await;
            }
        }
        Ok(deleted)
    }

    fn presign_get(&self, key: &str, ttl: Duration) -> Result<String> {
        let path = self.path_for(key)?;
        let mut url = Url::from_file_path(&path)
            .map_err(|()| CertError::Storage(format!("no file url for {}", path.display())))?;
        url.query_pairs_mut()
            .append_pair("expires", &expiry_timestamp(ttl).to_string());
        Ok(url.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip_and_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path()).unwrap();

        store.put("certs/t1/1/certs.zip", b"a".to_vec()).await.unwrap();
        store.put("certs/t1/2/certs.zip", b"b".to_vec()).await.unwrap();
        store.put("certs/t2/1/certs.zip", b"c".to_vec()).await.unwrap();

        assert_eq!(store.get("certs/t1/1/certs.zip").await.unwrap(), b"a");
        assert!(store.exists("certs/t1/2/certs.zip").await.unwrap());
        assert!(!store.exists("certs/t1/3/certs.zip").await.unwrap());
        assert!(store.get("certs/t1/3/certs.zip").await.unwrap_err().is_not_found());

        let keys = store.list("certs/t1/").await.unwrap();
        assert_eq!(keys, vec!["certs/t1/1/certs.zip", "certs/t1/2/certs.zip"]);
    }

    #[tokio::test]
    async fn test_delete_prunes_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path()).unwrap();
        store.put("t1/1/certs.zip", b"a".to_vec()).await.unwrap();
        store.put("t1/2/certs.zip", b"b".to_vec()).await.unwrap();

        let keys = store.list("t1/").await.unwrap();
        assert_eq!(store.delete_many(&keys).await.unwrap(), 2);
        assert!(!dir.path().join("t1").exists());
        assert!(dir.path().exists());
        assert!(store.list("t1/").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_never_written_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path()).unwrap();
        assert!(store.list("ghost/").await.unwrap_err().is_not_found());
    }

    #[test]
    fn test_presign_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path()).unwrap();
        let url = store
            .presign_get("t1/1/certs.zip", Duration::from_secs(60))
            .unwrap();
        let parsed = Url::parse(&url).unwrap();
        assert_eq!(parsed.scheme(), "file");
        assert!(parsed.path().ends_with("/t1/1/certs.zip"));
        assert!(parsed.query().unwrap_or_default().starts_with("expires="));
    }
}
