//! Chunk store persisted as a single JSON document.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use certbatch_core::{ChunkRecord, Result, TaskRecord};
use tokio::sync::Mutex;
use tracing::debug;

use super::{ChunkStore, StoreState};

/// Chunk store backed by a JSON file.
///
/// Every mutation is applied to a copy of the state, written to a
/// sibling temp file and renamed over the original. A failed write leaves
/// both the file and the in-memory state unchanged.
pub struct FileChunkStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl FileChunkStore {
    /// Open the store at `path`, loading it if the file exists.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), "opened chunk store");
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn mutate<T>(&self, apply: impl FnOnce(&mut StoreState) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let value = apply(&mut next)?;
        persist(&self.path, &next).await?;
        *state = next;
        Ok(value)
    }
}

async fn persist(path: &Path, state: &StoreState) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_vec_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl ChunkStore for FileChunkStore {
    async fn create_task(&self, task: &TaskRecord, chunks: &[ChunkRecord]) -> Result<()> {
        self.mutate(|state| state.create_task(task, chunks)).await
    }

    async fn complete_chunk(
        &self,
        task_id: &str,
        chunk_id: u32,
        location: &str,
    ) -> Result<TaskRecord> {
        self.mutate(|state| state.complete_chunk(task_id, chunk_id, location))
            .await
    }

    async fn task(&self, task_id: &str) -> Result<TaskRecord> {
        self.state.lock().await.task(task_id)
    }

    async fn chunks(&self, task_id: &str) -> Result<Vec<ChunkRecord>> {
        self.state.lock().await.chunks(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certbatch_core::{CertificateInfo, TaskStatus};
    use chrono::Utc;

    fn task(id: &str) -> TaskRecord {
        TaskRecord {
            task_id: id.to_string(),
            batch_date: Utc::now(),
            chunks_total: 2,
            chunks_pending: 2,
            status: TaskStatus::Pending,
            ca_alias: "fleet".to_string(),
            cert_info: CertificateInfo::new("`dev-`0A${increment(20)}"),
        }
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("chunks.json");

        {
            let store = FileChunkStore::open(&path).await.unwrap();
            let record = task("t1");
            let chunks: Vec<_> = (1..=2)
                .map(|chunk_id| ChunkRecord::pending("t1", chunk_id, 10, record.batch_date))
                .collect();
            store.create_task(&record, &chunks).await.unwrap();
            store.complete_chunk("t1", 2, "t1/2/certs.zip").await.unwrap();
        }

        let store = FileChunkStore::open(&path).await.unwrap();
        let task = store.task("t1").await.unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.chunks_pending, 1);

        let chunks = store.chunks("t1").await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(!chunks[0].is_complete());
        assert_eq!(chunks[1].location.as_deref(), Some("t1/2/certs.zip"));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_large_plan_persists_in_one_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.json");
        let store = FileChunkStore::open(&path).await.unwrap();

        let record = TaskRecord {
            chunks_total: 400,
            chunks_pending: 400,
            ..task("big")
        };
        let chunks: Vec<_> = (1..=400)
            .map(|chunk_id| ChunkRecord::pending("big", chunk_id, 50, record.batch_date))
            .collect();
        store.create_task(&record, &chunks).await.unwrap();

        let on_disk: StoreState = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk.task("big").unwrap().chunks_total, 400);
        assert_eq!(on_disk.chunks("big").unwrap().len(), 400);
    }

    #[tokio::test]
    async fn test_failed_mutation_leaves_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileChunkStore::open(dir.path().join("chunks.json"))
            .await
            .unwrap();
        let record = task("t1");
        let short = [ChunkRecord::pending("t1", 1, 10, Utc::now())];
        assert!(store.create_task(&record, &short).await.is_err());
        assert!(!store.path().exists());
        assert!(store.task("t1").await.unwrap_err().is_not_found());
    }
}
