use async_trait::async_trait;
use certbatch_core::{ChunkRecord, Result, TaskRecord};
use tokio::sync::RwLock;

use super::{ChunkStore, StoreState};

/// Chunk store held in process memory.
#[derive(Default)]
pub struct MemoryChunkStore {
    state: RwLock<StoreState>,
}

impl MemoryChunkStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn create_task(&self, task: &TaskRecord, chunks: &[ChunkRecord]) -> Result<()> {
        self.state.write().await.create_task(task, chunks)
    }

    async fn complete_chunk(
        &self,
        task_id: &str,
        chunk_id: u32,
        location: &str,
    ) -> Result<TaskRecord> {
        self.state
            .write()
            .await
            .complete_chunk(task_id, chunk_id, location)
    }

    async fn task(&self, task_id: &str) -> Result<TaskRecord> {
        self.state.read().await.task(task_id)
    }

    async fn chunks(&self, task_id: &str) -> Result<Vec<ChunkRecord>> {
        self.state.read().await.chunks(task_id)
    }
}
