//! Task and chunk bookkeeping.
//!
//! The task record carries an explicit status and pending counter. A task
//! is written together with all of its chunk records, and the counters are
//! updated in the same critical section as the chunk that completes, so
//! they always agree with the chunk records and a status read never has to
//! scan them.

mod file;
mod memory;

pub use file::FileChunkStore;
pub use memory::MemoryChunkStore;

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use certbatch_core::{CertError, ChunkRecord, ChunkStatus, Result, TaskRecord, TaskStatus};
use serde::{Deserialize, Serialize};

/// Durable per-chunk record store backing status queries.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Persist a freshly planned task and every one of its chunk records
    /// in a single write. Either all of them are stored or none is.
    async fn create_task(&self, task: &TaskRecord, chunks: &[ChunkRecord]) -> Result<()>;

    /// Record a chunk's artifact location and update the task counters.
    ///
    /// Completing an already completed chunk only rewrites its location.
    async fn complete_chunk(&self, task_id: &str, chunk_id: u32, location: &str)
        -> Result<TaskRecord>;

    /// Task record, or `NotFound` if it has no chunk records.
    async fn task(&self, task_id: &str) -> Result<TaskRecord>;

    /// Every chunk of a task in chunk order, or `NotFound` if there are none.
    async fn chunks(&self, task_id: &str) -> Result<Vec<ChunkRecord>>;
}

/// State shared by the store implementations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StoreState {
    #[serde(default)]
    tasks: HashMap<String, TaskRecord>,
    #[serde(default)]
    chunks: HashMap<String, BTreeMap<u32, ChunkRecord>>,
}

impl StoreState {
    pub(crate) fn create_task(&mut self, task: &TaskRecord, chunks: &[ChunkRecord]) -> Result<()> {
        if self.tasks.contains_key(&task.task_id) {
            return Err(CertError::Storage(format!(
                "task {} already exists",
                task.task_id
            )));
        }
        if let Some(stray) = chunks.iter().find(|c| c.task_id != task.task_id) {
            return Err(CertError::invalid(format!(
                "chunk {} belongs to task {}, not {}",
                stray.chunk_id, stray.task_id, task.task_id
            )));
        }

        let records: BTreeMap<u32, ChunkRecord> =
            chunks.iter().map(|c| (c.chunk_id, c.clone())).collect();
        let pending = records.values().filter(|c| !c.is_complete()).count();
        if records.is_empty()
            || records.len() != chunks.len()
            || u32::try_from(records.len()).ok() != Some(task.chunks_total)
            || u32::try_from(pending).ok() != Some(task.chunks_pending)
        {
            return Err(CertError::invalid(format!(
                "task {} counts {} chunks ({} pending) but {} distinct chunk records were given",
                task.task_id,
                task.chunks_total,
                task.chunks_pending,
                records.len()
            )));
        }

        self.tasks.insert(task.task_id.clone(), task.clone());
        self.chunks.insert(task.task_id.clone(), records);
        Ok(())
    }

    pub(crate) fn complete_chunk(
        &mut self,
        task_id: &str,
        chunk_id: u32,
        location: &str,
    ) -> Result<TaskRecord> {
        if location.is_empty() {
            return Err(CertError::invalid("chunk location must not be empty"));
        }
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| CertError::not_found(format!("task {task_id}")))?;
        let chunk = self
            .chunks
            .get_mut(task_id)
            .and_then(|chunks| chunks.get_mut(&chunk_id))
            .ok_or_else(|| CertError::not_found(format!("chunk {chunk_id} of task {task_id}")))?;

        let first_completion = !chunk.is_complete();
        chunk.location = Some(location.to_string());
        chunk.status = ChunkStatus::Complete;

        if first_completion {
            task.chunks_pending = task.chunks_pending.saturating_sub(1);
            task.status = TaskStatus::from_counts(task.chunks_total, task.chunks_pending);
        }
        Ok(task.clone())
    }

    pub(crate) fn task(&self, task_id: &str) -> Result<TaskRecord> {
        let has_chunks = self.chunks.get(task_id).is_some_and(|c| !c.is_empty());
        self.tasks
            .get(task_id)
            .filter(|_| has_chunks)
            .cloned()
            .ok_or_else(|| CertError::not_found(format!("task {task_id}")))
    }

    pub(crate) fn chunks(&self, task_id: &str) -> Result<Vec<ChunkRecord>> {
        match self.chunks.get(task_id) {
            Some(chunks) if !chunks.is_empty() => Ok(chunks.values().cloned().collect()),
            _ => Err(CertError::not_found(format!("chunks of task {task_id}"))),
        }
    }
}
