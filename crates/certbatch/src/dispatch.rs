//! Work distribution: one serialized [`ChunkRequest`] per chunk.

use std::sync::Arc;

use async_trait::async_trait;
use certbatch_core::{CertError, ChunkRequest, Result};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::worker::ChunkWorker;

/// Channel that carries chunk work items to workers.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Hand one chunk to the workers.
    async fn dispatch(&self, request: &ChunkRequest) -> Result<()>;
}

/// Work queue backed by a tokio channel; payloads travel as JSON.
#[derive(Clone)]
pub struct ChannelQueue {
    sender: mpsc::UnboundedSender<String>,
}

/// Consumer side of a [`ChannelQueue`].
pub struct QueueReceiver {
    receiver: mpsc::UnboundedReceiver<String>,
}

impl ChannelQueue {
    /// Create a queue and its receiver.
    #[must_use]
    pub fn new() -> (Self, QueueReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, QueueReceiver { receiver })
    }
}

#[async_trait]
impl WorkQueue for ChannelQueue {
    async fn dispatch(&self, request: &ChunkRequest) -> Result<()> {
        let payload = serde_json::to_string(request)?;
        self.sender
            .send(payload)
            .map_err(|_| CertError::Queue("work queue closed".to_string()))
    }
}

impl QueueReceiver {
    /// Next payload; `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    /// Next payload if one is already queued.
    pub fn try_recv(&mut self) -> Option<String> {
        self.receiver.try_recv().ok()
    }
}

/// Outcome of a pool run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolReport {
    /// Chunks that produced an artifact
    pub completed: usize,
    /// Chunks that failed and stay pending
    pub failed: usize,
}

/// Runs chunk work items with bounded parallelism.
///
/// A failed chunk is logged and left pending; nothing is retried here.
pub struct WorkerPool {
    worker: Arc<ChunkWorker>,
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    /// Pool running at most `concurrency` chunks at once.
    pub fn new(worker: Arc<ChunkWorker>, concurrency: usize) -> Self {
        Self {
            worker,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Consume the queue until every sender is dropped.
    pub async fn run(&self, mut receiver: QueueReceiver) -> PoolReport {
        let mut jobs = JoinSet::new();
        while let Some(payload) = receiver.recv().await {
            self.spawn(&mut jobs, payload);
        }
        Self::collect(jobs).await
    }

    /// Process whatever is queued right now, then return.
    pub async fn drain(&self, receiver: &mut QueueReceiver) -> PoolReport {
        let mut jobs = JoinSet::new();
        while let Some(payload) = receiver.try_recv() {
            self.spawn(&mut jobs, payload);
        }
        Self::collect(jobs).await
    }

    fn spawn(&self, jobs: &mut JoinSet<bool>, payload: String) {
        let worker = self.worker.clone();
        let semaphore = self.semaphore.clone();

        jobs.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return false;
            };
            let request: ChunkRequest = match serde_json::from_str(&payload) {
                Ok(request) => request,
                Err(e) => {
                    error!(error = %e, "discarding malformed chunk payload");
                    return false;
                }
            };
            match worker.create_chunk(&request).await {
                Ok(_) => true,
                Err(e) => {
                    error!(
                        task_id = %request.task_id,
                        chunk_id = request.chunk_id,
                        error = %e,
                        "chunk failed, left pending"
                    );
                    false
                }
            }
        });
    }

    async fn collect(mut jobs: JoinSet<bool>) -> PoolReport {
        let mut report = PoolReport::default();
        while let Some(joined) = jobs.join_next().await {
            match joined {
                Ok(true) => report.completed += 1,
                Ok(false) => report.failed += 1,
                Err(e) => {
                    error!(error = %e, "chunk job panicked");
                    report.failed += 1;
                }
            }
        }
        info!(
            completed = report.completed,
            failed = report.failed,
            "worker pool idle"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certbatch_core::CertificateInfo;

    #[tokio::test]
    async fn test_channel_carries_json() {
        let (queue, mut receiver) = ChannelQueue::new();
        let request = ChunkRequest {
            cert_info: CertificateInfo::new("`dev-`01${increment}"),
            task_id: "t1".to_string(),
            chunk_id: 4,
            quantity: 7,
            ca_alias: "fleet".to_string(),
        };
        queue.dispatch(&request).await.unwrap();

        let payload = receiver.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["taskId"], "t1");
        assert_eq!(value["chunkId"], 4);
        assert_eq!(value["quantity"], 7);
        assert_eq!(value["caAlias"], "fleet");
        assert!(value["certInfo"]["commonName"].is_string());
    }

    #[tokio::test]
    async fn test_dispatch_after_receiver_dropped() {
        let (queue, receiver) = ChannelQueue::new();
        drop(receiver);
        let request = ChunkRequest {
            cert_info: CertificateInfo::new("device"),
            task_id: "t1".to_string(),
            chunk_id: 1,
            quantity: 1,
            ca_alias: "fleet".to_string(),
        };
        let err = queue.dispatch(&request).await.unwrap_err();
        assert!(matches!(err, CertError::Queue(_)));
    }
}
