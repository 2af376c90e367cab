//! The issuance pipeline behind one handle.

use std::sync::Arc;

use certbatch_ca::CaBackends;
use certbatch_core::{
    CertificateDownload, CertificateInfo, ChunkRequest, DownloadType, Result, TaskSummary,
};
use tracing::info;

use crate::aggregator::ResultAggregator;
use crate::cleaner::BatchCleaner;
use crate::config::ServiceConfig;
use crate::dispatch::WorkQueue;
use crate::planner::TaskPlanner;
use crate::storage::ObjectStore;
use crate::store::ChunkStore;
use crate::worker::ChunkWorker;

/// Planner, worker, aggregator and cleaner sharing one configuration and
/// one set of stores.
pub struct BatchService {
    config: Arc<ServiceConfig>,
    planner: TaskPlanner,
    worker: Arc<ChunkWorker>,
    aggregator: ResultAggregator,
    cleaner: BatchCleaner,
    store: Arc<dyn ChunkStore>,
    queue: Arc<dyn WorkQueue>,
}

impl BatchService {
    /// Wire the pipeline. Fails if the configuration is invalid.
    pub fn new(
        config: ServiceConfig,
        backends: CaBackends,
        store: Arc<dyn ChunkStore>,
        objects: Arc<dyn ObjectStore>,
        queue: Arc<dyn WorkQueue>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        Ok(Self {
            planner: TaskPlanner::new(config.clone(), store.clone(), queue.clone()),
            worker: Arc::new(ChunkWorker::new(
                config.clone(),
                backends,
                store.clone(),
                objects.clone(),
            )),
            aggregator: ResultAggregator::new(config.clone(), store.clone(), objects.clone()),
            cleaner: BatchCleaner::new(config.clone(), objects),
            config,
            store,
            queue,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Worker handle, for building a [`crate::WorkerPool`].
    pub fn worker(&self) -> Arc<ChunkWorker> {
        self.worker.clone()
    }

    /// Validate, plan and dispatch a batch. Returns the task id.
    pub async fn create_task(
        &self,
        quantity: u64,
        ca_alias: &str,
        cert_info: CertificateInfo,
    ) -> Result<String> {
        self.planner.create_task(quantity, ca_alias, cert_info).await
    }

    /// Process one chunk in the calling task.
    pub async fn create_chunk(&self, request: &ChunkRequest) -> Result<String> {
        self.worker.create_chunk(request).await
    }

    /// Task status.
    pub async fn get_task(&self, task_id: &str) -> Result<TaskSummary> {
        Ok(self.store.task(task_id).await?.summary())
    }

    /// Signed URLs or a merged archive for the finished chunks.
    pub async fn get_certificates(
        &self,
        task_id: &str,
        download_type: DownloadType,
    ) -> Result<CertificateDownload> {
        self.aggregator.get_certificates(task_id, download_type).await
    }

    /// Delete every artifact of the task.
    pub async fn delete_batch(&self, task_id: &str) -> Result<bool> {
        self.cleaner.delete_batch(task_id).await
    }

    /// Dispatch again every chunk that has no artifact yet, rebuilding the
    /// payload from the task record. Returns the number re-queued.
    pub async fn redispatch_pending(&self, task_id: &str) -> Result<usize> {
        let task = self.store.task(task_id).await?;
        let mut dispatched = 0;

        for chunk in self.store.chunks(task_id).await? {
            if chunk.is_complete() {
                continue;
            }
            self.queue
                .dispatch(&ChunkRequest {
                    cert_info: task.cert_info.clone(),
                    task_id: task.task_id.clone(),
                    chunk_id: chunk.chunk_id,
                    quantity: chunk.quantity,
                    ca_alias: task.ca_alias.clone(),
                })
                .await?;
            dispatched += 1;
        }

        info!(task_id, dispatched, "re-dispatched pending chunks");
        Ok(dispatched)
    }
}
