//! Request validation, chunk planning and dispatch.

use std::sync::Arc;

use certbatch_core::{
    CertError, CertificateInfo, ChunkRecord, ChunkRequest, CommonNameInput, Result, TaskRecord,
    TaskStatus,
};
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::dispatch::WorkQueue;
use crate::store::ChunkStore;

/// Split `quantity` into chunk sizes of at most `chunk_size`.
///
/// Every chunk is full except possibly the last, which holds the
/// remainder.
#[must_use]
pub fn plan_chunks(quantity: u64, chunk_size: u64) -> Vec<u64> {
    if quantity == 0 || chunk_size == 0 {
        return Vec::new();
    }
    let chunks = quantity.div_ceil(chunk_size);
    (0..chunks)
        .map(|i| {
            if i + 1 == chunks {
                quantity - chunk_size * (chunks - 1)
            } else {
                chunk_size
            }
        })
        .collect()
}

/// Validates issuance requests, persists their chunks and dispatches one
/// work item per chunk.
pub struct TaskPlanner {
    config: Arc<ServiceConfig>,
    store: Arc<dyn ChunkStore>,
    queue: Arc<dyn WorkQueue>,
}

impl TaskPlanner {
    /// Create a planner.
    pub fn new(
        config: Arc<ServiceConfig>,
        store: Arc<dyn ChunkStore>,
        queue: Arc<dyn WorkQueue>,
    ) -> Self {
        Self {
            config,
            store,
            queue,
        }
    }

    /// Check a request and normalize it into the payload every chunk gets.
    ///
    /// Returns the request with subject defaults merged in and the name
    /// template parsed, plus the effective quantity.
    pub fn prepare(
        &self,
        quantity: u64,
        ca_alias: &str,
        mut cert_info: CertificateInfo,
    ) -> Result<(CertificateInfo, u64)> {
        if ca_alias.trim().is_empty() {
            return Err(CertError::invalid("caAlias must not be empty"));
        }
        self.config.ca_target(ca_alias)?;

        cert_info.subject = cert_info.subject.merged_with(&self.config.subject_defaults);
        cert_info.validate()?;

        let spec = cert_info.common_name.to_spec()?;
        let quantity = match spec.effective_quantity() {
            Some(embedded) => {
                if embedded != quantity {
                    debug!(requested = quantity, embedded, "template quantity overrides request");
                }
                embedded
            }
            None => quantity,
        };
        if quantity == 0 {
            return Err(CertError::invalid("quantity must be positive"));
        }
        spec.check_encoded_length(quantity)?;

        cert_info.common_name = CommonNameInput::Spec(spec);
        Ok((cert_info, quantity))
    }

    /// Plan and dispatch a task; returns its id.
    ///
    /// The task record and all of its chunk records are stored in one
    /// write before anything is dispatched, so the counters always match
    /// the chunk records. Chunks are then dispatched in chunk order. A
    /// dispatch failure stops dispatching and is returned with the task id;
    /// the undispatched chunks stay PENDING and can be re-queued with
    /// [`crate::BatchService::redispatch_pending`].
    pub async fn create_task(
        &self,
        quantity: u64,
        ca_alias: &str,
        cert_info: CertificateInfo,
    ) -> Result<String> {
        let (cert_info, quantity) = self.prepare(quantity, ca_alias, cert_info)?;

        let plan = plan_chunks(quantity, self.config.chunk_size);
        let chunks_total = u32::try_from(plan.len())
            .map_err(|_| CertError::invalid(format!("{quantity} certificates is too many chunks")))?;

        let task_id = Uuid::new_v4().to_string();
        let batch_date = Utc::now();

        let chunks: Vec<ChunkRecord> = (1..=chunks_total)
            .zip(plan)
            .map(|(chunk_id, chunk_quantity)| {
                ChunkRecord::pending(task_id.clone(), chunk_id, chunk_quantity, batch_date)
            })
            .collect();

        self.store
            .create_task(
                &TaskRecord {
                    task_id: task_id.clone(),
                    batch_date,
                    chunks_total,
                    chunks_pending: chunks_total,
                    status: TaskStatus::Pending,
                    ca_alias: ca_alias.to_string(),
                    cert_info: cert_info.clone(),
                },
                &chunks,
            )
            .await?;

        for chunk in &chunks {
            self.queue
                .dispatch(&ChunkRequest {
                    cert_info: cert_info.clone(),
                    task_id: task_id.clone(),
                    chunk_id: chunk.chunk_id,
                    quantity: chunk.quantity,
                    ca_alias: ca_alias.to_string(),
                })
                .await
                .map_err(|e| {
                    warn!(task_id = %task_id, chunk_id = chunk.chunk_id, error = %e, "dispatch failed");
                    CertError::Queue(format!(
                        "task {task_id}: chunk {} of {chunks_total} not dispatched: {e}",
                        chunk.chunk_id
                    ))
                })?;
        }

        info!(
            task_id = %task_id,
            alias = ca_alias,
            quantity,
            chunks = chunks_total,
            "task planned"
        );
        Ok(task_id)
    }
}
