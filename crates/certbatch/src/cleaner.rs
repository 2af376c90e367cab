//! Artifact removal.

use std::sync::Arc;

use certbatch_core::Result;
use tracing::info;

use crate::config::ServiceConfig;
use crate::storage::ObjectStore;

/// Deletes every artifact stored under a task's prefix.
pub struct BatchCleaner {
    config: Arc<ServiceConfig>,
    objects: Arc<dyn ObjectStore>,
}

impl BatchCleaner {
    /// Create a cleaner.
    pub fn new(config: Arc<ServiceConfig>, objects: Arc<dyn ObjectStore>) -> Self {
        Self { config, objects }
    }

    /// List and bulk-delete the task's artifacts.
    ///
    /// A listing error (including `NotFound` for a prefix that holds
    /// nothing) is returned as is. Chunk records are left untouched.
    pub async fn delete_batch(&self, task_id: &str) -> Result<bool> {
        let prefix = self.config.task_prefix(task_id);
        let keys = self.objects.list(&prefix).await?;
        let deleted = self.objects.delete_many(&keys).await?;
        info!(task_id, prefix = %prefix, deleted, "deleted batch artifacts");
        Ok(true)
    }
}
