//! Fan-in of finished chunks into a download.

use std::path::PathBuf;
use std::sync::Arc;

use certbatch_core::{CertError, CertificateDownload, DownloadType, Result};
use tracing::{debug, info};
use uuid::Uuid;

use crate::archive::merge_archives;
use crate::config::ServiceConfig;
use crate::storage::ObjectStore;
use crate::store::ChunkStore;

/// Builds signed URL lists or merged archives for a task.
///
/// Every chunk archive is loaded into memory and the merged archive is
/// built in memory before it is written out.
pub struct ResultAggregator {
    config: Arc<ServiceConfig>,
    store: Arc<dyn ChunkStore>,
    objects: Arc<dyn ObjectStore>,
}

impl ResultAggregator {
    /// Create an aggregator.
    pub fn new(
        config: Arc<ServiceConfig>,
        store: Arc<dyn ChunkStore>,
        objects: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            config,
            store,
            objects,
        }
    }

    /// Download whatever chunks of the task are finished.
    ///
    /// `NotFound` when no chunk has a location yet or none of the recorded
    /// artifacts exist anymore.
    pub async fn get_certificates(
        &self,
        task_id: &str,
        download_type: DownloadType,
    ) -> Result<CertificateDownload> {
        let locations: Vec<(u32, String)> = self
            .store
            .chunks(task_id)
            .await?
            .into_iter()
            .filter(|chunk| chunk.is_complete())
            .filter_map(|chunk| chunk.location.map(|l| (chunk.chunk_id, l)))
            .collect();

        if locations.is_empty() {
            return Err(CertError::not_found(format!(
                "completed chunks of task {task_id}"
            )));
        }

        match download_type {
            DownloadType::SignedUrl => self.signed_urls(task_id, &locations).await,
            DownloadType::Archive => self.merged_archive(task_id, &locations).await,
        }
    }

    async fn signed_urls(
        &self,
        task_id: &str,
        locations: &[(u32, String)],
    ) -> Result<CertificateDownload> {
        let ttl = self.config.signed_url_ttl();
        let mut urls = Vec::with_capacity(locations.len());
        for (chunk_id, location) in locations {
            if !self.objects.exists(location).await? {
                debug!(task_id, chunk_id, location = %location, "artifact missing, no url");
                continue;
            }
            urls.push(self.objects.presign_get(location, ttl)?);
        }

        if urls.is_empty() {
            return Err(CertError::not_found(format!("artifacts of task {task_id}")));
        }
        Ok(CertificateDownload::SignedUrls(urls))
    }

    async fn merged_archive(
        &self,
        task_id: &str,
        locations: &[(u32, String)],
    ) -> Result<CertificateDownload> {
        let mut parts = Vec::with_capacity(locations.len());
        for (chunk_id, location) in locations {
            if let Some(bytes) = self.fetch(location).await? {
                parts.push((*chunk_id, bytes));
            } else {
                debug!(task_id, chunk_id, location = %location, "artifact not available yet");
            }
        }

        if parts.is_empty() {
            return Err(CertError::not_found(format!("artifacts of task {task_id}")));
        }

        let merged = merge_archives(&parts)?;
        let path = self.archive_path(task_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &merged).await?;

        info!(
            task_id,
            chunks = parts.len(),
            bytes = merged.len(),
            path = %path.display(),
            "merged chunk archives"
        );
        Ok(CertificateDownload::Archive(path))
    }

    /// A missing object means the chunk is not available yet.
    async fn fetch(&self, location: &str) -> Result<Option<Vec<u8>>> {
        match self.objects.get(location).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn archive_path(&self, task_id: &str) -> PathBuf {
        self.config
            .download_dir()
            .join(format!("{task_id}-{}.zip", Uuid::new_v4()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{entry_names, ArchiveBuilder};
    use crate::storage::MemoryObjectStore;
    use crate::store::MemoryChunkStore;
    use certbatch_core::{CertificateInfo, ChunkRecord, TaskRecord, TaskStatus};
    use chrono::Utc;

    struct Fixture {
        aggregator: ResultAggregator,
        store: Arc<MemoryChunkStore>,
        objects: Arc<MemoryObjectStore>,
        _dir: tempfile::TempDir,
    }

    async fn fixture(chunks: u32) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(ServiceConfig {
            download_dir: Some(dir.path().to_path_buf()),
            ..ServiceConfig::default()
        });
        let store = Arc::new(MemoryChunkStore::new());
        let objects = Arc::new(MemoryObjectStore::new("agg"));

        let batch_date = Utc::now();
        let records: Vec<_> = (1..=chunks)
            .map(|chunk_id| ChunkRecord::pending("t1", chunk_id, 1, batch_date))
            .collect();
        store
            .create_task(
                &TaskRecord {
                    task_id: "t1".to_string(),
                    batch_date,
                    chunks_total: chunks,
                    chunks_pending: chunks,
                    status: TaskStatus::Pending,
                    ca_alias: "fleet".to_string(),
                    cert_info: CertificateInfo::new("device"),
                },
                &records,
            )
            .await
            .unwrap();

        Fixture {
            aggregator: ResultAggregator::new(config, store.clone(), objects.clone()),
            store,
            objects,
            _dir: dir,
        }
    }

    async fn complete(fx: &Fixture, chunk_id: u32) {
        let mut builder = ArchiveBuilder::new();
        builder
            .add_file(&format!("c{chunk_id}_cert.pem"), b"CERT")
            .unwrap();
        let key = format!("t1/{chunk_id}/certs.zip");
        fx.objects.put(&key, builder.finish().unwrap()).await.unwrap();
        fx.store.complete_chunk("t1", chunk_id, &key).await.unwrap();
    }

    #[tokio::test]
    async fn test_nothing_completed_is_not_found() {
        let fx = fixture(3).await;
        for download in [DownloadType::Archive, DownloadType::SignedUrl] {
            let err = fx.aggregator.get_certificates("t1", download).await.unwrap_err();
            assert!(err.is_not_found());
        }
        let err = fx
            .aggregator
            .get_certificates("unknown", DownloadType::Archive)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_signed_urls_in_chunk_order() {
        let fx = fixture(3).await;
        complete(&fx, 3).await;
        complete(&fx, 1).await;

        let download = fx
            .aggregator
            .get_certificates("t1", DownloadType::SignedUrl)
            .await
            .unwrap();
        let CertificateDownload::SignedUrls(urls) = download else {
            panic!("expected urls");
        };
        assert_eq!(urls.len(), 2);
        assert!(urls[0].starts_with("memory://agg/t1/1/certs.zip?expires="));
        assert!(urls[1].starts_with("memory://agg/t1/3/certs.zip?expires="));
    }

    #[tokio::test]
    async fn test_merged_archive_skips_missing_objects() {
        let fx = fixture(2).await;
        complete(&fx, 1).await;
        complete(&fx, 2).await;
        fx.objects
            .delete_many(&["t1/2/certs.zip".to_string()])
            .await
            .unwrap();

        let download = fx
            .aggregator
            .get_certificates("t1", DownloadType::Archive)
            .await
            .unwrap();
        let CertificateDownload::Archive(path) = download else {
            panic!("expected archive");
        };
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("t1-") && name.ends_with(".zip"));

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(entry_names(&bytes).unwrap(), vec!["1/c1_cert.pem"]);
    }
}
