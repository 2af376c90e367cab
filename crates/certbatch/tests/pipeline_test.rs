//! End-to-end issuance through every CA backend.
//!
//! Keys are ECDSA P-256 so the runs stay fast; the flow is the same as
//! with RSA.

use std::sync::Arc;
use std::time::Duration;

use certbatch::archive::{entry_names, read_entry};
use certbatch::{
    BatchService, ChannelQueue, ChunkStore, FileChunkStore, FsObjectStore, MemoryChunkStore,
    MemoryObjectStore, ObjectStore, QueueReceiver, ServiceConfig, WorkerPool,
};
use certbatch_ca::local::{LocalDeviceRegistry, LocalPrivateCa, MemorySecretStore};
use certbatch_ca::{CaBackends, CaTarget, KeyAlgorithm, LocalAuthority, RetryPolicy};
use certbatch_core::{
    CertError, CertificateDownload, CertificateInfo, DownloadType, SubjectFields, TaskStatus,
};

const AUTHORITY_ARN: &str = "arn:aws:acm-pca:us-east-1:123456789012:certificate-authority/fleet";

struct Harness {
    service: BatchService,
    receiver: QueueReceiver,
    pool: WorkerPool,
    registry: Arc<LocalDeviceRegistry>,
    _dir: tempfile::TempDir,
}

async fn backends() -> (CaBackends, Arc<LocalDeviceRegistry>) {
    let registry = Arc::new(LocalDeviceRegistry::new(KeyAlgorithm::EcdsaP256).unwrap());
    let secrets = Arc::new(MemorySecretStore::new());
    let customer = LocalAuthority::generate("Factory CA", KeyAlgorithm::EcdsaP256).unwrap();
    registry
        .register_ca("factory-ca", customer.certificate_pem())
        .await;
    secrets
        .insert("/certbatch/ca/factory-ca/key", customer.private_key_pem())
        .await;

    let private_ca = LocalPrivateCa::new(1, Duration::from_millis(1)).with_throttled_polls(1);
    private_ca
        .create_authority(AUTHORITY_ARN, KeyAlgorithm::EcdsaP256)
        .await
        .unwrap();

    let backends = CaBackends {
        registry: registry.clone(),
        secrets,
        private_ca: Arc::new(private_ca),
    };
    (backends, registry)
}

fn config(dir: &tempfile::TempDir, chunk_size: u64) -> ServiceConfig {
    let mut config = ServiceConfig {
        chunk_size,
        artifact_prefix: "certificates/".to_string(),
        key_algorithm: KeyAlgorithm::EcdsaP256,
        download_dir: Some(dir.path().join("downloads")),
        subject_defaults: SubjectFields {
            organization: Some("Fleet Corp".to_string()),
            country: Some("US".to_string()),
            ..SubjectFields::default()
        },
        ..ServiceConfig::default()
    };
    config.private_ca.concurrency = 3;
    config.private_ca.retry = RetryPolicy::new()
        .default_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(5));
    config.ca_aliases.insert(
        "factory".to_string(),
        CaTarget::Customer {
            ca_id: "factory-ca".to_string(),
            key_parameter: None,
        },
    );
    config
        .ca_aliases
        .insert("cloud".to_string(), CaTarget::Platform);
    config.ca_aliases.insert(
        "pca".to_string(),
        CaTarget::ManagedPrivate {
            authority_arn: AUTHORITY_ARN.to_string(),
        },
    );
    config
}

async fn harness(chunk_size: u64) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let (backends, registry) = backends().await;
    let (queue, receiver) = ChannelQueue::new();

    let service = BatchService::new(
        config(&dir, chunk_size),
        backends,
        Arc::new(MemoryChunkStore::new()),
        Arc::new(MemoryObjectStore::new("certbatch-artifacts")),
        Arc::new(queue),
    )
    .unwrap();
    let pool = WorkerPool::new(service.worker(), 4);

    Harness {
        service,
        receiver,
        pool,
        registry,
        _dir: dir,
    }
}

fn template(info: &str) -> CertificateInfo {
    CertificateInfo::new(info)
}

async fn archive_entries(download: CertificateDownload) -> (Vec<String>, Vec<u8>) {
    let CertificateDownload::Archive(path) = download else {
        panic!("expected an archive download");
    };
    let bytes = tokio::fs::read(&path).await.unwrap();
    (entry_names(&bytes).unwrap(), bytes)
}

#[tokio::test]
async fn test_customer_ca_end_to_end() {
    let mut h = harness(4).await;
    let mut info = template("`sensor-`00A0${increment(10)}");
    info.include_ca = true;
    info.days_expiry = Some(90);

    // The embedded count (10) wins over the requested quantity.
    let task_id = h.service.create_task(999, "factory", info).await.unwrap();

    let status = h.service.get_task(&task_id).await.unwrap();
    assert_eq!(status.status, TaskStatus::Pending);
    assert_eq!(status.chunks_total, 3);
    assert_eq!(status.chunks_pending, 3);

    let report = h.pool.drain(&mut h.receiver).await;
    assert_eq!(report.completed, 3);
    assert_eq!(report.failed, 0);

    let status = h.service.get_task(&task_id).await.unwrap();
    assert_eq!(status.status, TaskStatus::Complete);
    assert_eq!(status.chunks_pending, 0);

    let download = h
        .service
        .get_certificates(&task_id, DownloadType::Archive)
        .await
        .unwrap();
    let (names, bytes) = archive_entries(download).await;
    // 10 identities * (cert + key) + one manifest per chunk
    assert_eq!(names.len(), 23);
    for chunk in 1..=3 {
        assert!(names.contains(&format!("{chunk}/manifest.json")));
    }

    let manifest: std::collections::BTreeMap<String, String> =
        serde_json::from_slice(&read_entry(&bytes, "3/manifest.json").unwrap()).unwrap();
    let identifiers: Vec<&str> = manifest.keys().map(String::as_str).collect();
    assert_eq!(identifiers, vec!["sensor-A8", "sensor-A9"]);
}

#[tokio::test]
async fn test_platform_ca_registers_inactive() {
    let mut h = harness(5).await;
    let task_id = h
        .service
        .create_task(7, "cloud", template("`gw-`${list}alpha,beta,gamma"))
        .await
        .unwrap();

    let report = h.pool.drain(&mut h.receiver).await;
    assert_eq!(report.completed, 1);
    assert_eq!(h.registry.certificate_count().await, 3);

    let download = h
        .service
        .get_certificates(&task_id, DownloadType::Archive)
        .await
        .unwrap();
    let (names, _) = archive_entries(download).await;
    assert_eq!(names.len(), 6);

    let cert_id = names[0]
        .strip_prefix("1/")
        .and_then(|n| n.strip_suffix("_cert.pem"))
        .unwrap();
    let record = h.registry.certificate(cert_id).await.unwrap();
    assert!(!record.active);
}

#[tokio::test]
async fn test_private_ca_with_polling() {
    let mut h = harness(4).await;
    let task_id = h
        .service
        .create_task(6, "pca", template("`edge-`FF${increment}"))
        .await
        .unwrap();

    let report = h.pool.drain(&mut h.receiver).await;
    assert_eq!(report.completed, 2);

    let download = h
        .service
        .get_certificates(&task_id, DownloadType::SignedUrl)
        .await
        .unwrap();
    let CertificateDownload::SignedUrls(urls) = download else {
        panic!("expected signed urls");
    };
    assert_eq!(urls.len(), 2);
    assert!(urls[0].contains(&format!("/certificates/{task_id}/1/certs.zip?expires=")));
    assert!(urls[1].contains(&format!("/certificates/{task_id}/2/certs.zip?expires=")));

    let download = h
        .service
        .get_certificates(&task_id, DownloadType::Archive)
        .await
        .unwrap();
    let (names, _) = archive_entries(download).await;
    assert_eq!(names.len(), 12);
    assert!(names.iter().all(|n| n.ends_with("_cert.pem") || n.ends_with("_key.pem")));
}

#[tokio::test]
async fn test_partial_completion_and_redispatch() {
    let mut h = harness(2).await;
    let task_id = h
        .service
        .create_task(5, "cloud", template("`dev-`10${increment}"))
        .await
        .unwrap();

    // Run only the first dispatched chunk by hand.
    let first = h.receiver.try_recv().unwrap();
    let request: certbatch_core::ChunkRequest = serde_json::from_str(&first).unwrap();
    assert_eq!(request.chunk_id, 1);
    h.service.create_chunk(&request).await.unwrap();
    // Lose the rest, as if their messages were dropped.
    while h.receiver.try_recv().is_some() {}

    let status = h.service.get_task(&task_id).await.unwrap();
    assert_eq!(status.status, TaskStatus::InProgress);
    assert_eq!(status.chunks_pending, 2);

    let download = h
        .service
        .get_certificates(&task_id, DownloadType::SignedUrl)
        .await
        .unwrap();
    let CertificateDownload::SignedUrls(urls) = download else {
        panic!("expected signed urls");
    };
    assert_eq!(urls.len(), 1);

    assert_eq!(h.service.redispatch_pending(&task_id).await.unwrap(), 2);
    let report = h.pool.drain(&mut h.receiver).await;
    assert_eq!(report.completed, 2);

    let status = h.service.get_task(&task_id).await.unwrap();
    assert_eq!(status.status, TaskStatus::Complete);
    assert_eq!(h.service.redispatch_pending(&task_id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_delete_then_not_found() {
    let mut h = harness(3).await;
    let task_id = h
        .service
        .create_task(4, "factory", template("`del-`01${increment}"))
        .await
        .unwrap();
    h.pool.drain(&mut h.receiver).await;

    assert!(h.service.delete_batch(&task_id).await.unwrap());
    for download in [DownloadType::Archive, DownloadType::SignedUrl] {
        let err = h
            .service
            .get_certificates(&task_id, download)
            .await
            .unwrap_err();
        assert!(err.is_not_found(), "{err}");
    }

    // The prefix is gone, so a second delete surfaces the listing error.
    assert!(h.service.delete_batch(&task_id).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_nothing_completed_is_not_found() {
    let h = harness(50).await;
    let task_id = h
        .service
        .create_task(1015, "cloud", template("`big-`0${increment}"))
        .await
        .unwrap();

    let status = h.service.get_task(&task_id).await.unwrap();
    assert_eq!(status.chunks_total, 21);

    let err = h
        .service
        .get_certificates(&task_id, DownloadType::Archive)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(h.service.get_task("no-such-task").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_invalid_requests_rejected_up_front() {
    let mut h = harness(10).await;

    let mut bad_country = template("device");
    bad_country.subject.country = Some("fail".to_string());
    let err = h
        .service
        .create_task(5, "cloud", bad_country)
        .await
        .unwrap_err();
    assert!(matches!(err, CertError::InvalidArgument(_)));

    let too_long = template("`unit-test::`AB1CD79EF1AB1CD79EF1AB1CD79EF1AB1CD79EF1${increment(5)}");
    let err = h.service.create_task(5, "cloud", too_long).await.unwrap_err();
    assert!(matches!(err, CertError::InvalidArgument(_)));

    let err = h
        .service
        .create_task(5, "nowhere", template("device"))
        .await
        .unwrap_err();
    assert!(matches!(err, CertError::UnknownCaAlias(_)));

    assert!(h.receiver.try_recv().is_none());
}

#[tokio::test]
async fn test_durable_stores_and_concurrent_pool() {
    let dir = tempfile::tempdir().unwrap();
    let (backends, _) = backends().await;
    let (queue, receiver) = ChannelQueue::new();
    let objects = Arc::new(FsObjectStore::new(dir.path().join("objects")).unwrap());
    let store = Arc::new(
        FileChunkStore::open(dir.path().join("state/chunks.json"))
            .await
            .unwrap(),
    );

    let service = BatchService::new(
        config(&dir, 2),
        backends,
        store,
        objects.clone(),
        Arc::new(queue),
    )
    .unwrap();

    let task_id = service
        .create_task(5, "factory", template("`fs-`A${increment}"))
        .await
        .unwrap();

    // Dropping the service closes the queue once the pool has the receiver.
    let pool = WorkerPool::new(service.worker(), 2);
    let runner = tokio::spawn(async move { pool.run(receiver).await });
    let status = service.get_task(&task_id).await.unwrap();
    assert_eq!(status.chunks_total, 3);
    drop(service);
    let report = runner.await.unwrap();
    assert_eq!(report.completed, 3);

    let keys = objects
        .list(&format!("certificates/{task_id}/"))
        .await
        .unwrap();
    assert_eq!(keys.len(), 3);

    let reopened = FileChunkStore::open(dir.path().join("state/chunks.json"))
        .await
        .unwrap();
    let task = reopened.task(&task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Complete);
}
