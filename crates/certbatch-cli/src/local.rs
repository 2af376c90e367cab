//! In-process issuance environment backed by the data directory.
//!
//! Layout:
//!
//! ```text
//! <data_dir>/
//!   chunks.json        task and chunk records
//!   objects/           chunk archives, keyed like the object store keys
//!   ca/<name>/         cert.pem + key.pem of every local CA
//!   downloads/         merged archives
//! ```
//!
//! CAs are generated on first use and reloaded afterwards, so certificates
//! from separate runs chain to the same roots.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use certbatch::{
    BatchService, ChannelQueue, FileChunkStore, FsObjectStore, PoolReport, QueueReceiver,
    ServiceConfig, WorkerPool,
};
use certbatch_ca::local::{LocalDeviceRegistry, LocalPrivateCa, MemorySecretStore};
use certbatch_ca::{default_key_parameter, CaBackends, CaTarget, KeyAlgorithm, LocalAuthority};
use tracing::{debug, info};

/// Alias for the generated customer CA.
pub const DEFAULT_CUSTOMER_ALIAS: &str = "local";
/// Alias for the platform device CA.
pub const DEFAULT_PLATFORM_ALIAS: &str = "platform";
/// Alias for the simulated hosted private CA.
pub const DEFAULT_PRIVATE_ALIAS: &str = "private";

const PLATFORM_CA_DIR: &str = "platform";
const LOCAL_PRIVATE_ARN: &str = "arn:certbatch:local:certificate-authority/local";

/// Interval the local private CA asks callers to wait between polls.
const PRIVATE_CA_RETRY_AFTER: Duration = Duration::from_millis(50);

/// A ready-to-run pipeline plus the receiving end of its queue.
pub struct LocalEnvironment {
    /// The pipeline
    pub service: BatchService,
    receiver: QueueReceiver,
}

impl LocalEnvironment {
    /// Open (or initialise) the environment under `data_dir`.
    pub async fn open(mut config: ServiceConfig, data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        if config.ca_aliases.is_empty() {
            config.ca_aliases = default_aliases();
        }

        let ca_root = data_dir.join("ca");
        let platform = load_or_generate(&ca_root.join(PLATFORM_CA_DIR), "certbatch Platform CA").await?;
        let registry = Arc::new(LocalDeviceRegistry::with_platform_ca(platform));
        let secrets = Arc::new(MemorySecretStore::new());
        let private_ca = Arc::new(LocalPrivateCa::new(0, PRIVATE_CA_RETRY_AFTER));

        for (alias, target) in &config.ca_aliases {
            match target {
                CaTarget::Customer { ca_id, key_parameter } => {
                    let authority = load_or_generate(
                        &ca_root.join(dir_name(ca_id)),
                        &format!("Customer CA {ca_id}"),
                    )
                    .await?;
                    registry.register_ca(ca_id, authority.certificate_pem()).await;
                    let parameter = key_parameter
                        .clone()
                        .unwrap_or_else(|| default_key_parameter(ca_id));
                    secrets.insert(parameter, authority.private_key_pem()).await;
                    debug!(alias = %alias, ca_id = %ca_id, "customer CA ready");
                }
                CaTarget::Platform => {}
                CaTarget::ManagedPrivate { authority_arn } => {
                    let authority = load_or_generate(
                        &ca_root.join(dir_name(authority_arn)),
                        &format!("Private CA {authority_arn}"),
                    )
                    .await?;
                    private_ca.insert_authority(authority_arn, authority).await;
                    debug!(alias = %alias, authority_arn = %authority_arn, "private CA ready");
                }
            }
        }

        let store = Arc::new(FileChunkStore::open(data_dir.join("chunks.json")).await?);
        let objects = Arc::new(FsObjectStore::new(data_dir.join("objects"))?);
        let (queue, receiver) = ChannelQueue::new();

        let backends = CaBackends {
            registry,
            secrets,
            private_ca,
        };
        let service = BatchService::new(config, backends, store, objects, Arc::new(queue))?;

        Ok(Self { service, receiver })
    }

    /// Run every chunk currently queued.
    pub async fn run_queued(&mut self) -> PoolReport {
        let pool = WorkerPool::new(self.service.worker(), self.service.config().worker_concurrency);
        let report = pool.drain(&mut self.receiver).await;
        info!(
            completed = report.completed,
            failed = report.failed,
            "worker pool drained"
        );
        report
    }

    /// Drop queued chunks without running them; their records stay pending.
    pub fn discard_queued(&mut self) -> usize {
        let mut discarded = 0;
        while self.receiver.try_recv().is_some() {
            discarded += 1;
        }
        discarded
    }
}

/// Alias table used when the config file defines none.
pub fn default_aliases() -> BTreeMap<String, CaTarget> {
    [
        (
            DEFAULT_CUSTOMER_ALIAS.to_string(),
            CaTarget::Customer {
                ca_id: "local-customer".to_string(),
                key_parameter: None,
            },
        ),
        (DEFAULT_PLATFORM_ALIAS.to_string(), CaTarget::Platform),
        (
            DEFAULT_PRIVATE_ALIAS.to_string(),
            CaTarget::ManagedPrivate {
                authority_arn: LOCAL_PRIVATE_ARN.to_string(),
            },
        ),
    ]
    .into_iter()
    .collect()
}

/// Directory name for a CA id or ARN.
fn dir_name(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

/// Reload the CA stored in `dir`, or generate and store a new one.
async fn load_or_generate(dir: &Path, name: &str) -> Result<LocalAuthority> {
    let cert_path = dir.join("cert.pem");
    let key_path = dir.join("key.pem");

    if tokio::fs::try_exists(&cert_path).await? && tokio::fs::try_exists(&key_path).await? {
        let cert_pem = tokio::fs::read_to_string(&cert_path).await?;
        let key_pem = tokio::fs::read_to_string(&key_path).await?;
        return LocalAuthority::from_pem(name, &cert_pem, &key_pem)
            .with_context(|| format!("Failed to load CA from {}", dir.display()));
    }

    // CA keys only sign; P-256 keeps first runs fast
    let authority = LocalAuthority::generate(name, KeyAlgorithm::EcdsaP256)?;
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(&cert_path, authority.certificate_pem()).await?;
    tokio::fs::write(&key_path, authority.private_key_pem()).await?;
    info!(ca = %name, path = %dir.display(), "generated local CA");

    Ok(authority)
}
