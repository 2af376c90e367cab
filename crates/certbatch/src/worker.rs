//! Chunk issuance.
//!
//! A worker turns one [`ChunkRequest`] into one archive:
//!
//! ```text
//! resolve alias ─► CaBackend ─┬─ Customer/Platform: key ► CSR ► sign, one identity at a time
//!                             └─ ManagedPrivate:    key ► CSR ► issue ► poll, up to N at once
//!                                        │
//!                                        ▼
//!               {prefix}{taskId}/{chunkId}/certs.zip ─► complete_chunk
//! ```
//!
//! The artifact key is deterministic, so re-delivering a chunk overwrites
//! the same object.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use certbatch_ca::{
    CaBackend, CaBackends, DeviceIdentity, KeyAlgorithm, LocalSigner, PrivateCaService,
    RetryPolicy,
};
use certbatch_core::{CertError, ChunkRequest, CommonNameSpec, Result, SubjectFields};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::archive::ArchiveBuilder;
use crate::config::ServiceConfig;
use crate::storage::ObjectStore;
use crate::store::ChunkStore;

/// Identifier → certificate id map written into customer CA archives.
pub const MANIFEST_NAME: &str = "manifest.json";

/// Absolute identity indices covered by a chunk.
#[must_use]
pub fn chunk_range(chunk_id: u32, quantity: u64, chunk_size: u64) -> Range<u64> {
    let start = u64::from(chunk_id.saturating_sub(1)) * chunk_size;
    start..start + quantity
}

/// File stem used for a private CA certificate: the last ARN segment.
#[must_use]
pub fn artifact_stem(certificate_arn: &str) -> &str {
    certificate_arn
        .rsplit_once('/')
        .map_or(certificate_arn, |(_, tail)| tail)
}

/// Issues the certificates of one chunk and publishes the archive.
pub struct ChunkWorker {
    config: Arc<ServiceConfig>,
    backends: CaBackends,
    store: Arc<dyn ChunkStore>,
    objects: Arc<dyn ObjectStore>,
}

/// Per-chunk values shared by every identity.
struct ChunkContext<'a> {
    request: &'a ChunkRequest,
    spec: CommonNameSpec,
    days: u32,
    range: Range<u64>,
}

impl ChunkWorker {
    /// Create a worker.
    pub fn new(
        config: Arc<ServiceConfig>,
        backends: CaBackends,
        store: Arc<dyn ChunkStore>,
        objects: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            config,
            backends,
            store,
            objects,
        }
    }

    /// Issue every identity of the chunk, upload the archive and mark the
    /// chunk complete. Returns the artifact key.
    ///
    /// On error nothing is recorded and the chunk stays pending.
    pub async fn create_chunk(&self, request: &ChunkRequest) -> Result<String> {
        let target = self.config.ca_target(&request.ca_alias)?;
        let backend = CaBackend::resolve(target, &self.backends).await?;

        let ctx = ChunkContext {
            request,
            spec: request.cert_info.common_name.to_spec()?,
            days: request
                .cert_info
                .days_expiry
                .unwrap_or(self.config.default_days_expiry),
            range: chunk_range(request.chunk_id, request.quantity, self.config.chunk_size),
        };

        info!(
            task_id = %request.task_id,
            chunk_id = request.chunk_id,
            alias = %request.ca_alias,
            backend = backend.kind(),
            quantity = request.quantity,
            "issuing chunk"
        );

        let archive = match &backend {
            CaBackend::Customer { signer, .. } => self.issue_customer(&ctx, signer).await?,
            CaBackend::Platform => self.issue_platform(&ctx).await?,
            CaBackend::ManagedPrivate { authority_arn } => {
                self.issue_private(&ctx, authority_arn).await?
            }
        };

        let location = self
            .config
            .artifact_key(&request.task_id, request.chunk_id);
        self.objects.put(&location, archive).await?;
        let task = self
            .store
            .complete_chunk(&request.task_id, request.chunk_id, &location)
            .await?;

        info!(
            task_id = %request.task_id,
            chunk_id = request.chunk_id,
            location = %location,
            task_status = %task.status,
            chunks_pending = task.chunks_pending,
            "chunk complete"
        );
        Ok(location)
    }

    async fn issue_customer(&self, ctx: &ChunkContext<'_>, signer: &LocalSigner) -> Result<Vec<u8>> {
        let include_ca = ctx.request.cert_info.include_ca;
        let mut archive = ArchiveBuilder::new();
        let mut manifest = BTreeMap::new();

        for index in ctx.range.clone() {
            let identity = self.identity(ctx, index).await?;
            let signed = signer.sign_csr(&identity.csr_pem, ctx.days)?;
            let certificate_id = signed.certificate_id();

            let certificate_pem = if include_ca {
                format!(
                    "{}\n{}",
                    signed.pem.trim_end(),
                    signer.ca_certificate_pem()
                )
            } else {
                signed.pem
            };

            archive.add_file(&format!("{certificate_id}_cert.pem"), certificate_pem.as_bytes())?;
            archive.add_file(&format!("{certificate_id}_key.pem"), identity.key_pem.as_bytes())?;
            debug!(
                task_id = %ctx.request.task_id,
                chunk_id = ctx.request.chunk_id,
                index,
                certificate_id = %certificate_id,
                "signed with customer CA"
            );
            manifest.insert(identity.identifier, certificate_id);
        }

        archive.add_file(MANIFEST_NAME, &serde_json::to_vec_pretty(&manifest)?)?;
        archive.finish()
    }

    async fn issue_platform(&self, ctx: &ChunkContext<'_>) -> Result<Vec<u8>> {
        let mut archive = ArchiveBuilder::new();

        for index in ctx.range.clone() {
            let identity = self.identity(ctx, index).await?;
            // Registered inactive; activation is the fleet owner's call.
            let registered = self
                .backends
                .registry
                .register_certificate(&identity.csr_pem, false)
                .await?;

            let id = &registered.certificate_id;
            archive.add_file(&format!("{id}_cert.pem"), registered.certificate_pem.as_bytes())?;
            archive.add_file(&format!("{id}_key.pem"), identity.key_pem.as_bytes())?;
            debug!(
                task_id = %ctx.request.task_id,
                chunk_id = ctx.request.chunk_id,
                index,
                certificate_id = %id,
                "registered with platform CA"
            );
        }

        archive.finish()
    }

    async fn issue_private(&self, ctx: &ChunkContext<'_>, authority_arn: &str) -> Result<Vec<u8>> {
        let identifiers = ctx
            .range
            .clone()
            .map(|index| ctx.spec.resolve(index).map(|id| (index, id)))
            .collect::<Result<Vec<_>>>()?;

        let semaphore = Arc::new(Semaphore::new(self.config.private_ca.concurrency.max(1)));
        let abort = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::with_capacity(identifiers.len());

        for (index, identifier) in identifiers {
            let job = PrivateIssue {
                private_ca: self.backends.private_ca.clone(),
                authority_arn: authority_arn.to_string(),
                subject: ctx.request.cert_info.subject.clone(),
                algorithm: self.config.key_algorithm,
                days: ctx.days,
                retry: self.config.private_ca.retry.clone(),
                index,
            };
            let semaphore = semaphore.clone();
            let abort = abort.clone();

            handles.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return Ok(None);
                };
                if abort.load(Ordering::SeqCst) {
                    return Ok(None);
                }
                let result = job.run(identifier).await;
                if result.is_err() {
                    abort.store(true, Ordering::SeqCst);
                }
                result
            }));
        }

        let mut archive = ArchiveBuilder::new();
        let mut failure = None;
        let mut skipped = 0usize;

        for handle in handles {
            match handle.await {
                Ok(Ok(Some(issued))) => {
                    let stem = artifact_stem(&issued.certificate_arn);
                    archive.add_file(&format!("{stem}_cert.pem"), issued.certificate_pem.as_bytes())?;
                    archive.add_file(&format!("{stem}_key.pem"), issued.key_pem.as_bytes())?;
                }
                Ok(Ok(None)) => skipped += 1,
                Ok(Err(e)) => {
                    failure.get_or_insert(e);
                }
                Err(e) => {
                    failure.get_or_insert(CertError::backend(
                        "private-ca",
                        format!("issuance task failed: {e}"),
                    ));
                }
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }
        if skipped > 0 {
            warn!(
                task_id = %ctx.request.task_id,
                chunk_id = ctx.request.chunk_id,
                skipped,
                "identities left out of the chunk archive"
            );
        }
        archive.finish()
    }

    async fn identity(&self, ctx: &ChunkContext<'_>, index: u64) -> Result<DeviceIdentity> {
        let identifier = ctx.spec.resolve(index)?;
        generate_identity(
            self.config.key_algorithm,
            ctx.request.cert_info.subject.clone(),
            identifier,
        )
        .await
    }
}

/// Key generation is CPU bound, so it runs on the blocking pool.
async fn generate_identity(
    algorithm: KeyAlgorithm,
    subject: SubjectFields,
    identifier: String,
) -> Result<DeviceIdentity> {
    tokio::task::spawn_blocking(move || DeviceIdentity::generate(algorithm, &subject, identifier))
        .await
        .map_err(|e| CertError::Crypto(format!("key generation task failed: {e}")))?
}

struct PrivateIssue {
    private_ca: Arc<dyn PrivateCaService>,
    authority_arn: String,
    subject: SubjectFields,
    algorithm: KeyAlgorithm,
    days: u32,
    retry: RetryPolicy,
    index: u64,
}

struct PrivateIssued {
    certificate_arn: String,
    certificate_pem: String,
    key_pem: String,
}

impl PrivateIssue {
    /// `Err` aborts the chunk; `Ok(None)` drops just this identity.
    async fn run(self, identifier: String) -> Result<Option<PrivateIssued>> {
        let identity = generate_identity(self.algorithm, self.subject, identifier).await?;
        let certificate_arn = self
            .private_ca
            .issue_certificate(&self.authority_arn, &identity.csr_pem, self.days)
            .await?;

        let ca = &*self.private_ca;
        let authority = self.authority_arn.as_str();
        let arn = certificate_arn.as_str();
        match self.retry.run(move || ca.get_certificate(authority, arn)).await {
            Ok(chain) => {
                debug!(index = self.index, certificate_arn = %certificate_arn, "private CA issued");
                Ok(Some(PrivateIssued {
                    certificate_pem: chain.full_pem(),
                    certificate_arn,
                    key_pem: identity.key_pem,
                }))
            }
            Err(e) => {
                warn!(
                    index = self.index,
                    certificate_arn = %certificate_arn,
                    error = %e,
                    "certificate never became available"
                );
                Ok(None)
            }
        }
    }
}
