//! Service configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use certbatch_ca::{CaTarget, KeyAlgorithm, RetryPolicy};
use certbatch_core::{CertError, Result, SubjectFields};
use serde::{Deserialize, Serialize};

/// Configuration for planning, issuing and collecting batches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Maximum identities per chunk (default: 50).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Prepended to every artifact key, e.g. `certificates/`.
    #[serde(default)]
    pub artifact_prefix: String,

    /// Lifetime of signed download URLs (default: 3600).
    #[serde(default = "default_signed_url_ttl")]
    pub signed_url_ttl_secs: u64,

    /// Validity used when a request doesn't set `daysExpiry` (default: 365).
    #[serde(default = "default_days_expiry")]
    pub default_days_expiry: u32,

    /// Device key algorithm (default: RSA-2048).
    #[serde(default)]
    pub key_algorithm: KeyAlgorithm,

    /// Hosted private CA tuning.
    #[serde(default)]
    pub private_ca: PrivateCaConfig,

    /// Subject attributes filled in when a request leaves them unset.
    #[serde(default)]
    pub subject_defaults: SubjectFields,

    /// Where merged archives are written (default: OS temp dir).
    #[serde(default)]
    pub download_dir: Option<PathBuf>,

    /// Chunks processed in parallel by one worker pool (default: 4).
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// CA alias table.
    #[serde(default)]
    pub ca_aliases: BTreeMap<String, CaTarget>,
}

/// Hosted private CA settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivateCaConfig {
    /// Identities issued in parallel within one chunk (default: 5).
    #[serde(default = "default_private_ca_concurrency")]
    pub concurrency: usize,

    /// Polling policy while the CA is still working.
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            artifact_prefix: String::new(),
            signed_url_ttl_secs: default_signed_url_ttl(),
            default_days_expiry: default_days_expiry(),
            key_algorithm: KeyAlgorithm::default(),
            private_ca: PrivateCaConfig::default(),
            subject_defaults: SubjectFields::default(),
            download_dir: None,
            worker_concurrency: default_worker_concurrency(),
            ca_aliases: BTreeMap::new(),
        }
    }
}

impl Default for PrivateCaConfig {
    fn default() -> Self {
        Self {
            concurrency: default_private_ca_concurrency(),
            retry: RetryPolicy::default(),
        }
    }
}

impl ServiceConfig {
    /// Load config from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content).map_err(|e| CertError::Config(e.to_string()))?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline can't run with.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(CertError::Config("chunk_size must be positive".to_string()));
        }
        if self.worker_concurrency == 0 || self.private_ca.concurrency == 0 {
            return Err(CertError::Config("concurrency limits must be positive".to_string()));
        }
        if !(1..=certbatch_core::MAX_DAYS_EXPIRY).contains(&self.default_days_expiry) {
            return Err(CertError::Config(format!(
                "default_days_expiry {} out of range",
                self.default_days_expiry
            )));
        }
        for (alias, target) in &self.ca_aliases {
            match target {
                CaTarget::Customer { ca_id, .. } if ca_id.is_empty() => {
                    return Err(CertError::Config(format!("alias '{alias}' has an empty ca_id")));
                }
                CaTarget::ManagedPrivate { authority_arn } if authority_arn.is_empty() => {
                    return Err(CertError::Config(format!(
                        "alias '{alias}' has an empty authority_arn"
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// CA target for an alias.
    pub fn ca_target(&self, alias: &str) -> Result<&CaTarget> {
        self.ca_aliases
            .get(alias)
            .ok_or_else(|| CertError::UnknownCaAlias(alias.to_string()))
    }

    /// Key prefix holding every artifact of a task.
    #[must_use]
    pub fn task_prefix(&self, task_id: &str) -> String {
        format!("{}{task_id}/", self.artifact_prefix)
    }

    /// Deterministic artifact key of a chunk.
    #[must_use]
    pub fn artifact_key(&self, task_id: &str, chunk_id: u32) -> String {
        format!("{}{chunk_id}/certs.zip", self.task_prefix(task_id))
    }

    /// Signed URL lifetime.
    #[must_use]
    pub const fn signed_url_ttl(&self) -> Duration {
        Duration::from_secs(self.signed_url_ttl_secs)
    }

    /// Directory for merged archives.
    #[must_use]
    pub fn download_dir(&self) -> PathBuf {
        self.download_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

// Default value functions for serde.
const fn default_chunk_size() -> u64 {
    50
}

const fn default_signed_url_ttl() -> u64 {
    3600
}

const fn default_days_expiry() -> u32 {
    365
}

const fn default_worker_concurrency() -> usize {
    4
}

const fn default_private_ca_concurrency() -> usize {
    5
}
