//! In-process CA backends.
//!
//! These stand in for the device registry, the secret parameter store and
//! the hosted private CA when running locally or in tests. They sign with
//! real keys, so everything they return parses as genuine X.509.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use certbatch_core::{CertError, Result};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::authority::LocalAuthority;
use crate::backend::{
    DeviceRegistry, IssuedChain, PrivateCaService, RegisteredCertificate, SecretStore,
};
use crate::KeyAlgorithm;

/// Validity the platform CA gives its certificates.
const PLATFORM_VALIDITY_DAYS: u32 = 365;

/// Registry record of a platform-signed certificate.
#[derive(Debug, Clone)]
pub struct RegisteredRecord {
    /// Certificate PEM
    pub certificate_pem: String,
    /// Whether the certificate was activated on registration
    pub active: bool,
}

/// Device registry backed by maps, with its own platform CA.
pub struct LocalDeviceRegistry {
    platform: LocalAuthority,
    ca_certificates: RwLock<HashMap<String, String>>,
    certificates: RwLock<HashMap<String, RegisteredRecord>>,
}

impl LocalDeviceRegistry {
    /// Create a registry with a freshly generated platform CA.
    pub fn new(algorithm: KeyAlgorithm) -> Result<Self> {
        Ok(Self::with_platform_ca(LocalAuthority::generate(
            "certbatch Platform Device CA",
            algorithm,
        )?))
    }

    /// Create a registry that signs with `platform`.
    pub fn with_platform_ca(platform: LocalAuthority) -> Self {
        Self {
            platform,
            ca_certificates: RwLock::new(HashMap::new()),
            certificates: RwLock::new(HashMap::new()),
        }
    }

    /// Register a customer CA certificate under `ca_id`.
    pub async fn register_ca(&self, ca_id: impl Into<String>, certificate_pem: impl Into<String>) {
        self.ca_certificates
            .write()
            .await
            .insert(ca_id.into(), certificate_pem.into());
    }

    /// PEM of the platform CA.
    pub fn platform_ca_pem(&self) -> &str {
        self.platform.certificate_pem()
    }

    /// Look up a platform-signed certificate.
    pub async fn certificate(&self, certificate_id: &str) -> Option<RegisteredRecord> {
        self.certificates.read().await.get(certificate_id).cloned()
    }

    /// Number of platform-signed certificates.
    pub async fn certificate_count(&self) -> usize {
        self.certificates.read().await.len()
    }
}

#[async_trait]
impl DeviceRegistry for LocalDeviceRegistry {
    async fn ca_certificate(&self, ca_id: &str) -> Result<String> {
        self.ca_certificates
            .read()
            .await
            .get(ca_id)
            .cloned()
            .ok_or_else(|| CertError::not_found(format!("CA certificate {ca_id}")))
    }

    async fn register_certificate(
        &self,
        csr_pem: &str,
        set_active: bool,
    ) -> Result<RegisteredCertificate> {
        let signed = self.platform.signer().sign_csr(csr_pem, PLATFORM_VALIDITY_DAYS)?;
        let certificate_id = signed.certificate_id();

        self.certificates.write().await.insert(
            certificate_id.clone(),
            RegisteredRecord {
                certificate_pem: signed.pem.clone(),
                active: set_active,
            },
        );
        debug!(certificate_id = %certificate_id, active = set_active, "registered certificate");

        Ok(RegisteredCertificate {
            certificate_id,
            certificate_pem: signed.pem,
        })
    }
}

/// Secret parameters held in a map.
#[derive(Default)]
pub struct MemorySecretStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemorySecretStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a parameter.
    pub async fn insert(&self, name: impl Into<String>, value: impl Into<String>) {
        self.values.write().await.insert(name.into(), value.into());
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn parameter(&self, name: &str) -> Result<String> {
        self.values
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| CertError::not_found(format!("parameter {name}")))
    }
}

struct PendingCertificate {
    authority_arn: String,
    certificate: String,
    polls: u32,
}

/// Hosted private CA simulation.
///
/// Each certificate is signed at issue time, but `get_certificate`
/// answers `Throttled` for the first `throttled_polls` calls and then
/// `RequestInProgress` for the next `pending_polls`, like the real service
/// does while it works.
pub struct LocalPrivateCa {
    authorities: RwLock<HashMap<String, LocalAuthority>>,
    requests: Mutex<HashMap<String, PendingCertificate>>,
    pending_polls: u32,
    throttled_polls: u32,
    retry_after: Duration,
}

impl LocalPrivateCa {
    /// Create a service with no authorities.
    pub fn new(pending_polls: u32, retry_after: Duration) -> Self {
        Self {
            authorities: RwLock::new(HashMap::new()),
            requests: Mutex::new(HashMap::new()),
            pending_polls,
            throttled_polls: 0,
            retry_after,
        }
    }

    /// Answer `Throttled` for the first `polls` polls of each certificate.
    #[must_use]
    pub const fn with_throttled_polls(mut self, polls: u32) -> Self {
        self.throttled_polls = polls;
        self
    }

    /// Register an existing authority under `authority_arn`.
    pub async fn insert_authority(&self, authority_arn: impl Into<String>, authority: LocalAuthority) {
        self.authorities
            .write()
            .await
            .insert(authority_arn.into(), authority);
    }

    /// Generate an authority and register it under `authority_arn`.
    pub async fn create_authority(
        &self,
        authority_arn: impl Into<String>,
        algorithm: KeyAlgorithm,
    ) -> Result<()> {
        let arn = authority_arn.into();
        let authority = LocalAuthority::generate(&format!("Private CA {arn}"), algorithm)?;
        self.insert_authority(arn, authority).await;
        Ok(())
    }

    /// PEM of an authority's certificate.
    pub async fn authority_pem(&self, authority_arn: &str) -> Option<String> {
        self.authorities
            .read()
            .await
            .get(authority_arn)
            .map(|a| a.certificate_pem().to_string())
    }
}

#[async_trait]
impl PrivateCaService for LocalPrivateCa {
    async fn issue_certificate(
        &self,
        authority_arn: &str,
        csr_pem: &str,
        validity_days: u32,
    ) -> Result<String> {
        let certificate = {
            let authorities = self.authorities.read().await;
            let authority = authorities.get(authority_arn).ok_or_else(|| {
                CertError::backend("private-ca", format!("authority {authority_arn} not found"))
            })?;
            authority.signer().sign_csr(csr_pem, validity_days)?.pem
        };

        let certificate_arn = format!("{authority_arn}/certificate/{}", Uuid::new_v4().simple());
        self.requests.lock().await.insert(
            certificate_arn.clone(),
            PendingCertificate {
                authority_arn: authority_arn.to_string(),
                certificate,
                polls: 0,
            },
        );
        Ok(certificate_arn)
    }

    async fn get_certificate(
        &self,
        authority_arn: &str,
        certificate_arn: &str,
    ) -> Result<IssuedChain> {
        let certificate = {
            let mut requests = self.requests.lock().await;
            let request = requests
                .get_mut(certificate_arn)
                .filter(|r| r.authority_arn == authority_arn)
                .ok_or_else(|| {
                    CertError::backend("private-ca", format!("certificate {certificate_arn} not found"))
                })?;

            request.polls += 1;
            if request.polls <= self.throttled_polls {
                return Err(CertError::Throttled {
                    retry_after: Some(self.retry_after),
                });
            }
            if request.polls <= self.throttled_polls + self.pending_polls {
                return Err(CertError::RequestInProgress {
                    retry_after: Some(self.retry_after),
                });
            }
            // Handed out once; the entry goes away with it
            requests
                .remove(certificate_arn)
                .map(|r| r.certificate)
                .unwrap_or_default()
        };

        let chain = self
            .authority_pem(authority_arn)
            .await
            .ok_or_else(|| CertError::backend("private-ca", "authority disappeared"))?;

        Ok(IssuedChain { certificate, chain })
    }
}
