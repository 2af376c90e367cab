//! CA backend seams and per-chunk backend resolution.

use std::sync::Arc;

use async_trait::async_trait;
use certbatch_core::{CertError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::signer::LocalSigner;

/// Device registry: holds customer CA certificates and signs with the
/// platform device CA.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// PEM of a registered customer CA certificate.
    async fn ca_certificate(&self, ca_id: &str) -> Result<String>;

    /// Have the platform CA sign `csr_pem` and register the result.
    async fn register_certificate(
        &self,
        csr_pem: &str,
        set_active: bool,
    ) -> Result<RegisteredCertificate>;
}

/// Parameter store holding CA private keys.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Decrypted value of the named parameter.
    async fn parameter(&self, name: &str) -> Result<String>;
}

/// Hosted private CA with asynchronous issuance.
///
/// `get_certificate` fails with [`CertError::RequestInProgress`] or
/// [`CertError::Throttled`] until the certificate is ready.
#[async_trait]
pub trait PrivateCaService: Send + Sync {
    /// Submit a CSR; returns the new certificate's ARN.
    async fn issue_certificate(
        &self,
        authority_arn: &str,
        csr_pem: &str,
        validity_days: u32,
    ) -> Result<String>;

    /// Fetch an issued certificate and its chain.
    async fn get_certificate(&self, authority_arn: &str, certificate_arn: &str)
        -> Result<IssuedChain>;
}

/// Certificate signed and registered by the platform CA
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredCertificate {
    /// Registry's id for the certificate
    pub certificate_id: String,
    /// Certificate PEM
    pub certificate_pem: String,
}

/// Certificate issued by the hosted private CA
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedChain {
    /// Certificate PEM
    pub certificate: String,
    /// Chain PEM up to the root
    pub chain: String,
}

impl IssuedChain {
    /// Certificate followed by its chain.
    #[must_use]
    pub fn full_pem(&self) -> String {
        format!("{}\n{}", self.certificate.trim_end(), self.chain)
    }
}

/// Handles to every external CA collaborator.
#[derive(Clone)]
pub struct CaBackends {
    /// Device registry
    pub registry: Arc<dyn DeviceRegistry>,
    /// Secret parameter store
    pub secrets: Arc<dyn SecretStore>,
    /// Hosted private CA
    pub private_ca: Arc<dyn PrivateCaService>,
}

/// Where an alias points, as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CaTarget {
    /// Customer-owned CA registered with the device registry
    Customer {
        /// Registry id of the CA certificate
        ca_id: String,
        /// Secret store parameter holding the CA key
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key_parameter: Option<String>,
    },
    /// The platform's own device CA
    Platform,
    /// Hosted private CA
    ManagedPrivate {
        /// Authority ARN
        authority_arn: String,
    },
}

impl CaTarget {
    /// Backend name for logs and errors.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Customer { .. } => "customer",
            Self::Platform => "platform",
            Self::ManagedPrivate { .. } => "managed_private",
        }
    }
}

/// A CA backend ready to issue for one chunk.
pub enum CaBackend {
    /// Signs locally with the customer's CA
    Customer {
        /// Registry id of the CA
        ca_id: String,
        /// Signer holding the fetched CA cert and key
        signer: LocalSigner,
    },
    /// Device registry signs
    Platform,
    /// Hosted private CA, called per identity
    ManagedPrivate {
        /// Authority ARN
        authority_arn: String,
    },
}

impl CaBackend {
    /// Fetch whatever secret material the target needs.
    ///
    /// Only customer CAs need any: their certificate from the registry
    /// and their key from the secret store, once per chunk.
    pub async fn resolve(target: &CaTarget, backends: &CaBackends) -> Result<Self> {
        match target {
            CaTarget::Customer { ca_id, key_parameter } => {
                let cert_pem = backends.registry.ca_certificate(ca_id).await?;
                let parameter = key_parameter
                    .clone()
                    .unwrap_or_else(|| default_key_parameter(ca_id));
                let key_pem = backends.secrets.parameter(&parameter).await?;
                debug!(ca_id = %ca_id, parameter = %parameter, "loaded customer CA");

                Ok(Self::Customer {
                    ca_id: ca_id.clone(),
                    signer: LocalSigner::from_pem(&cert_pem, &key_pem)?,
                })
            }
            CaTarget::Platform => Ok(Self::Platform),
            CaTarget::ManagedPrivate { authority_arn } => {
                if authority_arn.is_empty() {
                    return Err(CertError::Config("empty private CA authority ARN".to_string()));
                }
                Ok(Self::ManagedPrivate {
                    authority_arn: authority_arn.clone(),
                })
            }
        }
    }

    /// Backend name for logs and errors.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Customer { .. } => "customer",
            Self::Platform => "platform",
            Self::ManagedPrivate { .. } => "managed_private",
        }
    }
}

/// Secret parameter name used when an alias doesn't set one.
#[must_use]
pub fn default_key_parameter(ca_id: &str) -> String {
    format!("/certbatch/ca/{ca_id}/key")
}
