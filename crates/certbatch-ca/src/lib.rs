//! # certbatch-ca
//!
//! Everything that touches keys and certificate authorities.
//!
//! ## Backends
//!
//! ```text
//! CA alias ──► CaTarget (config) ──► CaBackend (resolved once per chunk)
//!                                       │
//!                                       ├── Customer        sign locally with the customer's CA key
//!                                       ├── Platform        device registry signs, cert stays inactive
//!                                       └── ManagedPrivate  hosted private CA, issue then poll
//! ```
//!
//! The registry, secret store and hosted CA are traits so the pipeline can
//! run against real services or the in-process ones in [`local`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use certbatch_ca::{DeviceKey, KeyAlgorithm, LocalAuthority};
//!
//! let ca = LocalAuthority::generate("Fleet Root", KeyAlgorithm::EcdsaP256)?;
//! let key = DeviceKey::generate(KeyAlgorithm::Rsa2048)?;
//! let csr = key.csr_pem(&subject, "SENSOR-00A1")?;
//! let signed = ca.signer().sign_csr(&csr, 365)?;
//! ```

mod authority;
mod backend;
mod fingerprint;
mod keys;
pub mod local;
mod retry;
mod signer;

pub use authority::LocalAuthority;
pub use backend::{
    default_key_parameter, CaBackend, CaBackends, CaTarget, DeviceRegistry, IssuedChain,
    PrivateCaService, RegisteredCertificate, SecretStore,
};
pub use fingerprint::certificate_id;
pub use keys::{DeviceIdentity, DeviceKey};
pub use retry::RetryPolicy;
pub use signer::{LocalSigner, SignedCertificate};

use certbatch_core::CertError;
use serde::{Deserialize, Serialize};

/// Key algorithm for device keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeyAlgorithm {
    /// RSA 2048-bit (what device fleets expect)
    #[default]
    Rsa2048,
    /// RSA 4096-bit (higher security, much slower to generate)
    Rsa4096,
    /// ECDSA with P-256 curve (fast, for local runs)
    EcdsaP256,
    /// ECDSA with P-384 curve
    EcdsaP384,
}

impl KeyAlgorithm {
    /// RSA modulus size, if this is an RSA algorithm.
    pub const fn rsa_bits(&self) -> Option<usize> {
        match self {
            Self::Rsa2048 => Some(2048),
            Self::Rsa4096 => Some(4096),
            Self::EcdsaP256 | Self::EcdsaP384 => None,
        }
    }
}

pub(crate) fn crypto_err(context: &str) -> impl Fn(rcgen::Error) -> CertError + '_ {
    move |e| CertError::Crypto(format!("{context}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_algorithm_config_names() {
        let alg: KeyAlgorithm = serde_json::from_str("\"ecdsa_p256\"").unwrap();
        assert_eq!(alg, KeyAlgorithm::EcdsaP256);
        assert_eq!(KeyAlgorithm::default(), KeyAlgorithm::Rsa2048);
        assert_eq!(KeyAlgorithm::Rsa2048.rsa_bits(), Some(2048));
        assert_eq!(KeyAlgorithm::EcdsaP384.rsa_bits(), None);
    }
}
