//! Self-signed certificate authorities for local and test use.
//!
//! Production customer CAs arrive as PEM through the device registry and
//! secret store; these are what the in-process backends sign with.

use certbatch_core::Result;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose,
};
use uuid::Uuid;

use crate::keys::DeviceKey;
use crate::signer::LocalSigner;
use crate::{crypto_err, KeyAlgorithm};

/// CA validity: 10 years
const AUTHORITY_VALIDITY_DAYS: i64 = 10 * 365;

/// A CA with its key in memory.
pub struct LocalAuthority {
    signer: LocalSigner,
    key_pem: String,
    name: String,
}

impl LocalAuthority {
    /// Generate a new self-signed CA.
    pub fn generate(name: &str, algorithm: KeyAlgorithm) -> Result<Self> {
        let key_pair = key_pair_for(algorithm)?;
        let key_pem = key_pair.serialize_pem();

        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, name);
        dn.push(DnType::OrganizationName, "certbatch");
        params.distinguished_name = dn;

        // Signs device certificates only
        params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        params.not_before = time::OffsetDateTime::now_utc();
        params.not_after =
            time::OffsetDateTime::now_utc() + time::Duration::days(AUTHORITY_VALIDITY_DAYS);

        let serial = Uuid::new_v4();
        params.serial_number = Some((serial.as_u128() as u64).into());

        let certificate = params
            .self_signed(&key_pair)
            .map_err(crypto_err("self-sign CA"))?;

        Ok(Self {
            signer: LocalSigner::from_parts(certificate, key_pair),
            key_pem,
            name: name.to_string(),
        })
    }

    /// Load a previously generated authority from its PEMs.
    pub fn from_pem(name: &str, certificate_pem: &str, key_pem: &str) -> Result<Self> {
        Ok(Self {
            signer: LocalSigner::from_pem(certificate_pem, key_pem)?,
            key_pem: key_pem.to_string(),
            name: name.to_string(),
        })
    }

    /// CA common name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// CA certificate PEM.
    pub fn certificate_pem(&self) -> &str {
        self.signer.ca_certificate_pem()
    }

    /// CA private key PEM.
    pub fn private_key_pem(&self) -> &str {
        &self.key_pem
    }

    /// Signer for device CSRs.
    pub fn signer(&self) -> &LocalSigner {
        &self.signer
    }
}

fn key_pair_for(algorithm: KeyAlgorithm) -> Result<KeyPair> {
    // Round-trip through PEM so RSA keys from `rsa` load the same way as EC ones.
    let key = DeviceKey::generate(algorithm)?;
    KeyPair::from_pem(&key.private_key_pem()).map_err(crypto_err("load CA key"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_authority() {
        let ca = LocalAuthority::generate("Fleet Root", KeyAlgorithm::EcdsaP256).unwrap();
        assert_eq!(ca.name(), "Fleet Root");
        assert!(ca.certificate_pem().contains("BEGIN CERTIFICATE"));
        assert!(ca.private_key_pem().contains("PRIVATE KEY"));
    }

    #[test]
    fn test_reload_from_pem() {
        let ca = LocalAuthority::generate("Fleet Root", KeyAlgorithm::EcdsaP256).unwrap();
        let reloaded =
            LocalAuthority::from_pem("Fleet Root", ca.certificate_pem(), ca.private_key_pem())
                .unwrap();
        assert_eq!(reloaded.certificate_pem(), ca.certificate_pem());
        assert_eq!(reloaded.private_key_pem(), ca.private_key_pem());
    }

    #[test]
    fn test_two_authorities_differ() {
        let a = LocalAuthority::generate("A", KeyAlgorithm::EcdsaP256).unwrap();
        let b = LocalAuthority::generate("B", KeyAlgorithm::EcdsaP256).unwrap();
        assert_ne!(a.certificate_pem(), b.certificate_pem());
    }
}
