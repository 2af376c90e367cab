//! Device key pairs and certificate signing requests.

use certbatch_core::{encode_identifier, CertError, Result, SubjectFields};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rsa::pkcs8::EncodePrivateKey;
use rsa::RsaPrivateKey;

use crate::{crypto_err, KeyAlgorithm};

/// OID 1.2.840.113549.1.9.1
const OID_EMAIL_ADDRESS: [u64; 7] = [1, 2, 840, 113_549, 1, 9, 1];

/// OID 2.5.4.46
const OID_DN_QUALIFIER: [u64; 4] = [2, 5, 4, 46];

/// A freshly generated device key pair.
pub struct DeviceKey {
    key_pair: KeyPair,
}

impl DeviceKey {
    /// Generate a new key pair.
    pub fn generate(algorithm: KeyAlgorithm) -> Result<Self> {
        let key_pair = match algorithm.rsa_bits() {
            Some(bits) => {
                let mut rng = rand::thread_rng();
                let private = RsaPrivateKey::new(&mut rng, bits)
                    .map_err(|e| CertError::Crypto(format!("RSA-{bits} generation failed: {e}")))?;
                let der = private
                    .to_pkcs8_der()
                    .map_err(|e| CertError::Crypto(format!("PKCS#8 encoding failed: {e}")))?;
                KeyPair::try_from(der.as_bytes()).map_err(crypto_err("load RSA key"))?
            }
            None if algorithm == KeyAlgorithm::EcdsaP384 => {
                KeyPair::generate_for(&rcgen::PKCS_ECDSA_P384_SHA384)
                    .map_err(crypto_err("generate P-384 key"))?
            }
            None => KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
                .map_err(crypto_err("generate P-256 key"))?,
        };
        Ok(Self { key_pair })
    }

    /// PKCS#8 PEM of the private key.
    pub fn private_key_pem(&self) -> String {
        self.key_pair.serialize_pem()
    }

    /// Build a PEM CSR for `identifier` with the given subject.
    ///
    /// The identifier goes into the Common Name base64-encoded.
    pub fn csr_pem(&self, subject: &SubjectFields, identifier: &str) -> Result<String> {
        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(subject, identifier);

        let csr = params
            .serialize_request(&self.key_pair)
            .map_err(crypto_err("build CSR"))?;
        csr.pem().map_err(crypto_err("encode CSR"))
    }
}

/// Key, CSR and identifier for one device.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    /// Plain device identifier (not encoded)
    pub identifier: String,
    /// Private key PEM
    pub key_pem: String,
    /// CSR PEM
    pub csr_pem: String,
}

impl DeviceIdentity {
    /// Generate a key pair and CSR for `identifier`.
    ///
    /// CPU bound; run it on a blocking thread when called from async code.
    pub fn generate(
        algorithm: KeyAlgorithm,
        subject: &SubjectFields,
        identifier: impl Into<String>,
    ) -> Result<Self> {
        let identifier = identifier.into();
        let key = DeviceKey::generate(algorithm)?;
        let csr_pem = key.csr_pem(subject, &identifier)?;
        Ok(Self {
            identifier,
            key_pem: key.private_key_pem(),
            csr_pem,
        })
    }
}

fn distinguished_name(subject: &SubjectFields, identifier: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();

    let fields = [
        (DnType::OrganizationName, &subject.organization),
        (DnType::OrganizationalUnitName, &subject.organizational_unit),
        (DnType::LocalityName, &subject.locality),
        (DnType::StateOrProvinceName, &subject.state),
        (DnType::CountryName, &subject.country),
        (DnType::CustomDnType(OID_EMAIL_ADDRESS.to_vec()), &subject.email),
        (DnType::CustomDnType(OID_DN_QUALIFIER.to_vec()), &subject.dn_qualifier),
    ];
    for (ty, value) in fields {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            dn.push(ty, value);
        }
    }

    dn.push(DnType::CommonName, encode_identifier(identifier));
    dn
}

#[cfg(test)]
mod tests {
    use super::*;
    use x509_parser::prelude::*;

    fn subject() -> SubjectFields {
        SubjectFields {
            organization: Some("Fleet Corp".to_string()),
            country: Some("US".to_string()),
            email: Some("ops@fleet.example".to_string()),
            ..SubjectFields::default()
        }
    }

    #[test]
    fn test_csr_common_name_is_base64() {
        let key = DeviceKey::generate(KeyAlgorithm::EcdsaP256).unwrap();
        let pem = key.csr_pem(&subject(), "DEV-01").unwrap();
        assert!(pem.contains("BEGIN CERTIFICATE REQUEST"));

        let (_, parsed) = x509_parser::pem::parse_x509_pem(pem.as_bytes()).unwrap();
        let (_, csr) = X509CertificationRequest::from_der(&parsed.contents).unwrap();
        let subject = &csr.certification_request_info.subject;
        let cn = subject.iter_common_name().next().unwrap().as_str().unwrap();
        assert_eq!(cn, "REVWLTAx");
        let org = subject.iter_organization().next().unwrap().as_str().unwrap();
        assert_eq!(org, "Fleet Corp");
    }

    #[test]
    fn test_identity_generation() {
        let identity =
            DeviceIdentity::generate(KeyAlgorithm::EcdsaP256, &subject(), "SENSOR-1").unwrap();
        assert_eq!(identity.identifier, "SENSOR-1");
        assert!(identity.key_pem.contains("PRIVATE KEY"));
        assert!(identity.csr_pem.contains("CERTIFICATE REQUEST"));
    }

    #[test]
    fn test_rsa_key() {
        let key = DeviceKey::generate(KeyAlgorithm::Rsa2048).unwrap();
        assert!(key.private_key_pem().contains("BEGIN PRIVATE KEY"));
        assert!(key.csr_pem(&SubjectFields::default(), "X").is_ok());
    }
}
