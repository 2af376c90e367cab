//! Local CSR signing with a CA certificate and key held in memory.

use certbatch_core::Result;
use rcgen::{
    Certificate, CertificateParams, CertificateSigningRequestParams, ExtendedKeyUsagePurpose,
    IsCa, KeyPair, KeyUsagePurpose,
};
use uuid::Uuid;

use crate::crypto_err;
use crate::fingerprint::certificate_id;

/// Signs device CSRs on behalf of a CA.
pub struct LocalSigner {
    certificate: Certificate,
    key_pair: KeyPair,
    ca_pem: String,
}

/// A certificate issued by a [`LocalSigner`].
#[derive(Debug, Clone)]
pub struct SignedCertificate {
    /// Certificate PEM
    pub pem: String,
    /// Certificate DER
    pub der: Vec<u8>,
}

impl SignedCertificate {
    /// Lowercase hex SHA-256 of the DER certificate.
    #[must_use]
    pub fn certificate_id(&self) -> String {
        certificate_id(&self.der)
    }
}

impl LocalSigner {
    /// Load a signer from the CA certificate and private key PEMs.
    pub fn from_pem(ca_cert_pem: &str, ca_key_pem: &str) -> Result<Self> {
        let key_pair = KeyPair::from_pem(ca_key_pem).map_err(crypto_err("load CA key"))?;
        let params =
            CertificateParams::from_ca_cert_pem(ca_cert_pem).map_err(crypto_err("parse CA certificate"))?;
        // Rebuilt only to act as issuer: subject and key identifier match the original.
        let certificate = params
            .self_signed(&key_pair)
            .map_err(crypto_err("load CA certificate"))?;

        Ok(Self {
            certificate,
            key_pair,
            ca_pem: ca_cert_pem.to_string(),
        })
    }

    pub(crate) fn from_parts(certificate: Certificate, key_pair: KeyPair) -> Self {
        let ca_pem = certificate.pem();
        Self {
            certificate,
            key_pair,
            ca_pem,
        }
    }

    /// PEM of the CA certificate as it was provided.
    pub fn ca_certificate_pem(&self) -> &str {
        &self.ca_pem
    }

    /// Sign a device CSR as a client certificate valid for `days`.
    pub fn sign_csr(&self, csr_pem: &str, days: u32) -> Result<SignedCertificate> {
        let mut csr =
            CertificateSigningRequestParams::from_pem(csr_pem).map_err(crypto_err("parse CSR"))?;

        csr.params.is_ca = IsCa::NoCa;
        csr.params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        csr.params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        csr.params.use_authority_key_identifier_extension = true;

        csr.params.not_before = time::OffsetDateTime::now_utc();
        csr.params.not_after =
            time::OffsetDateTime::now_utc() + time::Duration::days(i64::from(days));

        let serial = Uuid::new_v4();
        csr.params.serial_number = Some((serial.as_u128() as u64).into());

        let cert = csr
            .signed_by(&self.certificate, &self.key_pair)
            .map_err(crypto_err("sign CSR"))?;

        Ok(SignedCertificate {
            pem: cert.pem(),
            der: cert.der().to_vec(),
        })
    }
}
