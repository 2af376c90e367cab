//! Certificate fingerprints via `ring::digest`.

use ring::digest::{digest, SHA256};

/// Certificate id: lowercase hex SHA-256 of the DER bytes, no separators.
#[must_use]
pub fn certificate_id(der: &[u8]) -> String {
    hex::encode(digest(&SHA256, der).as_ref())
}
