//! certbatch - batch issuance of X.509 device certificates
//!
//! Plans, issues and packages device certificates against local CA
//! backends.

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    certbatch_cli::run().await
}
