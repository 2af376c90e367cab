//! Core types for certbatch.
//!
//! This crate provides the foundations shared by every other crate:
//!
//! - **Types**: tasks, chunks, work items and certificate subject data
//! - **Naming**: the device identifier template language ([`CommonNameSpec`])
//! - **Errors**: a single error enum, [`CertError`]
//!
//! # Example
//!
//! ```rust
//! use certbatch_core::CommonNameSpec;
//!
//! let spec = CommonNameSpec::parse("`dev-`0A${increment(3)}").unwrap();
//! assert_eq!(spec.resolve(2).unwrap(), "dev-C");
//! ```

mod error;
pub mod naming;
pub mod types;

pub use error::{CertError, Result};
pub use naming::{encode_identifier, CommonNameSpec, Generator, MAX_ENCODED_COMMON_NAME};
pub use types::*;
