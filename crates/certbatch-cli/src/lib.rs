//! # certbatch-cli
//!
//! Command-line front end for the certbatch issuance pipeline.
//!
//! ## Features
//!
//! - **issue**: plan a batch and run its chunks in-process
//! - **status / download / delete**: inspect and collect finished batches
//! - **resume**: re-run chunks left pending by an earlier failure
//! - **preview**: resolve a device name template without issuing anything
//! - **Output formats**: colored text or JSON
//!
//! State (chunk records, artifacts, generated CAs) lives in the platform
//! data directory unless `--data-dir` says otherwise.

pub mod cli;
pub mod config;
pub mod local;
pub mod output;

pub use cli::run;
