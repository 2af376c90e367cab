//! Command-line argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::output::OutputFormat;

/// Batch issuance of X.509 device certificates
///
/// Plans a batch into chunks, issues every device key and certificate
/// against a CA alias, and packages the results as ZIP archives.
///
/// Device names come from a template such as `sensor-`00A0${increment(250)}.
#[derive(Parser, Debug)]
#[command(name = "certbatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, env = "CERTBATCH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Directory for chunk records, artifacts and local CAs
    #[arg(long, env = "CERTBATCH_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, value_enum)]
    pub output: Option<OutputFormat>,

    /// Increase verbosity
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Plan and issue a batch of device certificates
    Issue(IssueArgs),

    /// Show a task's chunk progress
    Status(StatusArgs),

    /// Collect a finished batch as one archive or signed URLs
    Download(DownloadArgs),

    /// Delete every artifact of a batch
    Delete(DeleteArgs),

    /// Re-run the chunks of a task that are still pending
    Resume(ResumeArgs),

    /// Show the device names a template produces
    Preview(PreviewArgs),
}

// ============================================================================
// Issue command
// ============================================================================

#[derive(Args, Debug)]
pub struct IssueArgs {
    /// Device name template, e.g. `dev-`00A0${increment(100)}
    pub template: String,

    /// Number of devices (ignored when the template embeds a count)
    #[arg(short = 'n', long, default_value = "1")]
    pub quantity: u64,

    /// CA alias to issue against
    #[arg(long = "ca", default_value = "local")]
    pub ca_alias: String,

    /// Validity in days (1-825, defaults to the configured value)
    #[arg(short, long)]
    pub days: Option<u32>,

    /// Append the issuing CA certificate to each device certificate
    #[arg(long)]
    pub include_ca: bool,

    /// Organization (O)
    #[arg(long)]
    pub organization: Option<String>,

    /// Organizational unit (OU)
    #[arg(long)]
    pub organizational_unit: Option<String>,

    /// Locality (L)
    #[arg(long)]
    pub locality: Option<String>,

    /// State or province (ST)
    #[arg(long)]
    pub state: Option<String>,

    /// Two-letter country code (C)
    #[arg(long)]
    pub country: Option<String>,

    /// Email address
    #[arg(long)]
    pub email: Option<String>,

    /// Distinguished name qualifier
    #[arg(long)]
    pub dn_qualifier: Option<String>,

    /// Only plan and record the batch; run it later with `resume`
    #[arg(long)]
    pub no_run: bool,
}

// ============================================================================
// Status command
// ============================================================================

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Task id
    pub task_id: String,
}

// ============================================================================
// Download command
// ============================================================================

#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// Task id
    pub task_id: String,

    /// Print one signed URL per chunk instead of merging
    #[arg(long)]
    pub signed_url: bool,

    /// Copy the merged archive here
    #[arg(long, conflicts_with = "signed_url")]
    pub out: Option<PathBuf>,
}

// ============================================================================
// Delete command
// ============================================================================

#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Task id
    pub task_id: String,
}

// ============================================================================
// Resume command
// ============================================================================

#[derive(Args, Debug)]
pub struct ResumeArgs {
    /// Task id
    pub task_id: String,
}

// ============================================================================
// Preview command
// ============================================================================

#[derive(Args, Debug)]
pub struct PreviewArgs {
    /// Device name template
    pub template: String,

    /// How many names to show
    #[arg(long, default_value = "10")]
    pub count: u64,

    /// Quantity used for the length check (ignored when the template embeds a count)
    #[arg(short = 'n', long)]
    pub quantity: Option<u64>,
}
