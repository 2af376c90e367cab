//! Command implementations.

pub mod delete;
pub mod download;
pub mod issue;
pub mod preview;
pub mod resume;
pub mod status;

use std::path::PathBuf;

use certbatch::ServiceConfig;
use certbatch_core::TaskSummary;
use colored::Colorize;

use crate::local::LocalEnvironment;
use crate::output::OutputFormat;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Output format
    pub output_format: OutputFormat,

    /// Verbose output
    pub verbose: bool,

    /// Pipeline configuration
    pub config: ServiceConfig,

    /// State directory
    pub data_dir: PathBuf,
}

impl Context {
    /// Open the local issuance environment.
    pub async fn environment(&self) -> anyhow::Result<LocalEnvironment> {
        LocalEnvironment::open(self.config.clone(), &self.data_dir).await
    }
}

/// Print a task summary in pretty format.
pub(crate) fn print_summary(summary: &TaskSummary) {
    let status = summary.status.to_string();
    let status = if summary.status.is_complete() {
        status.green().bold()
    } else {
        status.yellow().bold()
    };

    println!("{} {}", "Task:".bold(), summary.task_id.cyan());
    println!("{} {}", "Status:".bold(), status);
    println!(
        "{} {}/{} complete",
        "Chunks:".bold(),
        summary.chunks_total - summary.chunks_pending,
        summary.chunks_total
    );
    println!(
        "{} {}",
        "Planned:".bold(),
        summary.batch_date.format("%Y-%m-%d %H:%M:%S UTC").to_string().dimmed()
    );
}
