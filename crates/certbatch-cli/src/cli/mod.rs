//! CLI argument parsing and command dispatch.

pub mod args;
pub mod commands;

use anyhow::Result;
use args::{Cli, Commands};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::config;
use crate::output::OutputFormat;

/// Run the CLI application.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    if cli.no_color {
        colored::control::set_override(false);
    }

    // Resolve state locations, then load configuration
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => config::default_data_dir()?,
    };
    let service_config = config::load(cli.config.as_deref(), &data_dir)?;

    // Create context for commands
    let ctx = commands::Context {
        output_format: cli.output.unwrap_or(OutputFormat::Pretty),
        verbose: cli.verbose,
        config: service_config,
        data_dir,
    };

    // Dispatch to appropriate command
    match cli.command {
        Commands::Issue(args) => commands::issue::execute(ctx, args).await,
        Commands::Status(args) => commands::status::execute(ctx, args).await,
        Commands::Download(args) => commands::download::execute(ctx, args).await,
        Commands::Delete(args) => commands::delete::execute(ctx, args).await,
        Commands::Resume(args) => commands::resume::execute(ctx, args).await,
        Commands::Preview(args) => commands::preview::execute(ctx, args).await,
    }
}

/// Logs go to stderr so JSON output stays clean.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // A second init (tests calling run twice) is harmless
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
