//! `certbatch status` - Show a task's chunk progress.

use anyhow::Result;

use super::{print_summary, Context};
use crate::cli::args::StatusArgs;
use crate::output::{print_json, OutputFormat};

pub async fn execute(ctx: Context, args: StatusArgs) -> Result<()> {
    let env = ctx.environment().await?;
    let summary = env.service.get_task(&args.task_id).await?;

    match ctx.output_format {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Pretty => print_summary(&summary),
    }

    Ok(())
}
