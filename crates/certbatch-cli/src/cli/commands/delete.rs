//! `certbatch delete` - Delete every artifact of a batch.

use anyhow::Result;
use colored::Colorize;
use serde_json::json;

use super::Context;
use crate::cli::args::DeleteArgs;
use crate::output::{print_json, OutputFormat};

pub async fn execute(ctx: Context, args: DeleteArgs) -> Result<()> {
    let env = ctx.environment().await?;
    let deleted = env.service.delete_batch(&args.task_id).await?;

    match ctx.output_format {
        OutputFormat::Json => print_json(&json!({
            "taskId": args.task_id,
            "deleted": deleted,
        }))?,
        OutputFormat::Pretty => {
            println!("{} {}", "Deleted artifacts of".green(), args.task_id.cyan());
            println!(
                "{}",
                "The task record is kept; its status still reflects the original run.".dimmed()
            );
        }
    }

    Ok(())
}
