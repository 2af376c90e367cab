//! `certbatch resume` - Re-run the chunks of a task that are still pending.

use anyhow::Result;
use colored::Colorize;
use serde_json::json;

use super::{print_summary, Context};
use crate::cli::args::ResumeArgs;
use crate::output::{print_json, OutputFormat};

pub async fn execute(ctx: Context, args: ResumeArgs) -> Result<()> {
    let mut env = ctx.environment().await?;

    let dispatched = env.service.redispatch_pending(&args.task_id).await?;
    let report = env.run_queued().await;
    let summary = env.service.get_task(&args.task_id).await?;

    match ctx.output_format {
        OutputFormat::Json => print_json(&json!({
            "task": summary,
            "redispatched": dispatched,
            "chunksCompleted": report.completed,
            "chunksFailed": report.failed,
        }))?,
        OutputFormat::Pretty => {
            if dispatched == 0 {
                println!("{}", "Nothing to resume, every chunk is complete.".green());
            } else {
                println!(
                    "{} {} chunk(s), {} completed",
                    "Resumed".bold(),
                    dispatched,
                    report.completed.to_string().cyan()
                );
            }
            println!();
            print_summary(&summary);
        }
    }

    if report.failed > 0 {
        anyhow::bail!("{} chunk(s) failed again", report.failed);
    }
    Ok(())
}
