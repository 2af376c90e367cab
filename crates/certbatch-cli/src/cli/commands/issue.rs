//! `certbatch issue` - Plan and issue a batch of device certificates.

use anyhow::Result;
use certbatch_core::{CertificateInfo, CommonNameInput, SubjectFields, TaskSummary};
use colored::Colorize;
use serde::Serialize;

use super::{print_summary, Context};
use crate::cli::args::IssueArgs;
use crate::output::{print_json, OutputFormat};

/// What `issue` reports back.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IssueReport {
    #[serde(flatten)]
    task: TaskSummary,
    chunks_completed: usize,
    chunks_failed: usize,
}

pub async fn execute(ctx: Context, args: IssueArgs) -> Result<()> {
    let mut env = ctx.environment().await?;
    let quantity = args.quantity;
    let ca_alias = args.ca_alias.clone();
    let no_run = args.no_run;

    let task_id = env
        .service
        .create_task(quantity, &ca_alias, certificate_info(args))
        .await?;

    let report = if no_run {
        env.discard_queued();
        certbatch::PoolReport::default()
    } else {
        env.run_queued().await
    };

    let summary = env.service.get_task(&task_id).await?;

    match ctx.output_format {
        OutputFormat::Json => print_json(&IssueReport {
            task: summary,
            chunks_completed: report.completed,
            chunks_failed: report.failed,
        })?,
        OutputFormat::Pretty => {
            print_summary(&summary);
            println!();
            if no_run {
                println!("{}", "Planned only. Run it with:".dimmed());
                println!("  certbatch resume {task_id}");
            } else if report.failed > 0 {
                println!(
                    "{} {} chunk(s) failed and stay pending. Retry with:",
                    "Warning:".yellow().bold(),
                    report.failed
                );
                println!("  certbatch resume {task_id}");
            } else {
                println!("{}", "Collect the certificates with:".dimmed());
                println!("  certbatch download {task_id}");
            }
        }
    }

    if report.failed > 0 {
        anyhow::bail!("{} of {} chunks failed", report.failed, report.failed + report.completed);
    }
    Ok(())
}

/// Build the request payload from the flags.
fn certificate_info(args: IssueArgs) -> CertificateInfo {
    CertificateInfo {
        subject: SubjectFields {
            organization: args.organization,
            organizational_unit: args.organizational_unit,
            locality: args.locality,
            state: args.state,
            country: args.country,
            email: args.email,
            dn_qualifier: args.dn_qualifier,
        },
        days_expiry: args.days,
        include_ca: args.include_ca,
        common_name: CommonNameInput::Template(args.template),
    }
}
