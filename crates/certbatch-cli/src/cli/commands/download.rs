//! `certbatch download` - Collect a finished batch.

use anyhow::{Context as _, Result};
use certbatch_core::{CertificateDownload, DownloadType};
use colored::Colorize;

use super::Context;
use crate::cli::args::DownloadArgs;
use crate::output::{print_json, OutputFormat};

pub async fn execute(ctx: Context, args: DownloadArgs) -> Result<()> {
    let env = ctx.environment().await?;

    let download_type = if args.signed_url {
        DownloadType::SignedUrl
    } else {
        DownloadType::Archive
    };
    let download = env
        .service
        .get_certificates(&args.task_id, download_type)
        .await?;

    // Move the merged archive where the user asked for it
    let download = match (download, args.out) {
        (CertificateDownload::Archive(path), Some(out)) => {
            tokio::fs::copy(&path, &out)
                .await
                .with_context(|| format!("Failed to write {}", out.display()))?;
            tokio::fs::remove_file(&path).await?;
            CertificateDownload::Archive(out)
        }
        (download, _) => download,
    };

    match ctx.output_format {
        OutputFormat::Json => print_json(&download)?,
        OutputFormat::Pretty => match &download {
            CertificateDownload::Archive(path) => {
                println!("{} {}", "Archive:".bold(), path.display().to_string().cyan());
            }
            CertificateDownload::SignedUrls(urls) => {
                println!(
                    "{} {} (valid {}s)",
                    "Signed URLs:".bold(),
                    urls.len(),
                    ctx.config.signed_url_ttl_secs
                );
                for url in urls {
                    println!("  {url}");
                }
            }
        },
    }

    Ok(())
}
