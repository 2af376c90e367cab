//! `certbatch preview` - Show the device names a template produces.

use anyhow::Result;
use certbatch_core::{encode_identifier, CommonNameInput};
use colored::Colorize;
use serde::Serialize;

use super::Context;
use crate::cli::args::PreviewArgs;
use crate::output::{print_json, OutputFormat};

/// One resolved device name.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PreviewRow {
    /// Position within the task
    pub index: u64,
    /// Device identifier
    pub identifier: String,
    /// Form placed in the CSR Common Name
    pub common_name: String,
}

/// Resolve the first `count` names, checking the last name of the whole
/// batch still fits.
pub fn preview_rows(template: &str, count: u64, quantity: Option<u64>) -> Result<Vec<PreviewRow>> {
    let spec = CommonNameInput::Template(template.to_string()).to_spec()?;
    let quantity = spec.effective_quantity().or(quantity).unwrap_or(count);
    spec.check_encoded_length(quantity)?;

    (0..count.min(quantity))
        .map(|index| {
            let identifier = spec.resolve(index)?;
            Ok(PreviewRow {
                index,
                common_name: encode_identifier(&identifier),
                identifier,
            })
        })
        .collect()
}

pub async fn execute(ctx: Context, args: PreviewArgs) -> Result<()> {
    let rows = preview_rows(&args.template, args.count, args.quantity)?;

    match ctx.output_format {
        OutputFormat::Json => print_json(&rows)?,
        OutputFormat::Pretty => {
            for row in &rows {
                if ctx.verbose {
                    println!(
                        "{:>6}  {}  {}",
                        row.index.to_string().dimmed(),
                        row.identifier.cyan(),
                        row.common_name.dimmed()
                    );
                } else {
                    println!("{:>6}  {}", row.index.to_string().dimmed(), row.identifier.cyan());
                }
            }
        }
    }

    Ok(())
}
