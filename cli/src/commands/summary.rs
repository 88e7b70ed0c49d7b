//! Summary command implementation

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use covpull_shared::lcov::{summarize, FileSummary};
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct SummaryArgs {
    /// LCOV tracefile to summarize
    pub file: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: SummaryArgs) -> Result<()> {
    let tracefile = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    print_summary(&tracefile, args.json)
}

/// Totals across every file.
pub fn total(files: &[FileSummary]) -> FileSummary {
    files.iter().fold(
        FileSummary {
            path: "TOTAL".to_string(),
            ..Default::default()
        },
        |mut acc, f| {
            acc.lines_found += f.lines_found;
            acc.lines_hit += f.lines_hit;
            acc.functions_found += f.functions_found;
            acc.functions_hit += f.functions_hit;
            acc
        },
    )
}

pub fn print_summary(tracefile: &str, json: bool) -> Result<()> {
    let files = summarize(tracefile);

    if json {
        let out = serde_json::json!({
            "files": files,
            "total": total(&files),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if files.is_empty() {
        println!("No coverage records.");
        return Ok(());
    }

    let width = files.iter().map(|f| f.path.len()).max().unwrap_or(0).max(5);
    for f in &files {
        println!("{}", format_row(f, width));
    }
    println!("{}", format_row(&total(&files), width).bold());
    Ok(())
}

fn format_row(f: &FileSummary, width: usize) -> String {
    format!(
        "{:<width$}  lines {:>6.1}% ({}/{})  functions {:>6.1}% ({}/{})",
        f.path,
        f.line_percent(),
        f.lines_hit,
        f.lines_found,
        f.function_percent(),
        f.functions_hit,
        f.functions_found,
        width = width
    )
}
