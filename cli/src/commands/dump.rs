//! Dump command implementation

use crate::commands::{connect, summary, DEFAULT_ADDR};
use crate::output;
use anyhow::{Context, Result};
use clap::Args;
use std::io::Write;
use std::path::PathBuf;
use tracing::debug;

#[derive(Args, Debug)]
pub struct DumpArgs {
    /// Coverage server address
    #[arg(short, long, env = "COVPULL_ADDR", default_value = DEFAULT_ADDR)]
    pub addr: String,

    /// Clear counters once the dump has been taken
    #[arg(long)]
    pub reset: bool,

    /// Write the tracefile here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Print per-file line and function coverage
    #[arg(long)]
    pub summary: bool,

    /// Print the summary as JSON
    #[arg(long, requires = "summary")]
    pub json: bool,

    /// Connection retries before giving up
    #[arg(long, default_value = "3")]
    pub retries: u32,

    /// Timeout for connecting and for the dump itself (e.g., "500ms", "5s")
    #[arg(long, default_value = "5s")]
    pub timeout: String,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

pub async fn run(args: DumpArgs) -> Result<()> {
    let timeout = covpull_shared::utils::parse_duration(&args.timeout)
        .context("Failed to parse timeout")?;

    let mut client = connect(&args.addr, args.retries, timeout).await?;
    let lcov = tokio::time::timeout(timeout, client.dump(args.reset))
        .await
        .with_context(|| format!("Dump timed out after {:?}", timeout))?
        .context("Dump failed")?;
    debug!("Received {} bytes of LCOV from {}", lcov.len(), args.addr);

    match &args.output {
        Some(path) => {
            std::fs::write(path, &lcov)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            output::success(&format!(
                "Wrote {} bytes of LCOV to {}",
                lcov.len(),
                path.display()
            ));
        }
        // With --summary and no file, the summary replaces the tracefile on stdout
        None if !args.summary => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&lcov)?;
            stdout.flush()?;
        }
        None => {}
    }

    if args.reset {
        output::info("Counters reset");
    }

    if args.summary {
        let text = String::from_utf8_lossy(&lcov);
        summary::print_summary(&text, args.json)?;
    }

    Ok(())
}
