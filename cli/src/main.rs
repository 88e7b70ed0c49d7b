//! CLI for covpull
//!
//! Talks to a coverage server embedded in a running process:
//! - dump: fetch the current coverage as an LCOV tracefile
//! - reset: clear the process's counters
//! - summary: per-file totals of an LCOV tracefile

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod output;
mod retry;

#[derive(Parser)]
#[command(name = "covpull")]
#[command(about = "covpull - pull LCOV coverage from a running process", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a coverage dump
    Dump(commands::dump::DumpArgs),

    /// Clear coverage counters without dumping
    Reset(commands::reset::ResetArgs),

    /// Summarize an LCOV tracefile
    Summary(commands::summary::SummaryArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Dump(args) => {
            init_tracing(args.verbose);
            commands::dump::run(args).await
        }
        Commands::Reset(args) => {
            init_tracing(false);
            commands::reset::run(args).await
        }
        Commands::Summary(args) => commands::summary::run(args).await,
    };

    if let Err(e) = result {
        output::error(&format!("{:#}", e));
        std::process::exit(1);
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // stdout may carry the tracefile
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}
