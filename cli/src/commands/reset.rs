//! Reset command implementation

use crate::commands::{connect, DEFAULT_ADDR};
use crate::output;
use anyhow::{Context, Result};
use clap::Args;

#[derive(Args, Debug)]
pub struct ResetArgs {
    /// Coverage server address
    #[arg(short, long, env = "COVPULL_ADDR", default_value = DEFAULT_ADDR)]
    pub addr: String,

    /// Connection retries before giving up
    #[arg(long, default_value = "3")]
    pub retries: u32,

    /// Timeout for connecting and for the reset itself
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

pub async fn run(args: ResetArgs) -> Result<()> {
    let timeout = covpull_shared::utils::parse_duration(&args.timeout)
        .context("Failed to parse timeout")?;

    let mut client = connect(&args.addr, args.retries, timeout).await?;
    tokio::time::timeout(timeout, client.reset())
        .await
        .with_context(|| format!("Reset timed out after {:?}", timeout))?
        .context("Reset failed")?;

    output::success(&format!("Counters reset on {}", args.addr));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use covpull_server::{CoverageServer, InProcessRuntime, PackageSpec, ServerConfig};
    use covpull_shared::{CounterMode, CoverableUnit, FuncDesc, FunctionKey};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_reset_clears_counters() {
        let rt = Arc::new(
            InProcessRuntime::builder(CounterMode::Count)
                .args(["cli-test"])
                .package(
                    PackageSpec::new("p", "p", "p")
                        .func(FuncDesc::new("p/x.go", "X").with_unit(CoverableUnit::new(1, 1, 1, 2, 1))),
                )
                .build(),
        );
        let config = ServerConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            admin_addr: None,
            validate_preamble: true,
            test_name: None,
        };
        let handle = CoverageServer::bind(config, rt.clone()).await.unwrap().spawn();
        rt.hit(FunctionKey::new(0, 0), 0);

        run(ResetArgs {
            addr: handle.local_addr().unwrap().to_string(),
            retries: 0,
            timeout: "2s".to_string(),
        })
        .await
        .unwrap();

        assert_eq!(rt.counters(FunctionKey::new(0, 0)), Some(vec![0]));
    }
}
