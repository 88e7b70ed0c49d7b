//! Subcommand implementations

pub mod dump;
pub mod reset;
pub mod summary;

use crate::retry::retry_with_backoff;
use anyhow::{Context, Result};
use covpull_server::CoverageClient;
use std::time::Duration;

pub const DEFAULT_ADDR: &str = "127.0.0.1:3001";

const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Connect to a coverage server, retrying refused or timed-out attempts.
pub async fn connect(addr: &str, retries: u32, timeout: Duration) -> Result<CoverageClient> {
    retry_with_backoff("connect", retries, INITIAL_RETRY_DELAY, move || async move {
        tokio::time::timeout(timeout, CoverageClient::connect(addr))
            .await
            .map_err(|_| anyhow::anyhow!("timed out after {:?}", timeout))?
            .map_err(anyhow::Error::from)
    })
    .await
    .with_context(|| format!("Failed to connect to coverage server at {}", addr))
}
