//! Coverage server library
//!
//! Embeds in an instrumented process and answers dump/reset requests over
//! TCP with LCOV built from the process's live counters.

pub mod audit;
pub mod client;
pub mod config;
pub mod dump;
pub mod error;
pub mod metrics;
pub mod runtime;
pub mod server;

pub use client::{ClientError, CoverageClient};
pub use config::ServerConfig;
pub use error::ServerError;
pub use runtime::{CoverageRuntime, InProcessRuntime, PackageSpec};
pub use server::{CoverageServer, ServerHandle};

use std::sync::Arc;

/// Start a coverage server for `runtime`, configured from the environment.
pub async fn start(runtime: impl CoverageRuntime) -> anyhow::Result<ServerHandle> {
    let server = CoverageServer::bind(ServerConfig::default(), Arc::new(runtime)).await?;
    Ok(server.spawn())
}
