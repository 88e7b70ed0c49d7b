//! Coverage protocol server
//!
//! Accepts connections until shut down and serves each one on its own task.
//! A connection carries any number of 8-byte requests; every request is
//! answered with an optional coverage-info block and a final `0x20`.

use crate::audit;
use crate::config::ServerConfig;
use crate::dump::DumpService;
use crate::error::{ServerError, ServerResult};
use crate::metrics;
use crate::runtime::CoverageRuntime;
use crate::server::http;
use anyhow::Context;
use bytes::Bytes;
use covpull_shared::protocol::wire::{encode_coverage_info, BLOCK_CMD_OK, REQUEST_SIZE};
use covpull_shared::protocol::{Command, RequestFrame};
use hyper::server::conn::AddrIncoming;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// State shared by every connection task.
struct Shared {
    service: Arc<DumpService>,
    /// Serializes dump/reset pairs across connections
    lock: Arc<Mutex<()>>,
    validate_preamble: bool,
    /// Largest LCOV payload a dump may produce
    max_payload: usize,
}

pub struct CoverageServer {
    listener: TcpListener,
    admin: Option<AddrIncoming>,
    shared: Arc<Shared>,
}

impl CoverageServer {
    /// Validate `config` and bind the protocol (and, if configured, admin) listeners.
    pub async fn bind(config: ServerConfig, runtime: Arc<dyn CoverageRuntime>) -> anyhow::Result<Self> {
        config.validate()?;

        let addr = config.listen_socket_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind coverage listener on {}", addr))?;

        let admin = match config.admin_socket_addr()? {
            Some(addr) => Some(
                AddrIncoming::bind(&addr)
                    .with_context(|| format!("Failed to bind admin listener on {}", addr))?,
            ),
            None => None,
        };

        let service = DumpService::new(runtime).with_test_name(config.test_name.clone());
        Ok(Self {
            listener,
            admin,
            shared: Arc::new(Shared {
                service: Arc::new(service),
                lock: Arc::new(Mutex::new(())),
                validate_preamble: config.validate_preamble,
                max_payload: u32::MAX as usize,
            }),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn admin_addr(&self) -> Option<SocketAddr> {
        self.admin.as_ref().map(|a| a.local_addr())
    }

    pub fn service(&self) -> Arc<DumpService> {
        self.shared.service.clone()
    }

    /// Run the accept loop on a background task.
    pub fn spawn(self) -> ServerHandle {
        let token = CancellationToken::new();
        let addr = self.local_addr().ok();
        let admin_addr = self.admin_addr();
        let run_token = token.clone();
        let task = tokio::spawn(async move { self.run(run_token).await });
        ServerHandle {
            addr,
            admin_addr,
            token,
            task,
        }
    }

    /// Accept connections until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let CoverageServer {
            listener,
            admin,
            shared,
        } = self;

        let addr = listener.local_addr()?;
        info!("Coverage server listening on {}", addr);

        if let Some(incoming) = admin {
            let service = shared.service.clone();
            let token = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = http::serve_admin(incoming, service, token).await {
                    warn!("Admin HTTP server error: {}", e);
                }
            });
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let shared = shared.clone();
                        let token = shutdown.child_token();
                        tokio::spawn(serve_connection(stream, peer, shared, token));
                    }
                    Err(e) => {
                        // e.g. EMFILE; retry after a short pause
                        warn!("Accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }

        info!("Coverage server on {} stopped", addr);
        Ok(())
    }
}

/// Handle to a spawned [`CoverageServer`].
pub struct ServerHandle {
    addr: Option<SocketAddr>,
    admin_addr: Option<SocketAddr>,
    token: CancellationToken,
    task: JoinHandle<anyhow::Result<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    pub fn admin_addr(&self) -> Option<SocketAddr> {
        self.admin_addr
    }

    /// Stop accepting connections and close idle ones.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Wait for the accept loop to finish.
    pub async fn join(self) -> anyhow::Result<()> {
        self.task.await.context("Coverage server task panicked")?
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
) {
    audit::connection_accepted(peer);
    metrics::CONNECTIONS_TOTAL.inc();
    metrics::ACTIVE_CONNECTIONS.inc();

    let mut requests = 0u64;
    let result = handle_connection(stream, peer, &shared, &shutdown, &mut requests).await;

    metrics::ACTIVE_CONNECTIONS.dec();
    if let Err(e) = result {
        metrics::ERRORS_TOTAL.with_label_values(&[e.kind()]).inc();
        warn!(peer = %peer, error = %e, "Closing connection after failed request");
    }
    audit::connection_closed(peer, requests);
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    shared: &Shared,
    shutdown: &CancellationToken,
    requests: &mut u64,
) -> ServerResult<()> {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("set_nodelay failed for {}: {}", peer, e);
    }

    loop {
        // EOF is only clean before the first byte of a frame
        let mut buf = [0u8; REQUEST_SIZE];
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            read = stream.read(&mut buf[..1]) => {
                if read? == 0 {
                    return Ok(());
                }
            }
        }
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            read = stream.read_exact(&mut buf[1..]) => {
                read?;
            }
        }
        *requests += 1;

        let frame = RequestFrame::from_bytes(buf);
        metrics::REQUESTS_TOTAL
            .with_label_values(&[frame.command.label()])
            .inc();

        if shared.validate_preamble && !frame.has_valid_preamble() {
            audit::preamble_rejected(peer, &frame.preamble);
            return Err(ServerError::BadPreamble {
                found: frame.preamble,
            });
        }

        serve_request(&mut stream, peer, &frame, shared).await?;
    }
}

async fn serve_request(
    stream: &mut TcpStream,
    peer: SocketAddr,
    frame: &RequestFrame,
    shared: &Shared,
) -> ServerResult<()> {
    debug!(peer = %peer, command = frame.command.label(), reset = frame.reset, "Request");

    let block = execute(peer, frame, shared).await?;
    if let Some(block) = &block {
        stream.write_all(block).await?;
    }
    stream.write_all(&[BLOCK_CMD_OK]).await?;
    stream.flush().await?;
    Ok(())
}

/// Run the request's dump and reset under the lock and return the encoded
/// coverage-info block, if any. The response is written after the lock is
/// released. An oversized dump fails before the reset.
async fn execute(peer: SocketAddr, frame: &RequestFrame, shared: &Shared) -> ServerResult<Option<Bytes>> {
    let _guard = shared.lock.clone().lock_owned().await;

    let block = if frame.command == Command::Dump {
        let service = shared.service.clone();
        let dump = tokio::task::spawn_blocking(move || service.dump()).await??;
        let len = dump.lcov.len();
        if len > shared.max_payload {
            return Err(ServerError::PayloadTooLarge(len));
        }
        let block = encode_coverage_info(&dump.lcov).map_err(|_| ServerError::PayloadTooLarge(len))?;
        metrics::LCOV_BYTES_TOTAL.inc_by(len as f64);
        Some(block)
    } else {
        None
    };

    if frame.reset {
        let service = shared.service.clone();
        tokio::task::spawn_blocking(move || service.reset()).await??;
        audit::counters_reset(peer);
    }

    Ok(block)
}
