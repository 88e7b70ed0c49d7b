//! Client side of the coverage protocol

use covpull_shared::protocol::wire::{BLOCK_CMD_OK, BLOCK_EXECUTION_DATA};
use covpull_shared::protocol::{Command, RequestFrame};
use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

/// Largest LCOV payload accepted by default (256 MiB).
pub const DEFAULT_MAX_PAYLOAD: usize = 256 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("unexpected response tag 0x{found:02x} (expected 0x{expected:02x})")]
    UnexpectedTag { expected: u8, found: u8 },

    #[error("coverage payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: usize },
}

/// Decoded response to one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    /// LCOV payload, present for dump requests
    pub lcov: Option<Vec<u8>>,
}

pub struct CoverageClient {
    stream: TcpStream,
    max_payload: usize,
}

impl CoverageClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            max_payload: DEFAULT_MAX_PAYLOAD,
        })
    }

    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    /// Send one request frame and read its complete response.
    pub async fn send(&mut self, frame: &RequestFrame) -> Result<Response, ClientError> {
        self.stream.write_all(&frame.to_bytes()).await?;
        self.stream.flush().await?;

        let lcov = if frame.command == Command::Dump {
            let tag = self.stream.read_u8().await?;
            expect_tag(BLOCK_EXECUTION_DATA, tag)?;
            let len = self.stream.read_u32_le().await? as usize;
            if len > self.max_payload {
                return Err(ClientError::PayloadTooLarge {
                    len,
                    max: self.max_payload,
                });
            }
            let mut payload = vec![0u8; len];
            self.stream.read_exact(&mut payload).await?;
            Some(payload)
        } else {
            None
        };

        let ack = self.stream.read_u8().await?;
        expect_tag(BLOCK_CMD_OK, ack)?;
        Ok(Response { lcov })
    }

    /// Fetch an LCOV dump, optionally clearing counters afterwards.
    pub async fn dump(&mut self, reset: bool) -> Result<Vec<u8>, ClientError> {
        let response = self.send(&RequestFrame::dump(reset)).await?;
        Ok(response.lcov.unwrap_or_default())
    }

    /// Clear counters without fetching a dump.
    pub async fn reset(&mut self) -> Result<(), ClientError> {
        self.send(&RequestFrame::reset_only()).await.map(|_| ())
    }
}

fn expect_tag(expected: u8, found: u8) -> Result<(), ClientError> {
    if found != expected {
        return Err(ClientError::UnexpectedTag { expected, found });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use covpull_shared::protocol::wire::{encode_coverage_info, REQUEST_SIZE};
    use tokio::net::TcpListener;

    /// One-shot server that reads a request and replies with `reply`.
    async fn canned_server(reply: Vec<u8>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut req = [0u8; REQUEST_SIZE];
            stream.read_exact(&mut req).await.unwrap();
            stream.write_all(&reply).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_dump_reads_payload_and_ack() {
        let mut reply = encode_coverage_info(b"TN:\n").unwrap().to_vec();
        reply.push(BLOCK_CMD_OK);
        let addr = canned_server(reply).await;

        let mut client = CoverageClient::connect(addr).await.unwrap();
        assert_eq!(client.dump(false).await.unwrap(), b"TN:\n");
    }

    #[tokio::test]
    async fn test_reset_expects_only_ack() {
        let addr = canned_server(vec![BLOCK_CMD_OK]).await;
        let mut client = CoverageClient::connect(addr).await.unwrap();
        client.reset().await.unwrap();
    }

    #[tokio::test]
    async fn test_wrong_tag_is_rejected() {
        let addr = canned_server(vec![0x99]).await;
        let mut client = CoverageClient::connect(addr).await.unwrap();
        assert!(matches!(
            client.dump(false).await,
            Err(ClientError::UnexpectedTag {
                expected: 0x11,
                found: 0x99
            })
        ));
    }

    #[tokio::test]
    async fn test_oversized_payload_is_rejected() {
        let addr = canned_server(vec![BLOCK_EXECUTION_DATA, 0x00, 0x10, 0x00, 0x00]).await;
        let mut client = CoverageClient::connect(addr)
            .await
            .unwrap()
            .with_max_payload(1024);
        assert!(matches!(
            client.dump(false).await,
            Err(ClientError::PayloadTooLarge { len: 4096, max: 1024 })
        ));
    }

    #[tokio::test]
    async fn test_truncated_response_is_io_error() {
        let addr = canned_server(vec![BLOCK_EXECUTION_DATA, 10, 0, 0, 0, b'T']).await;
        let mut client = CoverageClient::connect(addr).await.unwrap();
        assert!(matches!(client.dump(false).await, Err(ClientError::Io(_))));
    }
}
