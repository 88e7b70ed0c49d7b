//! Per-request server errors
//!
//! Any of these ends the connection that produced it; the listener and
//! other connections are unaffected.

use covpull_shared::DecodeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("connection I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("coverage data could not be decoded: {0}")]
    Decode(#[from] DecodeError),

    #[error("coverage runtime failed: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("bad request preamble {found:02x?}")]
    BadPreamble { found: [u8; 5] },

    #[error("dump task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("LCOV payload of {0} bytes does not fit the length field")]
    PayloadTooLarge(usize),
}

impl ServerError {
    /// Label used for the `kind` dimension of the error metric.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerError::Io(_) => "io",
            ServerError::Decode(_) => "decode",
            ServerError::Runtime(_) => "runtime",
            ServerError::BadPreamble { .. } => "bad_preamble",
            ServerError::Task(_) => "task",
            ServerError::PayloadTooLarge(_) => "payload_too_large",
        }
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
