//! Decode errors for the meta-data and counter streams

use crate::types::coverage::FunctionKey;
use thiserror::Error;

/// Which stream a decode error was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Meta,
    Counter,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Meta => f.write_str("meta-data"),
            StreamKind::Counter => f.write_str("counter"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("truncated stream: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("bad {stream} magic {found:02x?}")]
    BadMagic { stream: StreamKind, found: [u8; 4] },

    #[error("unsupported {stream} stream version {version}")]
    UnsupportedVersion { stream: StreamKind, version: u32 },

    #[error("unsupported counter mode {0}")]
    UnsupportedCounterMode(u8),

    #[error("unsupported counter granularity {0}")]
    UnsupportedGranularity(u8),

    #[error("unsupported counter flavor {0}")]
    UnsupportedFlavor(u8),

    #[error("invalid offset {offset} (+{len}) in stream of {size} bytes")]
    InvalidOffset { offset: u64, len: u64, size: usize },

    #[error("string index {index} out of range ({len} strings)")]
    InvalidStringIndex { index: u32, len: usize },

    #[error("string table entry is not valid UTF-8")]
    InvalidUtf8,

    #[error("ULEB128 value at offset {0} does not fit in 64 bits")]
    Leb128Overflow(usize),

    #[error("package index {index} out of range ({len} packages)")]
    PackageIndexOutOfRange { index: u32, len: u32 },

    #[error("function index {index} out of range ({len} functions)")]
    FunctionIndexOutOfRange { index: u32, len: u32 },

    #[error("function {key} has {found} counters, expected {expected}")]
    CounterLengthMismatch {
        key: FunctionKey,
        expected: usize,
        found: usize,
    },

    #[error("counter stream was produced for different meta-data")]
    MetaHashMismatch,

    #[error("{0} trailing bytes before the counter footer")]
    TrailingData(usize),
}

pub type DecodeResult<T> = Result<T, DecodeError>;
