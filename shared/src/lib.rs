//! Shared coverage pipeline for covpull
//!
//! This crate holds everything that does not touch the network: decoders
//! for the meta-data and counter streams, the per-dump counter arena and
//! merger, the LCOV formatter, and the wire frames spoken by the server and
//! its clients.

pub mod arena;
pub mod format;
pub mod lcov;
pub mod merge;
pub mod protocol;
pub mod report;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use format::{DecodeError, MetaFileReader};
pub use report::{build_lcov, LcovDump};
pub use types::coverage::*;
