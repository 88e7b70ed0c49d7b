//! Network front ends: the coverage protocol listener and the admin HTTP server

pub mod http;
pub mod tcp;

pub use tcp::{CoverageServer, ServerHandle};
