//! Audit logging for connection and counter-state events.
//!
//! All events are emitted via `tracing` with a dedicated target so they can be
//! filtered and formatted (e.g. JSON) separately from operational logs.

use std::net::SocketAddr;
use tracing::{info, warn};

pub const AUDIT_TARGET: &str = "covpull::audit";

/// Log an accepted protocol connection.
pub fn connection_accepted(peer: SocketAddr) {
    info!(
        target: AUDIT_TARGET,
        event = "connection_accepted",
        peer = %peer,
    );
}

/// Log a closed protocol connection and how many requests it served.
pub fn connection_closed(peer: SocketAddr, requests: u64) {
    info!(
        target: AUDIT_TARGET,
        event = "connection_closed",
        peer = %peer,
        requests = requests,
    );
}

/// Log a request whose preamble did not match.
pub fn preamble_rejected(peer: SocketAddr, preamble: &[u8]) {
    warn!(
        target: AUDIT_TARGET,
        event = "preamble_rejected",
        result = "denied",
        peer = %peer,
        preamble = %covpull_shared::utils::bytes_to_hex(preamble),
    );
}

/// Log a counter reset requested by `peer`.
pub fn counters_reset(peer: SocketAddr) {
    info!(
        target: AUDIT_TARGET,
        event = "counters_reset",
        peer = %peer,
    );
}

/// Log admin HTTP request (sensitive endpoints: metrics, readiness).
pub fn admin_http_request(path: &str, status: u16) {
    info!(
        target: AUDIT_TARGET,
        event = "admin_http_request",
        path = %path,
        status = %status,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_target_is_static() {
        assert_eq!(AUDIT_TARGET, "covpull::audit");
    }
}
