//! Prometheus metrics for the coverage server

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram,
    Counter, CounterVec, Encoder, Gauge, Histogram, TextEncoder,
};

// ── Connection metrics ───────────────────────────────────────────────────────

pub static CONNECTIONS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!("covpull_connections_total", "Total connections accepted").unwrap()
});

pub static ACTIVE_CONNECTIONS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "covpull_active_connections",
        "Connections currently being served"
    )
    .unwrap()
});

// ── Request metrics ──────────────────────────────────────────────────────────

pub static REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "covpull_requests_total",
        "Requests received, by command",
        &["command"]
    )
    .unwrap()
});

pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "covpull_errors_total",
        "Requests that failed and closed their connection, by kind",
        &["kind"]
    )
    .unwrap()
});

// ── Dump metrics ─────────────────────────────────────────────────────────────

pub static DUMP_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "covpull_dump_duration_seconds",
        "Time to snapshot, merge and format one dump",
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .unwrap()
});

pub static LCOV_BYTES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!("covpull_lcov_bytes_total", "LCOV bytes served").unwrap()
});

pub static RESETS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!("covpull_resets_total", "Counter resets performed").unwrap()
});

/// Render all registered metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
