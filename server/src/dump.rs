//! Dump service: runtime snapshot -> LCOV
//!
//! Owns the decoded metadata for the lifetime of the server. The metadata
//! stream is static, so it is decoded once on first use; a failed decode
//! leaves the cache empty and the next request tries again.

use crate::error::{ServerError, ServerResult};
use crate::metrics;
use crate::runtime::CoverageRuntime;
use covpull_shared::{build_lcov, LcovDump, MetaFileReader};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

pub struct DumpService {
    runtime: Arc<dyn CoverageRuntime>,
    meta: OnceCell<Arc<MetaFileReader>>,
    test_name: Option<String>,
}

impl DumpService {
    pub fn new(runtime: Arc<dyn CoverageRuntime>) -> Self {
        Self {
            runtime,
            meta: OnceCell::new(),
            test_name: None,
        }
    }

    pub fn with_test_name(mut self, name: Option<String>) -> Self {
        self.test_name = name;
        self
    }

    /// Decoded metadata, decoding it on first call.
    pub fn metadata(&self) -> ServerResult<Arc<MetaFileReader>> {
        self.meta
            .get_or_try_init(|| {
                let mut buf = Vec::new();
                self.runtime.write_meta(&mut buf).map_err(ServerError::Runtime)?;
                let reader = MetaFileReader::new(buf)?;
                debug!(
                    packages = reader.num_packages(),
                    mode = %reader.counter_mode(),
                    "Decoded coverage metadata"
                );
                Ok(Arc::new(reader))
            })
            .cloned()
    }

    /// True once metadata has been decoded successfully.
    pub fn is_ready(&self) -> bool {
        self.meta.get().is_some()
    }

    /// Snapshot the counters and render them as LCOV. Blocking; callers on
    /// the async runtime go through `spawn_blocking`.
    pub fn dump(&self) -> ServerResult<LcovDump> {
        let start = Instant::now();
        let meta = self.metadata()?;

        let mut counters = Vec::new();
        self.runtime
            .write_counters(&mut counters)
            .map_err(ServerError::Runtime)?;

        let dump = build_lcov(&counters, &meta, self.test_name.as_deref())?;

        metrics::DUMP_DURATION.observe(start.elapsed().as_secs_f64());
        debug!(
            counter_bytes = counters.len(),
            records = dump.records,
            functions = dump.functions,
            orphaned = dump.orphaned,
            lcov_bytes = dump.lcov.len(),
            "Dump complete"
        );
        Ok(dump)
    }

    pub fn reset(&self) -> ServerResult<()> {
        self.runtime.clear_counters().map_err(ServerError::Runtime)?;
        metrics::RESETS_TOTAL.inc();
        Ok(())
    }
}
