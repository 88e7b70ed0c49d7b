//! Coverage runtime collaborator
//!
//! The server never touches instrumentation directly. It asks a
//! [`CoverageRuntime`] for a counter snapshot, the static metadata, or a
//! reset. [`InProcessRuntime`] is a self-contained implementation backed by
//! atomic counters, used by hosts that instrument themselves and by tests.

use covpull_shared::format::encode::{CounterFileWriter, MetaFileWriter, PackageMetaBuilder};
use covpull_shared::format::CounterFlavor;
use covpull_shared::{CounterGranularity, CounterMode, FuncDesc, FuncPayload, FunctionKey};
use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Source of coverage data for the server.
pub trait CoverageRuntime: Send + Sync + 'static {
    /// Write a snapshot of the live counters as a counter stream.
    fn write_counters(&self, sink: &mut dyn Write) -> io::Result<()>;

    /// Write the static metadata stream.
    fn write_meta(&self, sink: &mut dyn Write) -> io::Result<()>;

    /// Zero every live counter.
    fn clear_counters(&self) -> io::Result<()>;
}

impl<T: CoverageRuntime + ?Sized> CoverageRuntime for Arc<T> {
    fn write_counters(&self, sink: &mut dyn Write) -> io::Result<()> {
        (**self).write_counters(sink)
    }

    fn write_meta(&self, sink: &mut dyn Write) -> io::Result<()> {
        (**self).write_meta(sink)
    }

    fn clear_counters(&self) -> io::Result<()> {
        (**self).clear_counters()
    }
}

/// One instrumented package: its identity and the functions it contains,
/// in function-index order.
#[derive(Debug, Clone, Default)]
pub struct PackageSpec {
    pub path: String,
    pub name: String,
    pub module_path: String,
    pub functions: Vec<FuncDesc>,
}

impl PackageSpec {
    pub fn new(path: impl Into<String>, name: impl Into<String>, module_path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            module_path: module_path.into(),
            functions: Vec::new(),
        }
    }

    pub fn func(mut self, desc: FuncDesc) -> Self {
        self.functions.push(desc);
        self
    }
}

struct FuncCounters {
    key: FunctionKey,
    num_units: usize,
    /// One slot per unit, or a single slot under per-function granularity
    counters: Box<[AtomicU32]>,
}

pub struct RuntimeBuilder {
    mode: CounterMode,
    granularity: CounterGranularity,
    flavor: CounterFlavor,
    packages: Vec<PackageSpec>,
    args: Option<Vec<String>>,
}

impl RuntimeBuilder {
    pub fn package(mut self, package: PackageSpec) -> Self {
        self.packages.push(package);
        self
    }

    /// Counter granularity (default per block). Per-function runtimes keep a
    /// single counter per function, bumped by a hit on any of its units.
    pub fn granularity(mut self, granularity: CounterGranularity) -> Self {
        self.granularity = granularity;
        self
    }

    /// Counter encoding used for snapshots (default ULEB128).
    pub fn flavor(mut self, flavor: CounterFlavor) -> Self {
        self.flavor = flavor;
        self
    }

    /// Process arguments recorded in each snapshot. Defaults to `std::env::args()`.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    /// Freeze the metadata and allocate zeroed counters.
    pub fn build(self) -> InProcessRuntime {
        let mut meta = MetaFileWriter::new(self.mode, self.granularity);
        let mut funcs = Vec::new();
        let mut index = HashMap::new();

        for pkg in &self.packages {
            let mut builder = PackageMetaBuilder::new(&pkg.path, &pkg.name, &pkg.module_path);
            let mut descs = Vec::with_capacity(pkg.functions.len());
            for desc in &pkg.functions {
                descs.push((builder.add_func(desc), desc.units.len()));
            }
            let pkg_idx = meta.add_package(builder);
            for (func_idx, num_units) in descs {
                let key = FunctionKey::new(pkg_idx, func_idx);
                let slots = match self.granularity {
                    CounterGranularity::PerBlock => num_units,
                    CounterGranularity::PerFunc => num_units.min(1),
                };
                index.insert(key, funcs.len());
                funcs.push(FuncCounters {
                    key,
                    num_units,
                    counters: (0..slots).map(|_| AtomicU32::new(0)).collect(),
                });
            }
        }

        let argv = self.args.unwrap_or_else(|| std::env::args().collect());
        let mut args = vec![("argc".to_string(), argv.len().to_string())];
        args.extend(
            argv.into_iter()
                .enumerate()
                .map(|(i, a)| (format!("argv{i}"), a)),
        );

        InProcessRuntime {
            mode: self.mode,
            granularity: self.granularity,
            flavor: self.flavor,
            meta_hash: meta.meta_hash(),
            meta: meta.encode(),
            args,
            funcs,
            index,
        }
    }
}

/// Coverage runtime holding its counters in memory.
pub struct InProcessRuntime {
    mode: CounterMode,
    granularity: CounterGranularity,
    flavor: CounterFlavor,
    meta: Vec<u8>,
    meta_hash: [u8; 16],
    args: Vec<(String, String)>,
    funcs: Vec<FuncCounters>,
    index: HashMap<FunctionKey, usize>,
}

impl InProcessRuntime {
    pub fn builder(mode: CounterMode) -> RuntimeBuilder {
        RuntimeBuilder {
            mode,
            granularity: CounterGranularity::PerBlock,
            flavor: CounterFlavor::Uleb128,
            packages: Vec::new(),
            args: None,
        }
    }

    pub fn mode(&self) -> CounterMode {
        self.mode
    }

    pub fn granularity(&self) -> CounterGranularity {
        self.granularity
    }

    pub fn meta_hash(&self) -> [u8; 16] {
        self.meta_hash
    }

    pub fn num_functions(&self) -> usize {
        self.funcs.len()
    }

    /// Record one execution of `unit`. Returns false for an unknown key or unit.
    pub fn hit(&self, key: FunctionKey, unit: usize) -> bool {
        self.add(key, unit, 1)
    }

    /// Record `n` executions of `unit`. Count and atomic modes wrap on
    /// overflow; set mode stores 1 for any nonzero `n`.
    pub fn add(&self, key: FunctionKey, unit: usize, n: u32) -> bool {
        let Some(f) = self.index.get(&key).map(|&i| &self.funcs[i]) else {
            return false;
        };
        if unit >= f.num_units {
            return false;
        }
        let slot = match self.granularity {
            CounterGranularity::PerBlock => unit,
            CounterGranularity::PerFunc => 0,
        };
        let Some(counter) = f.counters.get(slot) else {
            return false;
        };
        match self.mode {
            CounterMode::Set => {
                if n > 0 {
                    counter.store(1, Ordering::Relaxed);
                }
            }
            CounterMode::Count | CounterMode::Atomic => {
                counter.fetch_add(n, Ordering::Relaxed);
            }
        }
        true
    }

    /// Current counters of one function, as they appear in a snapshot.
    pub fn counters(&self, key: FunctionKey) -> Option<Vec<u32>> {
        self.index.get(&key).map(|&i| {
            self.funcs[i]
                .counters
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .collect()
        })
    }
}

impl CoverageRuntime for InProcessRuntime {
    fn write_counters(&self, sink: &mut dyn Write) -> io::Result<()> {
        let mut writer = CounterFileWriter::new(self.meta_hash, self.flavor);
        let args: Vec<(&str, &str)> = self
            .args
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        writer.begin_segment(&args);

        let mut payload = FuncPayload::default();
        for f in &self.funcs {
            payload.pkg_idx = f.key.pkg;
            payload.func_idx = f.key.func;
            payload.counters.clear();
            payload
                .counters
                .extend(f.counters.iter().map(|c| c.load(Ordering::Relaxed)));
            // Functions never executed are left out; the formatter reports them as zero
            if payload.counters.iter().any(|&c| c != 0) {
                writer.add_func(&payload);
            }
        }

        sink.write_all(&writer.encode())
    }

    fn write_meta(&self, sink: &mut dyn Write) -> io::Result<()> {
        sink.write_all(&self.meta)
    }

    fn clear_counters(&self) -> io::Result<()> {
        for f in &self.funcs {
            for c in f.counters.iter() {
                c.store(0, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}
