//! Dump pipeline: counter stream + metadata -> LCOV
//!
//! Decodes and merges a counter snapshot, then walks the metadata in
//! package/function/unit index order, joining each unit with its merged
//! count (0 for functions that have no counter record). Under per-function
//! granularity a record holds a single counter shared by all of its units.

use crate::format::counter::CounterDataReader;
use crate::format::error::{DecodeError, DecodeResult};
use crate::format::meta::MetaFileReader;
use crate::lcov::LcovFormatter;
use crate::merge::CounterMerger;
use crate::types::coverage::{CounterGranularity, FuncDesc, FuncPayload, FunctionKey};

/// Result of one dump.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LcovDump {
    /// Rendered tracefile
    pub lcov: Vec<u8>,
    /// Counter records decoded, including merged duplicates
    pub records: usize,
    /// Functions walked in the metadata
    pub functions: usize,
    /// Distinct counter keys with no matching function in the metadata
    pub orphaned: usize,
}

/// Decode every record of `counters` and merge them by function.
pub fn merge_counter_stream(counters: &[u8]) -> DecodeResult<(CounterMerger, [u8; 16])> {
    let mut reader = CounterDataReader::new(counters)?;
    let meta_hash = reader.meta_hash();
    let mut merger = CounterMerger::new();
    let mut payload = FuncPayload::default();
    while reader.next_func(&mut payload)? {
        merger.add(&payload)?;
    }
    Ok((merger, meta_hash))
}

/// Build an LCOV report from a counter snapshot and decoded metadata.
pub fn build_lcov(
    counters: &[u8],
    meta: &MetaFileReader,
    test_name: Option<&str>,
) -> DecodeResult<LcovDump> {
    let (merged, counter_hash) = merge_counter_stream(counters)?;
    if counter_hash != meta.meta_hash() {
        return Err(DecodeError::MetaHashMismatch);
    }

    let mut formatter = LcovFormatter::new(meta.counter_mode());
    if let Some(name) = test_name {
        formatter = formatter.with_test_name(name);
    }

    let per_func = meta.granularity() == CounterGranularity::PerFunc;
    let mut functions = 0;
    let mut matched = 0;
    let mut desc = FuncDesc::default();
    for pkg_idx in 0..meta.num_packages() {
        let pd = meta.package_decoder(pkg_idx)?;
        for func_idx in 0..pd.num_funcs() {
            pd.read_func(func_idx, &mut desc)?;
            functions += 1;

            let key = FunctionKey::new(pkg_idx, func_idx);
            let counts = merged.counters(key);
            if let Some(counts) = counts {
                matched += 1;
                let expected = if per_func {
                    desc.units.len().min(1)
                } else {
                    desc.units.len()
                };
                if counts.len() < expected {
                    return Err(DecodeError::CounterLengthMismatch {
                        key,
                        expected,
                        found: counts.len(),
                    });
                }
            }

            for (i, unit) in desc.units.iter().enumerate() {
                if unit.is_nested() {
                    continue;
                }
                let count = counts
                    .map(|c| if per_func { c[0] } else { c[i] })
                    .unwrap_or(0);
                formatter.add_unit(&desc.src_file, &desc.func_name, desc.is_literal, unit, count);
            }
        }
    }

    Ok(LcovDump {
        lcov: formatter.render().into_bytes(),
        records: merged.records(),
        functions,
        orphaned: merged.len() - matched,
    })
}
