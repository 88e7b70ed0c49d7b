//! Per-dump counter merging
//!
//! A function's counters may be split across several segments of one
//! counter stream. Records sharing a [`FunctionKey`] are summed
//! elementwise. Addition wraps: overflow is not detected.

use crate::arena::{CounterArena, CounterSlot};
use crate::format::error::{DecodeError, DecodeResult};
use crate::types::coverage::{FuncPayload, FunctionKey};
use std::collections::HashMap;

/// Add `src` into `dst` elementwise. Lengths must already agree.
pub fn merge_counters(dst: &mut [u32], src: &[u32]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d = d.wrapping_add(*s);
    }
}

/// Accumulates merged counters for one dump.
#[derive(Debug, Default)]
pub struct CounterMerger {
    arena: CounterArena,
    merged: HashMap<FunctionKey, CounterSlot>,
    records: usize,
}

impl CounterMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one record into the map.
    pub fn add(&mut self, payload: &FuncPayload) -> DecodeResult<()> {
        let key = payload.key();
        self.records += 1;
        match self.merged.get(&key) {
            Some(&slot) => {
                if slot.len() != payload.counters.len() {
                    return Err(DecodeError::CounterLengthMismatch {
                        key,
                        expected: slot.len(),
                        found: payload.counters.len(),
                    });
                }
                merge_counters(self.arena.get_mut(slot), &payload.counters);
            }
            None => {
                let slot = self.arena.allocate(payload.counters.len());
                self.arena.get_mut(slot).copy_from_slice(&payload.counters);
                self.merged.insert(key, slot);
            }
        }
        Ok(())
    }

    pub fn counters(&self, key: FunctionKey) -> Option<&[u32]> {
        self.merged.get(&key).map(|&slot| self.arena.get(slot))
    }

    /// Number of distinct functions seen.
    pub fn len(&self) -> usize {
        self.merged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.merged.is_empty()
    }

    /// Number of records folded in, including merged duplicates.
    pub fn records(&self) -> usize {
        self.records
    }

    pub fn keys(&self) -> impl Iterator<Item = FunctionKey> + '_ {
        self.merged.keys().copied()
    }

    pub fn arena(&self) -> &CounterArena {
        &self.arena
    }
}
