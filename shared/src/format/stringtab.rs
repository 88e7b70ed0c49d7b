//! Length-prefixed string tables
//!
//! Layout: `uleb128 count`, then per entry `uleb128 len` followed by `len`
//! UTF-8 bytes. Entries are referenced by their position.

use super::error::{DecodeError, DecodeResult};
use super::reader::{append_uleb128, SliceReader};
use std::collections::HashMap;

/// Decoded string table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringTable {
    strings: Vec<String>,
}

impl StringTable {
    /// Read a table starting at the reader's current position.
    pub fn read(r: &mut SliceReader<'_>) -> DecodeResult<Self> {
        let count = r.read_uleb128()?;
        // Every entry takes at least one byte, which bounds the allocation
        if count > r.remaining() as u64 {
            return Err(DecodeError::Truncated {
                offset: r.offset(),
                needed: count as usize,
                available: r.remaining(),
            });
        }
        let mut strings = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let len = r.read_uleb128()?;
            let len = usize::try_from(len).map_err(|_| DecodeError::Leb128Overflow(r.offset()))?;
            let bytes = r.read_bytes(len)?;
            let s = std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)?;
            strings.push(s.to_string());
        }
        Ok(Self { strings })
    }

    pub fn get(&self, index: u32) -> DecodeResult<&str> {
        self.strings
            .get(index as usize)
            .map(String::as_str)
            .ok_or(DecodeError::InvalidStringIndex {
                index,
                len: self.strings.len(),
            })
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

/// Interning string table builder.
#[derive(Debug, Clone, Default)]
pub struct StringTableWriter {
    strings: Vec<String>,
    index: HashMap<String, u32>,
}

impl StringTableWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the index of `s`, adding it if absent.
    pub fn lookup_or_add(&mut self, s: &str) -> u32 {
        if let Some(&idx) = self.index.get(s) {
            return idx;
        }
        let idx = self.strings.len() as u32;
        self.strings.push(s.to_string());
        self.index.insert(s.to_string(), idx);
        idx
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        append_uleb128(&mut out, self.strings.len() as u64);
        for s in &self.strings {
            append_uleb128(&mut out, s.len() as u64);
            out.extend_from_slice(s.as_bytes());
        }
        out
    }
}
