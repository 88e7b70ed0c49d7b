//! Coverage descriptors
//!
//! Static function/unit shape decoded from the meta-data stream, and the
//! dynamic per-function counter records decoded from the counter stream.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Join key between a counter record and its static function descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionKey {
    /// Package index within the meta-data stream
    pub pkg: u32,

    /// Function index within the package
    pub func: u32,
}

impl FunctionKey {
    pub fn new(pkg: u32, func: u32) -> Self {
        Self { pkg, func }
    }
}

impl fmt::Display for FunctionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.pkg, self.func)
    }
}

/// How counters are updated by the instrumented program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CounterMode {
    /// Counters only record whether a unit executed (0 or 1)
    Set = 1,
    /// Plain execution counts
    Count = 2,
    /// Execution counts updated atomically
    Atomic = 3,
}

impl CounterMode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(CounterMode::Set),
            2 => Some(CounterMode::Count),
            3 => Some(CounterMode::Atomic),
            _ => None,
        }
    }
}

impl fmt::Display for CounterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CounterMode::Set => "set",
            CounterMode::Count => "count",
            CounterMode::Atomic => "atomic",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for CounterMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "set" => Ok(CounterMode::Set),
            "count" => Ok(CounterMode::Count),
            "atomic" => Ok(CounterMode::Atomic),
            _ => anyhow::bail!("Invalid counter mode: {}", s),
        }
    }
}

/// Whether one counter covers a basic block or a whole function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CounterGranularity {
    PerBlock = 1,
    PerFunc = 2,
}

impl CounterGranularity {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(CounterGranularity::PerBlock),
            2 => Some(CounterGranularity::PerFunc),
            _ => None,
        }
    }
}

/// An indivisible span of instrumented code carrying its own counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CoverableUnit {
    pub st_line: u32,
    pub st_col: u32,
    pub en_line: u32,
    pub en_col: u32,

    /// Number of statements in the unit
    pub nx_stmts: u32,

    /// Index of the enclosing unit, or 0 for a top-level unit
    pub parent: u32,
}

impl CoverableUnit {
    /// Create a top-level unit spanning the given positions.
    pub fn new(st_line: u32, st_col: u32, en_line: u32, en_col: u32, nx_stmts: u32) -> Self {
        Self {
            st_line,
            st_col,
            en_line,
            en_col,
            nx_stmts,
            parent: 0,
        }
    }

    /// Set the parent unit index.
    pub fn with_parent(mut self, parent: u32) -> Self {
        self.parent = parent;
        self
    }

    /// Nested units have no representation in LCOV output.
    pub fn is_nested(&self) -> bool {
        self.parent != 0
    }

    /// Source lines spanned by the unit, inclusive.
    pub fn lines(&self) -> std::ops::RangeInclusive<u32> {
        self.st_line..=self.en_line.max(self.st_line)
    }
}

/// Static description of one instrumented function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuncDesc {
    pub src_file: String,
    pub func_name: String,

    /// Function literal (closure) rather than a named function
    pub is_literal: bool,

    pub units: Vec<CoverableUnit>,
}

impl FuncDesc {
    pub fn new(src_file: impl Into<String>, func_name: impl Into<String>) -> Self {
        Self {
            src_file: src_file.into(),
            func_name: func_name.into(),
            is_literal: false,
            units: Vec::new(),
        }
    }

    pub fn literal(mut self) -> Self {
        self.is_literal = true;
        self
    }

    pub fn with_unit(mut self, unit: CoverableUnit) -> Self {
        self.units.push(unit);
        self
    }
}

/// One function's counters as read from the counter stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FuncPayload {
    pub pkg_idx: u32,
    pub func_idx: u32,
    pub counters: Vec<u32>,
}

impl FuncPayload {
    pub fn new(pkg_idx: u32, func_idx: u32, counters: Vec<u32>) -> Self {
        Self {
            pkg_idx,
            func_idx,
            counters,
        }
    }

    pub fn key(&self) -> FunctionKey {
        FunctionKey::new(self.pkg_idx, self.func_idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_mode_codes() {
        assert_eq!(CounterMode::from_u8(1), Some(CounterMode::Set));
        assert_eq!(CounterMode::from_u8(3), Some(CounterMode::Atomic));
        assert_eq!(CounterMode::from_u8(0), None);
        assert_eq!(CounterMode::from_u8(9), None);
        assert_eq!("COUNT".parse::<CounterMode>().unwrap(), CounterMode::Count);
        assert!("sometimes".parse::<CounterMode>().is_err());
    }

    #[test]
    fn test_unit_lines() {
        let unit = CoverableUnit::new(10, 2, 12, 5, 3);
        assert_eq!(unit.lines().collect::<Vec<_>>(), vec![10, 11, 12]);
        assert!(!unit.is_nested());
        assert!(unit.with_parent(1).is_nested());

        // A malformed span never yields an empty range
        let inverted = CoverableUnit::new(7, 0, 3, 0, 1);
        assert_eq!(inverted.lines().collect::<Vec<_>>(), vec![7]);
    }

    #[test]
    fn test_function_key_display() {
        assert_eq!(FunctionKey::new(2, 17).to_string(), "2:17");
    }
}
