//! LCOV tracefile formatter
//!
//! Collects per-unit coverage points and renders them in the LCOV grammar:
//!
//! ```text
//! TN:<test name>
//! SF:<source file>
//! FN:<line>,<function name>
//! FNDA:<execution count>,<function name>
//! FNF:<functions found>
//! FNH:<functions hit>
//! DA:<line>,<execution count>
//! LF:<lines found>
//! LH:<lines hit>
//! end_of_record
//! ```
//!
//! Records are ordered by source path, functions by first appearance and
//! lines numerically, so identical inputs always render identical bytes.

use crate::types::coverage::{CounterMode, CoverableUnit};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

#[derive(Debug, Clone)]
struct FunctionRecord {
    name: String,
    is_literal: bool,
}

#[derive(Debug, Clone, Default)]
struct SourceRecord {
    functions: Vec<FunctionRecord>,
    lookup: HashMap<(String, bool), usize>,
    /// (function index, unit) -> count
    units: BTreeMap<(usize, CoverableUnit), u32>,
}

impl SourceRecord {
    fn function_index(&mut self, name: &str, is_literal: bool) -> usize {
        if let Some(&idx) = self.lookup.get(&(name.to_string(), is_literal)) {
            return idx;
        }
        let idx = self.functions.len();
        self.functions.push(FunctionRecord {
            name: name.to_string(),
            is_literal,
        });
        self.lookup.insert((name.to_string(), is_literal), idx);
        idx
    }
}

/// LCOV report builder.
#[derive(Debug, Clone)]
pub struct LcovFormatter {
    mode: CounterMode,
    test_name: String,
    files: BTreeMap<String, SourceRecord>,
}

impl LcovFormatter {
    pub fn new(mode: CounterMode) -> Self {
        Self {
            mode,
            test_name: String::new(),
            files: BTreeMap::new(),
        }
    }

    /// Set the `TN:` value written at the top of each record.
    pub fn with_test_name(mut self, name: impl Into<String>) -> Self {
        self.test_name = name.into();
        self
    }

    pub fn mode(&self) -> CounterMode {
        self.mode
    }

    /// Number of source files with at least one unit.
    pub fn num_files(&self) -> usize {
        self.files.len()
    }

    /// Record one coverage point. Nested units (nonzero parent) are ignored:
    /// LCOV has no way to represent them.
    pub fn add_unit(
        &mut self,
        src_file: &str,
        func_name: &str,
        is_literal: bool,
        unit: &CoverableUnit,
        count: u32,
    ) {
        if unit.is_nested() {
            return;
        }
        let count = match self.mode {
            CounterMode::Set => count.min(1),
            CounterMode::Count | CounterMode::Atomic => count,
        };

        let record = self.files.entry(src_file.to_string()).or_default();
        let fidx = record.function_index(func_name, is_literal);
        let mode = self.mode;
        record
            .units
            .entry((fidx, *unit))
            .and_modify(|prev| {
                *prev = match mode {
                    CounterMode::Set => (*prev).max(count),
                    CounterMode::Count | CounterMode::Atomic => prev.saturating_add(count),
                }
            })
            .or_insert(count);
    }

    /// Render every record.
    pub fn render(&self) -> String {
        let mut out = String::new();

        for (path, record) in &self.files {
            let _ = writeln!(out, "TN:{}", self.test_name);
            let _ = writeln!(out, "SF:{path}");

            // Units are ordered by (function, position), so the first unit
            // seen for a function is its entry block.
            let mut entry: Vec<Option<(u32, u32)>> = vec![None; record.functions.len()];
            let mut lines: BTreeMap<u32, u32> = BTreeMap::new();
            for (&(fidx, unit), &count) in &record.units {
                if entry[fidx].is_none() {
                    entry[fidx] = Some((unit.st_line, count));
                }
                for line in unit.lines() {
                    let slot = lines.entry(line).or_insert(0);
                    *slot = (*slot).max(count);
                }
            }

            let named: Vec<(&FunctionRecord, u32, u32)> = record
                .functions
                .iter()
                .zip(&entry)
                .filter(|(f, _)| !f.is_literal)
                .filter_map(|(f, &e)| e.map(|(line, count)| (f, line, count)))
                .collect();

            for (f, line, _) in &named {
                let _ = writeln!(out, "FN:{},{}", line, f.name);
            }
            let mut functions_hit = 0;
            for (f, _, count) in &named {
                let _ = writeln!(out, "FNDA:{},{}", count, f.name);
                if *count > 0 {
                    functions_hit += 1;
                }
            }
            let _ = writeln!(out, "FNF:{}", named.len());
            let _ = writeln!(out, "FNH:{functions_hit}");

            let mut lines_hit = 0;
            for (line, count) in &lines {
                let _ = writeln!(out, "DA:{line},{count}");
                if *count > 0 {
                    lines_hit += 1;
                }
            }
            let _ = writeln!(out, "LF:{}", lines.len());
            let _ = writeln!(out, "LH:{lines_hit}");

            out.push_str("end_of_record\n");
        }

        out
    }

    /// Write the rendered report to `w`.
    pub fn emit_lcov<W: std::io::Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_all(self.render().as_bytes())
    }
}

/// Per-file totals read back from a tracefile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSummary {
    pub path: String,
    pub lines_found: u64,
    pub lines_hit: u64,
    pub functions_found: u64,
    pub functions_hit: u64,
}

impl FileSummary {
    pub fn line_percent(&self) -> f64 {
        percent(self.lines_hit, self.lines_found)
    }

    pub fn function_percent(&self) -> f64 {
        percent(self.functions_hit, self.functions_found)
    }
}

fn percent(hit: u64, found: u64) -> f64 {
    if found == 0 {
        return 0.0;
    }
    hit as f64 * 100.0 / found as f64
}

/// Extract `SF`/`LF`/`LH`/`FNF`/`FNH` totals from a tracefile.
/// Records for the same path are added together.
pub fn summarize(tracefile: &str) -> Vec<FileSummary> {
    let mut files: BTreeMap<String, FileSummary> = BTreeMap::new();
    let mut current: Option<FileSummary> = None;

    for line in tracefile.lines() {
        let line = line.trim();
        if line == "end_of_record" {
            if let Some(done) = current.take() {
                let entry = files.entry(done.path.clone()).or_insert_with(|| FileSummary {
                    path: done.path.clone(),
                    ..Default::default()
                });
                entry.lines_found += done.lines_found;
                entry.lines_hit += done.lines_hit;
                entry.functions_found += done.functions_found;
                entry.functions_hit += done.functions_hit;
            }
            continue;
        }
        let Some((tag, value)) = line.split_once(':') else {
            continue;
        };
        if tag == "SF" {
            current = Some(FileSummary {
                path: value.to_string(),
                ..Default::default()
            });
            continue;
        }
        let Some(summary) = current.as_mut() else {
            continue;
        };
        let parsed = value.parse::<u64>().unwrap_or(0);
        match tag {
            "LF" => summary.lines_found = parsed,
            "LH" => summary.lines_hit = parsed,
            "FNF" => summary.functions_found = parsed,
            "FNH" => summary.functions_hit = parsed,
            _ => {}
        }
    }

    files.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(line: u32) -> CoverableUnit {
        CoverableUnit::new(line, 1, line, 20, 1)
    }

    #[test]
    fn test_single_function_record() {
        let mut f = LcovFormatter::new(CounterMode::Count).with_test_name("fuzz");
        f.add_unit("pkg/a.go", "A", false, &unit(10), 3);
        f.add_unit("pkg/a.go", "A", false, &unit(11), 0);

        let expected = "TN:fuzz\n\
                        SF:pkg/a.go\n\
                        FN:10,A\n\
                        FNDA:3,A\n\
                        FNF:1\n\
                        FNH:1\n\
                        DA:10,3\n\
                        DA:11,0\n\
                        LF:2\n\
                        LH:1\n\
                        end_of_record\n";
        assert_eq!(f.render(), expected);
    }

    #[test]
    fn test_nested_units_are_dropped() {
        let mut f = LcovFormatter::new(CounterMode::Count);
        f.add_unit("a.go", "A", false, &unit(1), 1);
        f.add_unit("a.go", "A", false, &unit(2).with_parent(1), 9);
        let out = f.render();
        assert!(!out.contains("DA:2,"));
        assert!(out.contains("LF:1\n"));
    }

    #[test]
    fn test_files_sorted_and_functions_in_appearance_order() {
        let mut f = LcovFormatter::new(CounterMode::Count);
        f.add_unit("z.go", "Z", false, &unit(1), 1);
        f.add_unit("a.go", "Second", false, &unit(20), 0);
        f.add_unit("a.go", "First", false, &unit(5), 2);
        let out = f.render();

        assert!(out.find("SF:a.go").unwrap() < out.find("SF:z.go").unwrap());
        assert!(out.find("FN:20,Second").unwrap() < out.find("FN:5,First").unwrap());
        assert_eq!(out.matches("end_of_record").count(), 2);
    }

    #[test]
    fn test_literals_have_lines_but_no_function_entry() {
        let mut f = LcovFormatter::new(CounterMode::Count);
        f.add_unit("a.go", "main", false, &unit(1), 1);
        f.add_unit("a.go", "main.func1", true, &unit(2), 4);
        let out = f.render();
        assert!(!out.contains("main.func1"));
        assert!(out.contains("DA:2,4\n"));
        assert!(out.contains("FNF:1\n"));
    }

    #[test]
    fn test_duplicate_units_merge() {
        let mut count = LcovFormatter::new(CounterMode::Count);
        count.add_unit("a.go", "A", false, &unit(1), u32::MAX);
        count.add_unit("a.go", "A", false, &unit(1), 5);
        assert!(count.render().contains(&format!("DA:1,{}\n", u32::MAX)));

        let mut set = LcovFormatter::new(CounterMode::Set);
        set.add_unit("a.go", "A", false, &unit(1), 7);
        set.add_unit("a.go", "A", false, &unit(1), 0);
        assert!(set.render().contains("DA:1,1\n"));
    }

    #[test]
    fn test_multiline_units_take_max_per_line() {
        let mut f = LcovFormatter::new(CounterMode::Count);
        f.add_unit("a.go", "A", false, &CoverableUnit::new(1, 1, 3, 2, 3), 2);
        f.add_unit("a.go", "A", false, &CoverableUnit::new(3, 4, 4, 1, 1), 0);
        let out = f.render();
        for expected in ["DA:1,2\n", "DA:2,2\n", "DA:3,2\n", "DA:4,0\n", "LF:4\n", "LH:3\n"] {
            assert!(out.contains(expected), "missing {expected:?} in {out}");
        }
    }

    #[test]
    fn test_emit_lcov_writes_rendered_report() {
        let mut f = LcovFormatter::new(CounterMode::Set).with_test_name("emit");
        f.add_unit("b.go", "B", false, &unit(4), 9);
        f.add_unit("a.go", "A", false, &unit(2), 0);

        let mut out = Vec::new();
        f.emit_lcov(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, f.render());
        assert!(text.starts_with("TN:emit\nSF:a.go\n"));
        assert!(text.contains("DA:4,1\n"));
    }

    #[test]
    fn test_empty_formatter_renders_nothing() {
        assert_eq!(LcovFormatter::new(CounterMode::Atomic).render(), "");
    }

    #[test]
    fn test_summarize_round_trips_totals() {
        let mut f = LcovFormatter::new(CounterMode::Count);
        f.add_unit("a.go", "A", false, &unit(1), 1);
        f.add_unit("a.go", "A", false, &unit(2), 0);
        f.add_unit("b.go", "B", false, &unit(1), 0);

        let summary = summarize(&f.render());
        assert_eq!(summary.len(), 2);
        assert_eq!(
            summary[0],
            FileSummary {
                path: "a.go".into(),
                lines_found: 2,
                lines_hit: 1,
                functions_found: 1,
                functions_hit: 1,
            }
        );
        assert_eq!(summary[0].line_percent(), 50.0);
        assert_eq!(summary[1].functions_hit, 0);
        assert_eq!(summary[1].function_percent(), 0.0);
    }
}
