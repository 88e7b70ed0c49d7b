//! Property-based tests for the decode/merge pipeline.
//!
//! Uses proptest to check invariants over arbitrary counter data and
//! arbitrary (mostly malformed) input streams.

use covpull_shared::arena::{CounterArena, ARENA_CHUNK};
use covpull_shared::format::counter::CounterDataReader;
use covpull_shared::format::encode::{CounterFileWriter, MetaFileWriter, PackageMetaBuilder};
use covpull_shared::format::CounterFlavor;
use covpull_shared::merge::{merge_counters, CounterMerger};
use covpull_shared::{
    build_lcov, CounterGranularity, CounterMode, CoverableUnit, FuncDesc, FuncPayload,
    FunctionKey, MetaFileReader,
};
use proptest::prelude::*;

fn same_length_records() -> impl Strategy<Value = Vec<Vec<u32>>> {
    (1usize..16).prop_flat_map(|len| prop::collection::vec(prop::collection::vec(any::<u32>(), len), 1..8))
}

// === Merge Property Tests ===

proptest! {
    /// Merge result does not depend on the order records arrive in.
    #[test]
    fn prop_merge_order_independent(records in same_length_records()) {
        let mut forward = CounterMerger::new();
        for r in &records {
            forward.add(&FuncPayload::new(0, 0, r.clone())).unwrap();
        }
        let mut backward = CounterMerger::new();
        for r in records.iter().rev() {
            backward.add(&FuncPayload::new(0, 0, r.clone())).unwrap();
        }
        let key = FunctionKey::new(0, 0);
        prop_assert_eq!(forward.counters(key), backward.counters(key));
        prop_assert_eq!(forward.records(), records.len());
    }

    /// (a + b) + c == a + (b + c)
    #[test]
    fn prop_merge_associative(
        a in prop::collection::vec(any::<u32>(), 8),
        b in prop::collection::vec(any::<u32>(), 8),
        c in prop::collection::vec(any::<u32>(), 8),
    ) {
        let mut left = a.clone();
        merge_counters(&mut left, &b);
        merge_counters(&mut left, &c);

        let mut bc = b.clone();
        merge_counters(&mut bc, &c);
        let mut right = a.clone();
        merge_counters(&mut right, &bc);

        prop_assert_eq!(left, right);
    }

    /// Distinct keys never share storage.
    #[test]
    fn prop_distinct_keys_stay_separate(
        counts in prop::collection::vec(prop::collection::vec(any::<u32>(), 1..32), 1..20)
    ) {
        let mut m = CounterMerger::new();
        for (i, c) in counts.iter().enumerate() {
            m.add(&FuncPayload::new(0, i as u32, c.clone())).unwrap();
        }
        prop_assert_eq!(m.len(), counts.len());
        for (i, c) in counts.iter().enumerate() {
            prop_assert_eq!(m.counters(FunctionKey::new(0, i as u32)), Some(c.as_slice()));
        }
    }
}

// === Nested Unit Property Tests ===

#[derive(Debug, Clone)]
enum UnitShape {
    /// Top-level unit on the given line
    Top(u32),
    /// (line, parent) of a unit nested inside another
    Nested(u32, u32),
}

/// Distinct top-level lines below 50, nested units on lines 100 and up,
/// in arbitrary unit order.
fn unit_shapes() -> impl Strategy<Value = Vec<UnitShape>> {
    (
        prop::collection::btree_set(1u32..50, 1..10),
        prop::collection::vec((100u32..200, 1u32..8), 0..10),
    )
        .prop_map(|(top, nested)| {
            top.into_iter()
                .map(UnitShape::Top)
                .chain(nested.into_iter().map(|(line, parent)| UnitShape::Nested(line, parent)))
                .collect::<Vec<_>>()
        })
        .prop_shuffle()
}

proptest! {
    /// Units with a parent never reach the tracefile, whatever their count.
    #[test]
    fn prop_nested_units_never_reported(
        shapes in unit_shapes(),
        counts in prop::collection::vec(1u32..1000, 20),
    ) {
        let mut desc = FuncDesc::new("example.com/p/p.go", "F");
        for shape in &shapes {
            desc = desc.with_unit(match *shape {
                UnitShape::Top(line) => CoverableUnit::new(line, 1, line, 10, 1),
                UnitShape::Nested(line, parent) => {
                    CoverableUnit::new(line, 1, line, 10, 1).with_parent(parent)
                }
            });
        }
        let mut pkg = PackageMetaBuilder::new("example.com/p", "p", "example.com/p");
        pkg.add_func(&desc);
        let mut meta = MetaFileWriter::new(CounterMode::Count, CounterGranularity::PerBlock);
        meta.add_package(pkg);
        let reader = MetaFileReader::new(meta.encode()).unwrap();

        let counters = CounterFileWriter::new(meta.meta_hash(), CounterFlavor::Uleb128)
            .with_segment(&[FuncPayload::new(0, 0, counts[..shapes.len()].to_vec())])
            .encode();
        let text = String::from_utf8(build_lcov(&counters, &reader, None).unwrap().lcov).unwrap();

        let mut top_lines = 0;
        for shape in &shapes {
            match *shape {
                UnitShape::Top(line) => {
                    top_lines += 1;
                    let da = format!("DA:{line},");
                    prop_assert!(text.contains(&da));
                }
                UnitShape::Nested(line, _) => {
                    let da = format!("DA:{line},");
                    prop_assert!(!text.contains(&da));
                }
            }
        }
        let lf = format!("LF:{top_lines}\n");
        let lh = format!("LH:{top_lines}\n");
        prop_assert!(text.contains(&lf));
        prop_assert!(text.contains(&lh));
    }
}

// === Arena Property Tests ===

proptest! {
    /// Slots are zeroed, sized as requested, and a new chunk appears only
    /// when the current one cannot fit the request.
    #[test]
    fn prop_arena_growth(sizes in prop::collection::vec(0usize..(ARENA_CHUNK * 2), 1..40)) {
        let mut arena = CounterArena::new();
        for n in sizes {
            let before_chunks = arena.chunk_count();
            let fits = n <= arena.remaining();

            let slot = arena.allocate(n);
            prop_assert_eq!(slot.len(), n);
            prop_assert!(arena.get(slot).iter().all(|&c| c == 0));

            if fits {
                prop_assert_eq!(arena.chunk_count(), before_chunks);
            } else {
                prop_assert_eq!(arena.chunk_count(), before_chunks + 1);
                prop_assert!(arena.capacity() >= ARENA_CHUNK);
            }

            // Mark the slot so a later overlapping slot would not be zeroed
            arena.get_mut(slot).iter_mut().for_each(|c| *c = 1);
        }
    }
}

// === Decoder Robustness Tests ===

proptest! {
    /// Arbitrary bytes produce an error or a value, never a panic.
    #[test]
    fn prop_counter_decoder_never_panics(data in prop::collection::vec(any::<u8>(), 0..512)) {
        if let Ok(reader) = CounterDataReader::new(&data) {
            for item in reader {
                if item.is_err() {
                    break;
                }
            }
        }
    }

    /// Same for metadata, including every package and function it claims.
    #[test]
    fn prop_meta_decoder_never_panics(data in prop::collection::vec(any::<u8>(), 0..512)) {
        if let Ok(reader) = MetaFileReader::new(data) {
            let mut desc = FuncDesc::default();
            for p in 0..reader.num_packages() {
                let Ok(pd) = reader.package_decoder(p) else { continue };
                for f in 0..pd.num_funcs() {
                    let _ = pd.read_func(f, &mut desc);
                }
            }
        }
    }
}
