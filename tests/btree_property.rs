//! Property tests for the B+tree, checked against a model.
//!
//! Arbitrary insert/remove sequences run both against the tree (with a
//! tiny fanout so splits and merges fire constantly) and against a
//! `BTreeMap` model; afterwards lookups, ordered iteration, and the pin
//! discipline must all agree.

use std::collections::BTreeMap;
use std::sync::Arc;

use proptest::prelude::*;
use stratadb::common::config::INDEX_ROOTS_PAGE_ID;
use stratadb::storage::page::IndexRootsPage;
use stratadb::{BPlusTree, BufferPoolManager, DiskManager, EvictionPolicy, PageId, RowId};
use tempfile::tempdir;

#[derive(Debug, Clone)]
enum Op {
    Insert(u32),
    Remove(u32),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u32..64).prop_map(Op::Insert),
        (0u32..64).prop_map(Op::Remove),
    ]
}

fn setup() -> (Arc<BufferPoolManager>, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let dm = DiskManager::create(dir.path().join("test.db")).unwrap();
    let bpm = Arc::new(BufferPoolManager::new(32, EvictionPolicy::Clock, dm));

    let mut guard = bpm.new_page().unwrap();
    assert_eq!(guard.page_id(), INDEX_ROOTS_PAGE_ID);
    IndexRootsPage::init(guard.as_mut_slice());
    drop(guard);

    (bpm, dir)
}

fn key(v: u32) -> [u8; 4] {
    v.to_be_bytes()
}

fn rid(v: u32) -> RowId {
    RowId::new(PageId::new(v), v)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn tree_matches_model(ops in proptest::collection::vec(op_strategy(), 1..200)) {
        let (bpm, _dir) = setup();
        let mut tree = BPlusTree::with_max_sizes(0, Arc::clone(&bpm), 4, 4, 4).unwrap();
        let mut model: BTreeMap<u32, RowId> = BTreeMap::new();

        for op in &ops {
            match *op {
                Op::Insert(v) => {
                    let inserted = tree.insert(&key(v), rid(v)).unwrap();
                    let expected = model.insert(v, rid(v)).is_none();
                    prop_assert_eq!(inserted, expected, "insert({}) divergence", v);
                }
                Op::Remove(v) => {
                    tree.remove(&key(v)).unwrap();
                    model.remove(&v);
                }
            }
        }

        // Point lookups agree over the whole key domain.
        for v in 0u32..64 {
            prop_assert_eq!(tree.get(&key(v)).unwrap(), model.get(&v).copied());
        }

        // Ordered iteration yields exactly the model's content.
        let scanned: Vec<(u32, RowId)> = tree
            .iter()
            .unwrap()
            .map(|entry| {
                let (k, r) = entry.unwrap();
                (u32::from_be_bytes(k.try_into().unwrap()), r)
            })
            .collect();
        let expected: Vec<(u32, RowId)> = model.iter().map(|(&k, &r)| (k, r)).collect();
        prop_assert_eq!(scanned, expected);

        // Emptiness and the persisted root pointer agree.
        prop_assert_eq!(tree.is_empty(), model.is_empty());

        // No operation leaked a pin.
        prop_assert!(bpm.all_unpinned());
    }

    #[test]
    fn iter_from_matches_model_range(
        ops in proptest::collection::vec(op_strategy(), 1..100),
        start in 0u32..64,
    ) {
        let (bpm, _dir) = setup();
        let mut tree = BPlusTree::with_max_sizes(0, Arc::clone(&bpm), 4, 4, 4).unwrap();
        let mut model: BTreeMap<u32, RowId> = BTreeMap::new();

        for op in &ops {
            match *op {
                Op::Insert(v) => {
                    tree.insert(&key(v), rid(v)).unwrap();
                    model.insert(v, rid(v));
                }
                Op::Remove(v) => {
                    tree.remove(&key(v)).unwrap();
                    model.remove(&v);
                }
            }
        }

        let scanned: Vec<u32> = tree
            .iter_from(&key(start))
            .unwrap()
            .map(|entry| u32::from_be_bytes(entry.unwrap().0.try_into().unwrap()))
            .collect();
        let expected: Vec<u32> = model.range(start..).map(|(&k, _)| k).collect();
        prop_assert_eq!(scanned, expected);
    }
}
