//! Integration tests for the B+ tree index: ordering, balance under
//! inserts and deletes, and persistence through the pool.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;
use tablestore::index::btree::{max_keys, Node};
use tablestore::{BlockStore, BufferPool, Error, IndexTree, Layout, Row, Value};

/// 64-byte blocks with `<i` keys give six keys per node, so a few dozen
/// keys already make a three-level tree.
fn small_tree() -> (IndexTree, tempfile::TempDir) {
    let (pool, dir) = common::pool(32, 64);
    let tree = IndexTree::create(pool, dir.path().join("ids.index"), "<i").unwrap();
    (tree, dir)
}

fn key(v: i32) -> Vec<Value> {
    vec![Value::Int(v)]
}

fn keys_of(tree: &IndexTree) -> Vec<i32> {
    match tree.iter_leaves() {
        Ok(iter) => iter
            .map(|entry| match &entry.unwrap().0[0] {
                Value::Int(v) => *v,
                other => panic!("unexpected key {}", other),
            })
            .collect(),
        Err(Error::EmptyIndex(_)) => Vec::new(),
        Err(e) => panic!("iter_leaves failed: {}", e),
    }
}

#[test]
fn test_fifty_rows_find_and_delete_half() {
    let (mut tree, _dir) = small_tree();
    for id in 0..50 {
        tree.insert(&key(id), id * 2).unwrap();
    }

    let from_25: Vec<(Row, i32)> = tree.find(&key(25)).unwrap().map(|e| e.unwrap()).collect();
    assert_eq!(from_25.len(), 25);
    for (i, (k, v)) in from_25.iter().enumerate() {
        let expected = 25 + i as i32;
        assert_eq!(k, &key(expected));
        assert_eq!(*v, expected * 2);
    }

    for id in 0..25 {
        tree.delete(&key(id)).unwrap();
    }
    let shape = tree.verify().unwrap();
    assert_eq!(shape.keys, 25);
    assert_eq!(keys_of(&tree), (25..50).collect::<Vec<_>>());
}

#[test]
fn test_find_between_keys_and_past_the_end() {
    let (mut tree, _dir) = small_tree();
    for id in (0..40).map(|i| i * 3) {
        tree.insert(&key(id), id).unwrap();
    }

    let first = tree.find(&key(10)).unwrap().next().unwrap().unwrap();
    assert_eq!(first.0, key(12));
    assert!(tree.find(&key(1000)).unwrap().next().is_none());
    assert_eq!(tree.get(&key(12)).unwrap(), Some(12));
    assert_eq!(tree.get(&key(13)).unwrap(), None);
}

#[test]
fn test_empty_tree_errors() {
    let (mut tree, _dir) = small_tree();
    assert!(matches!(tree.find(&key(1)), Err(Error::EmptyIndex(_))));
    assert!(matches!(tree.iter_leaves(), Err(Error::EmptyIndex(_))));
    assert!(matches!(tree.delete(&key(1)), Err(Error::KeyNotFound(_))));
}

#[test]
fn test_reinsert_after_delete() {
    let (mut tree, _dir) = small_tree();
    for id in 0..30 {
        tree.insert(&key(id), id).unwrap();
    }
    assert!(matches!(tree.insert(&key(7), 0), Err(Error::DuplicateKey(_))));

    tree.delete(&key(7)).unwrap();
    tree.insert(&key(7), 70).unwrap();
    assert_eq!(tree.get(&key(7)).unwrap(), Some(70));
    tree.verify().unwrap();
}

#[test]
fn test_tree_survives_reopen_with_tiny_pool() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("persist.index");
    {
        // Three frames force constant eviction while the tree grows.
        let pool = Arc::new(BufferPool::new(3, BlockStore::new(64)));
        let mut tree = IndexTree::create(Arc::clone(&pool), &path, "<i").unwrap();
        for id in (0..120).rev() {
            tree.insert(&key(id), id).unwrap();
        }
        for id in (0..120).filter(|id| id % 3 == 0) {
            tree.delete(&key(id)).unwrap();
        }
        tree.persist_header().unwrap();
        pool.flush_all().unwrap();
    }

    let pool = Arc::new(BufferPool::new(8, BlockStore::new(64)));
    let tree = IndexTree::open(pool, &path, "<i").unwrap();
    assert_eq!(tree.verify().unwrap().keys, 80);
    let expected: Vec<i32> = (0..120).filter(|id| id % 3 != 0).collect();
    assert_eq!(keys_of(&tree), expected);
}

#[test]
fn test_multi_column_keys_with_text() {
    let (pool, dir) = common::pool(32, 256);
    let mut tree = IndexTree::create(pool, dir.path().join("names.index"), "<8si").unwrap();
    let names = ["mia", "al", "zed", "bo", "al", "mia"];
    for (i, name) in names.iter().enumerate() {
        tree.insert(&[Value::from(*name), Value::Int(i as i32)], i as i32).unwrap();
    }

    let als: Vec<i32> = tree
        .find(&[Value::from("al")])
        .unwrap()
        .map(|e| e.unwrap())
        .take_while(|(k, _)| k[0] == Value::from("al"))
        .map(|(_, v)| v)
        .collect();
    assert_eq!(als, vec![1, 4]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Any insertion order yields an ascending, duplicate-free leaf chain
    /// and a balanced tree; `find` on each key starts at that key.
    #[test]
    fn prop_inserts_stay_sorted_and_balanced(ids in prop::collection::vec(-500i32..500, 1..150)) {
        let (mut tree, _dir) = small_tree();
        let mut expected = BTreeSet::new();
        for id in &ids {
            let result = tree.insert(&key(*id), *id);
            if expected.insert(*id) {
                prop_assert!(result.is_ok());
            } else {
                prop_assert!(matches!(result, Err(Error::DuplicateKey(_))));
            }
        }

        prop_assert_eq!(keys_of(&tree), expected.iter().copied().collect::<Vec<_>>());
        prop_assert_eq!(tree.verify().unwrap().keys, expected.len());
        for id in &expected {
            let first = tree.find(&key(*id)).unwrap().next().unwrap().unwrap();
            prop_assert_eq!(first, (key(*id), *id));
        }
    }

    /// Deleting any subset keeps the tree balanced, and deleted keys can
    /// be inserted again.
    #[test]
    fn prop_deletes_rebalance(
        ids in prop::collection::btree_set(0i32..400, 1..120),
        mask in prop::collection::vec(any::<bool>(), 120),
    ) {
        let (mut tree, _dir) = small_tree();
        for id in &ids {
            tree.insert(&key(*id), *id).unwrap();
        }

        let doomed: Vec<i32> = ids.iter().zip(&mask).filter(|(_, m)| **m).map(|(id, _)| *id).collect();
        for id in &doomed {
            tree.delete(&key(*id)).unwrap();
            tree.verify().unwrap();
        }
        let remaining: Vec<i32> = ids.iter().copied().filter(|id| !doomed.contains(id)).collect();
        prop_assert_eq!(keys_of(&tree), remaining);

        for id in &doomed {
            tree.insert(&key(*id), *id).unwrap();
        }
        prop_assert_eq!(tree.verify().unwrap().keys, ids.len());
    }

    /// Any leaf or internal node survives a trip through its block form.
    #[test]
    fn prop_node_round_trips(
        is_leaf in any::<bool>(),
        next_deleted in any::<i32>(),
        entries in prop::collection::vec((any::<i32>(), "[a-z]{0,4}", any::<i32>()), 0..=8),
        last in any::<i32>(),
    ) {
        let layout = Layout::parse("<i4s").unwrap();
        prop_assert!(entries.len() <= max_keys(128, layout.size()).unwrap());

        let keys: Vec<Row> = entries
            .iter()
            .map(|(id, name, _)| vec![Value::Int(*id), Value::from(name.as_str())])
            .collect();
        let mut children: Vec<i32> = entries.iter().map(|(_, _, child)| *child).collect();
        let mut node = if is_leaf {
            Node::leaf(keys, children, last)
        } else {
            children.push(last);
            Node::internal(keys, children)
        };
        node.next_deleted = next_deleted;

        let bytes = node.to_bytes(&layout, 128).unwrap();
        prop_assert_eq!(bytes.len(), 128);
        prop_assert_eq!(Node::from_bytes(&bytes, &layout).unwrap(), node);
    }
}
