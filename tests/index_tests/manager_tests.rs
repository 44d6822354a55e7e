//! Tests for IndexManager
//!
//! These tests verify:
//! - Position descriptors stored and resolved through the cache
//! - Count-bounded and two-sided range lookups
//! - Metadata keys never showing up in ranges
//! - Malformed stored descriptors reading as absent

use std::sync::Arc;

use fencekv::config::WalSyncStrategy;
use fencekv::index::{DiskIndexStore, IndexManager, IndexStore, PIVOTS_META_KEY};
use fencekv::key::pad_key;
use fencekv::PositionDescriptor;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_index() -> (TempDir, Arc<DiskIndexStore>, IndexManager) {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(
        DiskIndexStore::open(temp_dir.path(), 64 * 1024 * 1024, WalSyncStrategy::EveryWrite).unwrap(),
    );
    let manager = IndexManager::new(Arc::clone(&store) as Arc<dyn IndexStore>, 16).unwrap();
    (temp_dir, store, manager)
}

fn key(raw: &str) -> Vec<u8> {
    pad_key(raw.as_bytes()).unwrap()
}

fn pos(partition: u32, offset: u64) -> PositionDescriptor {
    PositionDescriptor::new(partition, offset, 40)
}

/// Index keys b, d, f, h at offsets 0, 40, 80, 120 of partition 0
fn populate(manager: &IndexManager) {
    let entries: Vec<(Vec<u8>, PositionDescriptor)> = ["b", "d", "f", "h"]
        .iter()
        .enumerate()
        .map(|(i, k)| (key(k), pos(0, i as u64 * 40)))
        .collect();
    manager.batch_put(&entries).unwrap();
}

fn keys_of(entries: &[(Vec<u8>, PositionDescriptor)]) -> Vec<Vec<u8>> {
    entries.iter().map(|(k, _)| k.clone()).collect()
}

// =============================================================================
// Point Operation Tests
// =============================================================================

#[test]
fn test_put_get_position() {
    let (_temp, _store, manager) = setup_temp_index();

    manager.put(&key("a"), pos(3, 120)).unwrap();

    assert_eq!(manager.get(&key("a")).unwrap(), Some(pos(3, 120)));
    assert_eq!(manager.get(&key("b")).unwrap(), None);
}

#[test]
fn test_positions_are_durable_in_store() {
    let (_temp, store, manager) = setup_temp_index();

    manager.put(&key("a"), pos(1, 0)).unwrap();

    let raw = store.get(&key("a")).unwrap().unwrap();
    assert_eq!(PositionDescriptor::decode(&raw).unwrap(), pos(1, 0));
}

#[test]
fn test_batch_put_replaces_positions() {
    let (_temp, _store, manager) = setup_temp_index();
    populate(&manager);

    manager.batch_put(&[(key("d"), pos(2, 0))]).unwrap();

    assert_eq!(manager.get(&key("d")).unwrap(), Some(pos(2, 0)));
    assert_eq!(manager.get(&key("b")).unwrap(), Some(pos(0, 0)));
}

#[test]
fn test_delete_evicts_cache() {
    let (_temp, _store, manager) = setup_temp_index();
    manager.put(&key("a"), pos(0, 0)).unwrap();
    assert!(manager.get(&key("a")).unwrap().is_some());

    assert!(manager.delete(&key("a")).unwrap());
    assert_eq!(manager.get(&key("a")).unwrap(), None);
    assert!(!manager.delete(&key("a")).unwrap());
}

#[test]
fn test_malformed_descriptor_reads_as_absent() {
    let (_temp, store, manager) = setup_temp_index();
    store.put(&key("bad"), b"not a descriptor").unwrap();

    assert_eq!(manager.get(&key("bad")).unwrap(), None);
}

#[test]
fn test_cache_smaller_than_key_count() {
    let (_temp, _store, manager) = setup_temp_index();
    for i in 0..100u64 {
        manager.put(&key(&format!("k{:03}", i)), pos(0, i * 40)).unwrap();
    }

    for i in 0..100u64 {
        assert_eq!(manager.get(&key(&format!("k{:03}", i))).unwrap(), Some(pos(0, i * 40)));
    }
}

// =============================================================================
// Range Tests
// =============================================================================

#[test]
fn test_range_count_from_start() {
    let (_temp, _store, manager) = setup_temp_index();
    populate(&manager);

    let result = manager.get_range_count(&key("c"), 2).unwrap();
    assert_eq!(keys_of(&result), vec![key("d"), key("f")]);
    assert_eq!(result[0].1, pos(0, 40));

    let inclusive = manager.get_range_count(&key("d"), 10).unwrap();
    assert_eq!(keys_of(&inclusive), vec![key("d"), key("f"), key("h")]);

    assert!(manager.get_range_count(&key("a"), 0).unwrap().is_empty());
}

#[test]
fn test_range_between_is_lower_exclusive_upper_inclusive() {
    let (_temp, _store, manager) = setup_temp_index();
    populate(&manager);

    let result = manager.get_range_between(Some(key("b").as_slice()), Some(key("f").as_slice())).unwrap();
    assert_eq!(keys_of(&result), vec![key("d"), key("f")]);

    let between_keys = manager.get_range_between(Some(key("c").as_slice()), Some(key("g").as_slice())).unwrap();
    assert_eq!(keys_of(&between_keys), vec![key("d"), key("f")]);
}

#[test]
fn test_range_between_open_bounds() {
    let (_temp, _store, manager) = setup_temp_index();
    populate(&manager);

    let below = manager.get_range_between(None, Some(key("d").as_slice())).unwrap();
    assert_eq!(keys_of(&below), vec![key("b"), key("d")]);

    let below_missing = manager.get_range_between(None, Some(key("e").as_slice())).unwrap();
    assert_eq!(keys_of(&below_missing), vec![key("b"), key("d")]);

    let above = manager.get_range_between(Some(key("f").as_slice()), None).unwrap();
    assert_eq!(keys_of(&above), vec![key("h")]);

    let everything = manager.get_range_between(None, None).unwrap();
    assert_eq!(everything.len(), 4);

    let beyond = manager.get_range_between(None, Some(key("z").as_slice())).unwrap();
    assert_eq!(beyond.len(), 4);
}

#[test]
fn test_metadata_excluded_from_ranges() {
    let (_temp, _store, manager) = setup_temp_index();
    populate(&manager);
    manager.write_meta(PIVOTS_META_KEY, b"pivots").unwrap();

    assert_eq!(manager.read_meta(PIVOTS_META_KEY).unwrap(), Some(b"pivots".to_vec()));
    assert_eq!(manager.get_range_between(None, None).unwrap().len(), 4);
    assert_eq!(manager.get_range_count(b"", 10).unwrap().len(), 4);
}

#[test]
fn test_checkpoint_keeps_positions() {
    let (_temp, store, manager) = setup_temp_index();
    populate(&manager);

    manager.checkpoint().unwrap();

    assert_eq!(store.wal_size(), 0);
    assert_eq!(manager.get(&key("h")).unwrap(), Some(pos(0, 120)));
}
