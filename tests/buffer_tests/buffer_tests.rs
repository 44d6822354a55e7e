//! Tests for WriteBuffer and BufferManager
//!
//! These tests verify:
//! - Size and tombstone accounting of a single buffer
//! - The unpartitioned → partitioned transition at capacity
//! - Flush signalling, flushing and index updates
//! - Pending writes surviving shutdown through the initial value log

use std::path::Path;
use std::sync::Arc;

use fencekv::buffer::{BufferEntry, BufferManager, FlushMode, WriteBuffer, TOMBSTONE};
use fencekv::index::{DiskIndexStore, IndexManager, IndexStore, PIVOTS_META_KEY};
use fencekv::key::pad_key;
use fencekv::storage::{FileCache, ValueLog};
use fencekv::{Category, Config, FenceError, Statistics, StatsSink, WalSyncStrategy};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

struct Components {
    index: Arc<IndexManager>,
    value_log: Arc<ValueLog>,
    stats: Arc<Statistics>,
    buffer: BufferManager,
}

fn test_config(dir: &Path, capacity: usize, buffer_size: usize) -> Config {
    Config::builder()
        .data_dir(dir)
        .partition_count(4)
        .initial_buffer_capacity(capacity)
        .partition_buffer_size(buffer_size)
        .flush_parallelism(2)
        .wal_sync_strategy(WalSyncStrategy::EveryWrite)
        .build()
}

fn open_components(config: &Config) -> fencekv::Result<Components> {
    let files = Arc::new(FileCache::open(&config.values_dir(), config.partition_count, 8)?);
    let store: Arc<dyn IndexStore> = Arc::new(DiskIndexStore::open(
        &config.index_dir(),
        config.index_checkpoint_bytes,
        config.wal_sync_strategy,
    )?);
    let index = Arc::new(IndexManager::new(store, 64)?);
    let stats = Arc::new(Statistics::new());
    let value_log = Arc::new(ValueLog::open(files, Arc::clone(&stats) as Arc<dyn StatsSink>)?);
    let buffer = BufferManager::open(
        config,
        Arc::clone(&index),
        Arc::clone(&value_log),
        Arc::clone(&stats) as Arc<dyn StatsSink>,
    )?;
    Ok(Components {
        index,
        value_log,
        stats,
        buffer,
    })
}

fn setup_temp_buffer(capacity: usize, buffer_size: usize) -> (TempDir, Components) {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path(), capacity, buffer_size);
    let components = open_components(&config).unwrap();
    (temp_dir, components)
}

fn key(raw: &str) -> Vec<u8> {
    pad_key(raw.as_bytes()).unwrap()
}

fn put(buffer: &BufferManager, k: &str, v: &str) -> Option<u32> {
    buffer.put(key(k), v.as_bytes().to_vec()).unwrap()
}

fn value(bytes: &str) -> Option<BufferEntry> {
    Some(BufferEntry::Value(bytes.as_bytes().to_vec()))
}

/// Partition with pivots a, m, z and large partition buffers
fn setup_partitioned() -> (TempDir, Components) {
    let (temp, c) = setup_temp_buffer(3, 1024 * 1024);
    put(&c.buffer, "a", "1");
    put(&c.buffer, "m", "2");
    put(&c.buffer, "z", "3");
    assert!(c.buffer.is_partitioned());
    (temp, c)
}

// =============================================================================
// WriteBuffer Tests
// =============================================================================

#[test]
fn test_write_buffer_size_tracks_replacements() {
    let mut buffer = WriteBuffer::new();

    assert_eq!(buffer.put(key("a"), b"1".to_vec()), 29);
    assert_eq!(buffer.put(key("b"), b"22".to_vec()), 59);
    assert_eq!(buffer.put(key("a"), b"111".to_vec()), 61);
    assert_eq!(buffer.len(), 2);

    buffer.remove(&key("b"));
    assert_eq!(buffer.size(), 31);
}

#[test]
fn test_write_buffer_tombstones_not_live() {
    let mut buffer = WriteBuffer::new();
    buffer.put(key("a"), b"1".to_vec());
    buffer.put(key("b"), TOMBSTONE.to_vec());

    assert_eq!(buffer.len(), 2);
    assert_eq!(buffer.live_len(), 1);
    assert_eq!(buffer.get(&key("b")), Some(BufferEntry::Tombstone));

    let live: Vec<&[u8]> = buffer.live().map(|(k, _)| k).collect();
    assert_eq!(live, vec![key("a").as_slice()]);

    buffer.put(key("b"), b"back".to_vec());
    assert_eq!(buffer.live_len(), 2);
}

#[test]
fn test_write_buffer_live_between() {
    let mut buffer = WriteBuffer::new();
    for k in ["a", "b", "c", "d"] {
        buffer.put(key(k), k.as_bytes().to_vec());
    }
    buffer.put(key("c"), TOMBSTONE.to_vec());

    let keys: Vec<Vec<u8>> = buffer
        .live_between(Some(key("a").as_slice()), Some(key("d").as_slice()))
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(keys, vec![key("b"), key("d")]);

    assert!(buffer.live_between(Some(key("d").as_slice()), Some(key("a").as_slice())).is_empty());
    assert_eq!(buffer.live_between(None, None).len(), 3);
}

#[test]
fn test_write_buffer_absorb_older_keeps_newer() {
    let mut older = WriteBuffer::new();
    older.put(key("a"), b"old".to_vec());
    older.put(key("b"), b"old".to_vec());

    let mut newer = WriteBuffer::new();
    newer.put(key("a"), b"new".to_vec());
    newer.absorb_older(older);

    assert_eq!(newer.get(&key("a")), value("new"));
    assert_eq!(newer.get(&key("b")), value("old"));
    assert_eq!(newer.size(), 2 * 31);
}

// =============================================================================
// Partitioning Tests
// =============================================================================

#[test]
fn test_unpartitioned_until_capacity() {
    let (_temp, c) = setup_temp_buffer(3, 1024);

    assert_eq!(put(&c.buffer, "a", "1"), None);
    assert_eq!(put(&c.buffer, "m", "2"), None);

    assert!(!c.buffer.is_partitioned());
    assert_eq!(c.buffer.pending_len(), 2);
    assert_eq!(c.buffer.get(&key("m")), value("2"));

    assert_eq!(put(&c.buffer, "z", "3"), None);

    assert!(c.buffer.is_partitioned());
    assert_eq!(c.buffer.pending_len(), 0);
    let pivots = c.buffer.pivots().unwrap();
    assert_eq!(pivots.keys(), &[key("a"), key("m"), key("z")][..]);
    for (k, v) in [("a", "1"), ("m", "2"), ("z", "3")] {
        assert_eq!(c.buffer.get(&key(k)), value(v));
    }
}

#[test]
fn test_pivots_persisted_in_index_meta() {
    let (_temp, c) = setup_partitioned();

    let stored = c.index.read_meta(PIVOTS_META_KEY).unwrap().unwrap();
    assert_eq!(stored, c.buffer.pivots().unwrap().encode());
    assert!(c.index.get_range_between(None, None).unwrap().is_empty());
}

#[test]
fn test_overwrites_do_not_reach_capacity() {
    let (_temp, c) = setup_temp_buffer(3, 1024);

    for v in ["1", "2", "3", "4"] {
        put(&c.buffer, "a", v);
    }
    put(&c.buffer, "b", "1");

    assert!(!c.buffer.is_partitioned());
    assert_eq!(c.buffer.pending_len(), 2);
}

#[test]
fn test_tombstones_dropped_when_partitioning() {
    let (_temp, c) = setup_temp_buffer(3, 1024);
    put(&c.buffer, "a", "1");
    put(&c.buffer, "b", "2");
    assert!(c.buffer.delete(&key("a")));
    assert_eq!(c.buffer.get(&key("a")), Some(BufferEntry::Tombstone));

    put(&c.buffer, "c", "3");
    put(&c.buffer, "d", "4");

    assert!(c.buffer.is_partitioned());
    assert_eq!(c.buffer.pivots().unwrap().keys(), &[key("b"), key("c"), key("d")][..]);
    assert_eq!(c.buffer.get(&key("a")), None);
}

#[test]
fn test_force_partition_with_too_few_keys() {
    let (_temp, c) = setup_temp_buffer(10, 1024);
    put(&c.buffer, "a", "1");

    let result = c.buffer.force_partition();

    assert!(matches!(result, Err(FenceError::PivotGeneration { expected: 3, actual: 1 })));
    assert!(!c.buffer.is_partitioned());
    assert_eq!(c.buffer.get(&key("a")), value("1"));
}

#[test]
fn test_delete_reports_live_value() {
    let (_temp, c) = setup_temp_buffer(10, 1024);
    put(&c.buffer, "a", "1");

    assert!(c.buffer.delete(&key("a")));
    assert!(!c.buffer.delete(&key("a")));
    assert!(!c.buffer.delete(&key("never")));
}

#[test]
fn test_delete_after_partitioning_removes_entry() {
    let (_temp, c) = setup_partitioned();

    assert!(c.buffer.delete(&key("m")));
    assert_eq!(c.buffer.get(&key("m")), None);
    assert!(!c.buffer.delete(&key("m")));
}

// =============================================================================
// Pending Scan Tests
// =============================================================================

#[test]
fn test_pending_scan_sorted_and_live() {
    let (_temp, c) = setup_temp_buffer(10, 1024);
    for k in ["d", "b", "a", "c"] {
        put(&c.buffer, k, k);
    }
    c.buffer.delete(&key("b"));

    let result = c.buffer.pending_scan(&key("b"), 10).unwrap();
    let keys: Vec<Vec<u8>> = result.into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec![key("c"), key("d")]);

    assert_eq!(c.buffer.pending_scan(&key("a"), 1).unwrap().len(), 1);
}

#[test]
fn test_pending_scan_unavailable_once_partitioned() {
    let (_temp, c) = setup_partitioned();
    assert!(c.buffer.pending_scan(&key("a"), 10).is_none());
    assert!(c.buffer.pending_scan_between(None, None).is_none());
}

// =============================================================================
// Flush Tests
// =============================================================================

#[test]
fn test_put_signals_full_partition() {
    let (_temp, c) = setup_temp_buffer(3, 40);
    put(&c.buffer, "a", "1");
    put(&c.buffer, "m", "2");
    put(&c.buffer, "z", "3");

    // m already holds 29 bytes in partition 1
    assert_eq!(put(&c.buffer, "b", "4"), Some(1));
    assert_eq!(c.buffer.buffered_bytes(1), 58);
}

#[test]
fn test_flush_moves_buffer_to_index() {
    let (_temp, c) = setup_partitioned();
    put(&c.buffer, "b", "4");

    c.buffer.flush(1).unwrap();

    assert_eq!(c.buffer.buffered_bytes(1), 0);
    assert_eq!(c.buffer.get(&key("b")), None);

    let position = c.index.get(&key("b")).unwrap().unwrap();
    assert_eq!(position.partition, 1);
    let record = c.value_log.read(&position).unwrap();
    assert_eq!(record.value, b"4");

    // Other partitions untouched
    assert_eq!(c.index.get(&key("a")).unwrap(), None);
    assert_eq!(c.value_log.writes_since_gc(1), 2);
}

#[test]
fn test_flush_before_partitioning() {
    let (_temp, c) = setup_temp_buffer(10, 1024);
    put(&c.buffer, "a", "1");

    assert!(matches!(c.buffer.flush(0), Err(FenceError::NotPartitioned)));
    c.buffer.flush_all(FlushMode::Parallel).unwrap();
    assert_eq!(c.buffer.get(&key("a")), value("1"));
}

#[test]
fn test_flush_unknown_partition() {
    let (_temp, c) = setup_partitioned();
    assert!(matches!(c.buffer.flush(9), Err(FenceError::InvalidPartition(9))));
}

#[test]
fn test_flush_all_parallel_and_inline() {
    let (_temp, c) = setup_partitioned();
    c.buffer.flush_all(FlushMode::Parallel).unwrap();

    for k in ["a", "m", "z"] {
        assert!(c.index.get(&key(k)).unwrap().is_some(), "{} not indexed", k);
    }
    assert_eq!(c.value_log.total_size(), 3 * 29);

    put(&c.buffer, "zz", "4");
    c.buffer.flush_all(FlushMode::Inline).unwrap();
    assert_eq!(c.index.get(&key("zz")).unwrap().unwrap().partition, 3);
    assert_eq!(c.stats.report().total(Category::FlushRecords), 4);
}

#[test]
fn test_newer_write_replaces_flushed_position() {
    let (_temp, c) = setup_partitioned();
    c.buffer.flush(1).unwrap();
    let first = c.index.get(&key("m")).unwrap().unwrap();

    put(&c.buffer, "m", "new");
    c.buffer.flush(1).unwrap();
    let second = c.index.get(&key("m")).unwrap().unwrap();

    assert_ne!(first, second);
    assert_eq!(c.value_log.read(&second).unwrap().value, b"new");
}

// =============================================================================
// Shutdown / Restore Tests
// =============================================================================

#[test]
fn test_pending_writes_survive_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path(), 10, 1024);
    {
        let c = open_components(&config).unwrap();
        put(&c.buffer, "a", "1");
        put(&c.buffer, "b", "2");
        put(&c.buffer, "a", "3");
        c.buffer.delete(&key("b"));
        c.buffer.shutdown().unwrap();
    }

    let c = open_components(&config).unwrap();
    assert!(!c.buffer.is_partitioned());
    assert_eq!(c.buffer.get(&key("a")), value("3"));
    assert_eq!(c.buffer.get(&key("b")), None);
    assert_eq!(c.buffer.pending_len(), 1);
}

#[test]
fn test_restore_partitions_at_capacity() {
    let temp_dir = TempDir::new().unwrap();
    {
        let config = test_config(temp_dir.path(), 10, 1024);
        let c = open_components(&config).unwrap();
        for k in ["a", "m", "z"] {
            put(&c.buffer, k, k);
        }
        c.buffer.shutdown().unwrap();
    }

    let config = test_config(temp_dir.path(), 3, 1024);
    let c = open_components(&config).unwrap();
    assert!(c.buffer.is_partitioned());
    assert_eq!(c.buffer.get(&key("z")), value("z"));
}

#[test]
fn test_partitioned_shutdown_flushes_everything() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path(), 3, 1024 * 1024);
    {
        let c = open_components(&config).unwrap();
        for k in ["a", "m", "z", "b"] {
            put(&c.buffer, k, k);
        }
        c.buffer.shutdown().unwrap();
        assert_eq!(c.buffer.buffered_bytes(1), 0);
    }

    let c = open_components(&config).unwrap();
    assert!(c.buffer.is_partitioned());
    assert_eq!(c.buffer.pivots().unwrap().keys(), &[key("a"), key("m"), key("z")][..]);
    for k in ["a", "m", "z", "b"] {
        let position = c.index.get(&key(k)).unwrap().unwrap();
        assert_eq!(c.value_log.read(&position).unwrap().value, k.as_bytes());
    }
}

#[test]
fn test_reopen_with_different_partition_count() {
    let temp_dir = TempDir::new().unwrap();
    {
        let config = test_config(temp_dir.path(), 3, 1024);
        let c = open_components(&config).unwrap();
        for k in ["a", "m", "z"] {
            put(&c.buffer, k, k);
        }
        c.buffer.shutdown().unwrap();
    }

    let mut config = test_config(temp_dir.path(), 3, 1024);
    config.partition_count = 8;
    let result = open_components(&config);
    assert!(matches!(result, Err(FenceError::Config(_))));
}
