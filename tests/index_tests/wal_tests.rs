//! Tests for the index WAL
//!
//! These tests verify:
//! - Entry framing and CRC validation
//! - LSN generation and sequencing
//! - Reading entries back, including batch entries
//! - Recovery from torn tails and corrupted entries
//! - Truncation

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use fencekv::config::WalSyncStrategy;
use fencekv::index::wal::{Operation, WalEntry, WalReader, WalRecovery, WalWriter, HEADER_SIZE};
use fencekv::FenceError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_wal() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let wal_path = temp_dir.path().join("index.wal");
    (temp_dir, wal_path)
}

/// Write entries using WalWriter (produces a well-formed WAL)
fn write_entries_via_writer(path: &PathBuf, count: usize) {
    let mut writer = WalWriter::open(path, WalSyncStrategy::EveryWrite).unwrap();
    for i in 0..count {
        writer
            .append(Operation::Put {
                key: format!("key{}", i).into_bytes(),
                value: format!("value{}", i).into_bytes(),
            })
            .unwrap();
    }
}

fn put(key: &[u8], value: &[u8]) -> Operation {
    Operation::Put {
        key: key.to_vec(),
        value: value.to_vec(),
    }
}

// =============================================================================
// Entry Tests
// =============================================================================

#[test]
fn test_entry_serialize_deserialize() {
    let entry = WalEntry::new(7, put(b"k", b"v"));
    let bytes = entry.serialize().unwrap();

    let decoded = WalEntry::deserialize(&bytes).unwrap();
    assert_eq!(decoded, entry);
}

#[test]
fn test_entry_header_layout() {
    let entry = WalEntry::new(42, put(b"k", b"v"));
    let bytes = entry.serialize().unwrap();

    let lsn = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
    let crc = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
    let len = u32::from_le_bytes(bytes[12..16].try_into().unwrap());

    assert_eq!(lsn, 42);
    assert_eq!(crc, entry.compute_crc().unwrap());
    assert_eq!(len as usize, bytes.len() - HEADER_SIZE);
}

#[test]
fn test_entry_batch_roundtrip() {
    let entry = WalEntry::new(
        1,
        Operation::Batch {
            entries: vec![(b"a".to_vec(), b"1".to_vec()), (b"b".to_vec(), b"2".to_vec())],
        },
    );
    let decoded = WalEntry::deserialize(&entry.serialize().unwrap()).unwrap();

    match decoded.operation {
        Operation::Batch { entries } => assert_eq!(entries.len(), 2),
        other => panic!("expected batch, got {:?}", other),
    }
}

#[test]
fn test_entry_crc_mismatch_detected() {
    let entry = WalEntry::new(1, put(b"key", b"value"));
    let mut bytes = entry.serialize().unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;

    let result = WalEntry::deserialize(&bytes);
    assert!(matches!(result, Err(FenceError::WalCorruption(_))));
}

#[test]
fn test_entry_short_buffer_rejected() {
    let result = WalEntry::deserialize(&[0u8; HEADER_SIZE - 1]);
    assert!(matches!(result, Err(FenceError::WalCorruption(_))));
}

#[test]
fn test_entry_truncated_data_rejected() {
    let bytes = WalEntry::new(1, put(b"key", b"value")).serialize().unwrap();
    let result = WalEntry::deserialize(&bytes[..bytes.len() - 2]);
    assert!(matches!(result, Err(FenceError::WalCorruption(_))));
}

// =============================================================================
// Writer Tests
// =============================================================================

#[test]
fn test_write_single_entry() {
    let (_temp, wal_path) = setup_temp_wal();

    let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite).unwrap();
    let lsn = writer.append(put(b"key1", b"value1")).unwrap();

    assert_eq!(lsn, 1);
    assert_eq!(writer.current_lsn(), 2);
    assert!(writer.size() > 0);
}

#[test]
fn test_write_multiple_entries() {
    let (_temp, wal_path) = setup_temp_wal();

    let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite).unwrap();

    let lsn1 = writer.append(put(b"a", b"1")).unwrap();
    let lsn2 = writer.append(put(b"b", b"2")).unwrap();
    let lsn3 = writer.append(Operation::Delete { key: b"a".to_vec() }).unwrap();

    assert_eq!(lsn1, 1);
    assert_eq!(lsn2, 2);
    assert_eq!(lsn3, 3);
    assert_eq!(writer.current_lsn(), 4);
}

#[test]
fn test_writer_reopen_continues_lsn() {
    let (_temp, wal_path) = setup_temp_wal();
    write_entries_via_writer(&wal_path, 5);

    let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite).unwrap();
    assert_eq!(writer.current_lsn(), 6);
    assert_eq!(writer.size(), fs::metadata(&wal_path).unwrap().len());

    let lsn = writer.append(put(b"next", b"v")).unwrap();
    assert_eq!(lsn, 6);
}

#[test]
fn test_writer_size_tracks_file() {
    let (_temp, wal_path) = setup_temp_wal();
    let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryNEntries { count: 10 }).unwrap();

    for i in 0..3u8 {
        writer.append(put(&[i], b"v")).unwrap();
    }
    writer.sync().unwrap();

    assert_eq!(writer.size(), fs::metadata(&wal_path).unwrap().len());
}

#[test]
fn test_writer_truncate_resets() {
    let (_temp, wal_path) = setup_temp_wal();
    let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite).unwrap();
    writer.append(put(b"a", b"1")).unwrap();
    writer.append(put(b"b", b"2")).unwrap();

    writer.truncate().unwrap();

    assert_eq!(writer.size(), 0);
    assert_eq!(writer.current_lsn(), 1);
    assert_eq!(fs::metadata(&wal_path).unwrap().len(), 0);

    assert_eq!(writer.append(put(b"c", b"3")).unwrap(), 1);
    drop(writer);

    let (entries, _) = WalRecovery::recover(&wal_path).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].operation, put(b"c", b"3"));
}

#[test]
fn test_writer_cuts_torn_frame_before_appending() {
    let (_temp, wal_path) = setup_temp_wal();
    write_entries_via_writer(&wal_path, 2);
    let valid_len = fs::metadata(&wal_path).unwrap().len();

    // Half of a third frame left behind by an interrupted append
    let torn = WalEntry::new(3, put(b"torn", b"x")).serialize().unwrap();
    let mut file = OpenOptions::new().append(true).open(&wal_path).unwrap();
    file.write_all(&torn[..torn.len() / 2]).unwrap();
    file.sync_all().unwrap();
    drop(file);

    let mut writer = WalWriter::open(&wal_path, WalSyncStrategy::EveryWrite).unwrap();
    assert_eq!(writer.size(), valid_len);
    assert_eq!(writer.append(put(b"after", b"v")).unwrap(), 3);
    drop(writer);

    let (entries, result) = WalRecovery::recover(&wal_path).unwrap();
    assert_eq!(result.entries_corrupted, 0);
    assert!(!result.was_truncated);
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[2].operation, put(b"after", b"v"));
}

// =============================================================================
// Reader Tests
// =============================================================================

#[test]
fn test_reader_reads_in_order() {
    let (_temp, wal_path) = setup_temp_wal();
    write_entries_via_writer(&wal_path, 4);

    let mut reader = WalReader::open(&wal_path).unwrap();
    for expected in 1..=4u64 {
        let entry = reader.next_entry().unwrap().unwrap();
        assert_eq!(entry.lsn, expected);
    }
    assert!(reader.next_entry().unwrap().is_none());
    assert_eq!(reader.position(), reader.file_len());
}

#[test]
fn test_reader_iterator() {
    let (_temp, wal_path) = setup_temp_wal();
    write_entries_via_writer(&wal_path, 3);

    let entries: Vec<WalEntry> = WalReader::open(&wal_path)
        .unwrap()
        .entries()
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(entries.len(), 3);
    assert_eq!(
        entries[2].operation,
        put(b"key2", b"value2")
    );
}

#[test]
fn test_reader_torn_tail_is_end_of_log() {
    let (_temp, wal_path) = setup_temp_wal();
    write_entries_via_writer(&wal_path, 2);
    let good_len = fs::metadata(&wal_path).unwrap().len();

    let mut file = OpenOptions::new().append(true).open(&wal_path).unwrap();
    file.write_all(&[1, 2, 3]).unwrap();

    let mut reader = WalReader::open(&wal_path).unwrap();
    assert!(reader.next_entry().unwrap().is_some());
    assert!(reader.next_entry().unwrap().is_some());
    assert!(reader.next_entry().unwrap().is_none());
    assert_eq!(reader.position(), good_len);
}

// =============================================================================
// Recovery Tests
// =============================================================================

#[test]
fn test_recover_empty_file() {
    let (_temp, wal_path) = setup_temp_wal();
    File::create(&wal_path).unwrap();

    let (entries, result) = WalRecovery::recover(&wal_path).unwrap();

    assert_eq!(entries.len(), 0);
    assert_eq!(result.entries_recovered, 0);
    assert_eq!(result.entries_corrupted, 0);
    assert_eq!(result.last_lsn, 0);
    assert!(!result.was_truncated);
}

#[test]
fn test_recover_multiple_entries() {
    let (_temp, wal_path) = setup_temp_wal();
    write_entries_via_writer(&wal_path, 10);

    let (entries, result) = WalRecovery::recover(&wal_path).unwrap();

    assert_eq!(result.entries_recovered, 10);
    assert_eq!(result.last_lsn, 10);
    assert!(!result.was_truncated);
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry.lsn, (i + 1) as u64);
    }
}

#[test]
fn test_recover_partial_header_at_tail() {
    let (_temp, wal_path) = setup_temp_wal();

    let bytes = WalEntry::new(1, put(b"k", b"v")).serialize().unwrap();
    let mut file = File::create(&wal_path).unwrap();
    file.write_all(&bytes).unwrap();
    file.write_all(&[0u8; 8]).unwrap();
    file.sync_all().unwrap();

    let (entries, result) = WalRecovery::recover(&wal_path).unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(result.last_lsn, 1);
    assert!(result.was_truncated);
    assert_eq!(fs::metadata(&wal_path).unwrap().len(), bytes.len() as u64);
}

#[test]
fn test_recover_stops_at_corrupted_entry() {
    let (_temp, wal_path) = setup_temp_wal();

    let first = WalEntry::new(1, put(b"a", b"1")).serialize().unwrap();
    let mut second = WalEntry::new(2, put(b"b", b"2")).serialize().unwrap();
    let third = WalEntry::new(3, put(b"c", b"3")).serialize().unwrap();
    let last = second.len() - 1;
    second[last] ^= 0xFF;

    let mut file = File::create(&wal_path).unwrap();
    file.write_all(&first).unwrap();
    file.write_all(&second).unwrap();
    file.write_all(&third).unwrap();
    file.sync_all().unwrap();

    let (entries, result) = WalRecovery::recover(&wal_path).unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(result.entries_corrupted, 1);
    assert!(result.was_truncated);
    assert_eq!(fs::metadata(&wal_path).unwrap().len(), first.len() as u64);
}

#[test]
fn test_verify_does_not_modify_file() {
    let (_temp, wal_path) = setup_temp_wal();
    write_entries_via_writer(&wal_path, 2);
    let mut file = OpenOptions::new().append(true).open(&wal_path).unwrap();
    file.write_all(&[9u8; 5]).unwrap();
    let len_before = fs::metadata(&wal_path).unwrap().len();

    let result = WalRecovery::verify(&wal_path).unwrap();

    assert_eq!(result.entries_recovered, 2);
    assert!(result.was_truncated);
    assert_eq!(fs::metadata(&wal_path).unwrap().len(), len_before);
}
