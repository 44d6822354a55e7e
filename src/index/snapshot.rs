//! Index snapshot
//!
//! Full copy of the index map, written at checkpoints so the WAL can be
//! truncated.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (14 bytes)                                       │
//! │   Magic: "FKIX" (4) | Version: u16 (2) | Count: u64 (8) │
//! ├─────────────────────────────────────────────────────────┤
//! │ Data Block (variable)                                   │
//! │   [KeyLen: u32][ValLen: u32][Key][Value]                │
//! │   ... repeated for each entry, in key order ...         │
//! ├─────────────────────────────────────────────────────────┤
//! │ Footer (4 bytes)                                        │
//! │   DataCRC: u32                                          │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Snapshots are written to a temporary file and renamed into place, so a
//! crash mid-write leaves the previous snapshot intact.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use bytes::Buf;

use crate::error::{FenceError, Result};

/// Magic bytes identifying a FenceKV index snapshot
const MAGIC: &[u8; 4] = b"FKIX";

/// Current snapshot format version
const VERSION: u16 = 1;

/// Magic (4) + Version (2) + EntryCount (8)
const HEADER_SIZE: usize = 14;

/// DataCRC (4)
const FOOTER_SIZE: usize = 4;

/// Write every entry of `map` to `path`
pub fn write(path: &Path, map: &BTreeMap<Vec<u8>, Vec<u8>>) -> Result<()> {
    let tmp = path.with_extension("snap.tmp");
    {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        let mut writer = BufWriter::new(file);
        let mut hasher = crc32fast::Hasher::new();

        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&(map.len() as u64).to_le_bytes())?;

        for (key, value) in map {
            let key_len = (key.len() as u32).to_le_bytes();
            let val_len = (value.len() as u32).to_le_bytes();
            for part in [&key_len[..], &val_len[..], key.as_slice(), value.as_slice()] {
                writer.write_all(part)?;
                hasher.update(part);
            }
        }

        writer.write_all(&hasher.finalize().to_le_bytes())?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }

    fs::rename(&tmp, path)?;
    if let Some(dir) = path.parent() {
        // Persist the rename itself
        if let Ok(dir) = File::open(dir) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

/// Load a snapshot, verifying its header and checksum
pub fn load(path: &Path) -> Result<BTreeMap<Vec<u8>, Vec<u8>>> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;

    if bytes.len() < HEADER_SIZE + FOOTER_SIZE {
        return Err(corrupt(format!("{} bytes is too short", bytes.len())));
    }
    if &bytes[0..4] != MAGIC {
        return Err(corrupt(format!("bad magic {:?}", &bytes[0..4])));
    }

    let mut header = &bytes[4..HEADER_SIZE];
    let version = header.get_u16_le();
    if version != VERSION {
        return Err(corrupt(format!("unsupported version {}", version)));
    }
    let count = header.get_u64_le();

    let data = &bytes[HEADER_SIZE..bytes.len() - FOOTER_SIZE];
    let mut footer = &bytes[bytes.len() - FOOTER_SIZE..];
    let expected_crc = footer.get_u32_le();
    let actual_crc = crc32fast::hash(data);
    if expected_crc != actual_crc {
        return Err(corrupt(format!(
            "CRC mismatch: expected {:#010x}, got {:#010x}",
            expected_crc, actual_crc
        )));
    }

    let mut map = BTreeMap::new();
    let mut cursor = data;
    for _ in 0..count {
        if cursor.remaining() < 8 {
            return Err(corrupt("truncated entry header".into()));
        }
        let key_len = cursor.get_u32_le() as usize;
        let val_len = cursor.get_u32_le() as usize;
        if cursor.remaining() < key_len + val_len {
            return Err(corrupt("truncated entry".into()));
        }
        let key = cursor[..key_len].to_vec();
        cursor.advance(key_len);
        let value = cursor[..val_len].to_vec();
        cursor.advance(val_len);
        map.insert(key, value);
    }
    if cursor.has_remaining() {
        return Err(corrupt(format!("{} trailing bytes", cursor.remaining())));
    }

    Ok(map)
}

fn corrupt(reason: String) -> FenceError {
    FenceError::SnapshotCorruption(reason)
}
