//! Disk-backed index store
//!
//! An in-memory `BTreeMap` made durable by the index WAL and periodic
//! snapshots.
//!
//! ## Concurrency
//! - `wal`: mutations take the WAL mutex first, log, then apply to the map,
//!   so map order always matches log order
//! - `map`: RwLock; cursors hold a read guard for their lifetime

use std::collections::BTreeMap;
use std::fs;
use std::ops::Bound;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock, RwLockReadGuard};

use crate::config::WalSyncStrategy;
use crate::error::Result;

use super::snapshot;
use super::wal::{Operation, WalRecovery, WalWriter};
use super::{IndexCursor, IndexStore};

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

pub struct DiskIndexStore {
    dir: PathBuf,
    map: RwLock<Map>,
    wal: Mutex<WalWriter>,
    checkpoint_bytes: u64,
}

impl DiskIndexStore {
    const WAL_FILENAME: &'static str = "index.wal";
    const SNAPSHOT_FILENAME: &'static str = "index.snap";

    /// Open or create the store in `dir`
    ///
    /// On startup:
    /// 1. Load the snapshot if one exists
    /// 2. Replay the WAL on top of it (torn tail removed)
    /// 3. Checkpoint so the WAL starts empty
    pub fn open(dir: &Path, checkpoint_bytes: u64, sync_strategy: WalSyncStrategy) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let snapshot_path = dir.join(Self::SNAPSHOT_FILENAME);
        let wal_path = dir.join(Self::WAL_FILENAME);

        let mut map = if snapshot_path.exists() {
            snapshot::load(&snapshot_path)?
        } else {
            Map::new()
        };
        let from_snapshot = map.len();

        let mut replayed = 0;
        if wal_path.exists() {
            let (entries, result) = WalRecovery::recover(&wal_path)?;
            for entry in entries {
                apply(&mut map, entry.operation);
            }
            replayed = result.entries_recovered;
        }

        let wal = WalWriter::open(&wal_path, sync_strategy)?;
        let store = Self {
            dir: dir.to_path_buf(),
            map: RwLock::new(map),
            wal: Mutex::new(wal),
            checkpoint_bytes,
        };

        if replayed > 0 {
            store.checkpoint()?;
        }
        tracing::info!(
            dir = %dir.display(),
            from_snapshot,
            replayed,
            keys = store.len(),
            "index store opened"
        );
        Ok(store)
    }

    /// Number of keys (metadata included)
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current WAL size in bytes
    pub fn wal_size(&self) -> u64 {
        self.wal.lock().size()
    }

    fn log_and_apply(&self, operation: Operation) -> Result<()> {
        let mut wal = self.wal.lock();
        wal.append(operation.clone())?;
        apply(&mut self.map.write(), operation);

        if wal.size() >= self.checkpoint_bytes {
            self.checkpoint_locked(&mut wal)?;
        }
        Ok(())
    }

    fn checkpoint_locked(&self, wal: &mut WalWriter) -> Result<()> {
        wal.sync()?;
        {
            let map = self.map.read();
            snapshot::write(&self.dir.join(Self::SNAPSHOT_FILENAME), &map)?;
        }
        wal.truncate()?;
        tracing::debug!(dir = %self.dir.display(), "index checkpoint written");
        Ok(())
    }
}

fn apply(map: &mut Map, operation: Operation) {
    match operation {
        Operation::Put { key, value } => {
            map.insert(key, value);
        }
        Operation::Delete { key } => {
            map.remove(&key);
        }
        Operation::Batch { entries } => {
            map.extend(entries);
        }
    }
}

impl IndexStore for DiskIndexStore {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.log_and_apply(Operation::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        })
    }

    fn batch_put(&self, entries: &[(Vec<u8>, Vec<u8>)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        self.log_and_apply(Operation::Batch {
            entries: entries.to_vec(),
        })
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn delete(&self, key: &[u8]) -> Result<bool> {
        let mut wal = self.wal.lock();
        if !self.map.read().contains_key(key) {
            return Ok(false);
        }
        wal.append(Operation::Delete { key: key.to_vec() })?;
        self.map.write().remove(key);
        Ok(true)
    }

    fn cursor(&self) -> Box<dyn IndexCursor + '_> {
        Box::new(MapCursor {
            map: self.map.read(),
            current: None,
        })
    }

    fn checkpoint(&self) -> Result<()> {
        let mut wal = self.wal.lock();
        self.checkpoint_locked(&mut wal)
    }
}

// =============================================================================
// Cursor
// =============================================================================

struct MapCursor<'a> {
    map: RwLockReadGuard<'a, Map>,
    current: Option<Vec<u8>>,
}

impl IndexCursor for MapCursor<'_> {
    fn seek(&mut self, key: &[u8]) {
        let found = self
            .map
            .range::<[u8], _>((Bound::Included(key), Bound::Unbounded))
            .next()
            .map(|(k, _)| k.clone());
        self.current = found;
    }

    fn seek_to_last(&mut self) {
        self.current = self.map.keys().next_back().cloned();
    }

    fn next(&mut self) {
        let Some(current) = self.current.take() else {
            return;
        };
        self.current = self
            .map
            .range::<[u8], _>((Bound::Excluded(current.as_slice()), Bound::Unbounded))
            .next()
            .map(|(k, _)| k.clone());
    }

    fn prev(&mut self) {
        let Some(current) = self.current.take() else {
            return;
        };
        self.current = self
            .map
            .range::<[u8], _>((Bound::Unbounded, Bound::Excluded(current.as_slice())))
            .next_back()
            .map(|(k, _)| k.clone());
    }

    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn key(&self) -> &[u8] {
        self.current.as_deref().unwrap_or(&[])
    }

    fn value(&self) -> &[u8] {
        self.current
            .as_deref()
            .and_then(|k| self.map.get(k))
            .map_or(&[][..], |v| v.as_slice())
    }
}
