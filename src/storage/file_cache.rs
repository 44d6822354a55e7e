//! File Handle Cache
//!
//! Bounded set of open value log files, plus one ranked lock per partition
//! file.
//!
//! ## Responsibilities
//! - Open (creating if missing) partition files on demand
//! - Evict least recently used handles beyond the capacity
//! - Hand out shared `Arc<File>` handles so eviction never closes a file
//!   that an in-flight read or write still uses
//! - Own the per-partition file locks

use std::fs::{self, File, OpenOptions};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::error::{FenceError, Result};
use crate::lock_order::{LockRank, OrderedGuard, OrderedMutex};
use crate::position::{PartitionId, INITIAL_PARTITION};

/// Guard over one partition file; held for the duration of an I/O call
pub type FileGuard<'a> = OrderedGuard<'a, ()>;

pub struct FileCache {
    dir: PathBuf,
    partition_count: usize,
    handles: Mutex<LruCache<PartitionId, Arc<File>>>,
    /// Slots 0..partition_count are partitions, the last slot is the initial group
    locks: Vec<OrderedMutex<()>>,
}

impl FileCache {
    const INITIAL_FILENAME: &'static str = "group_initial.vlog";

    /// Create the cache over `dir`, creating the directory if needed
    pub fn open(dir: &Path, partition_count: usize, capacity: usize) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| FenceError::Config("file cache capacity must be non-zero".into()))?;

        let mut locks: Vec<OrderedMutex<()>> = (0..partition_count)
            .map(|p| OrderedMutex::new(LockRank::File(p as PartitionId), ()))
            .collect();
        locks.push(OrderedMutex::new(LockRank::File(INITIAL_PARTITION), ()));

        Ok(Self {
            dir: dir.to_path_buf(),
            partition_count,
            handles: Mutex::new(LruCache::new(capacity)),
            locks,
        })
    }

    /// Path of a partition's value log
    pub fn path(&self, partition: PartitionId) -> PathBuf {
        if partition == INITIAL_PARTITION {
            self.dir.join(Self::INITIAL_FILENAME)
        } else {
            self.dir.join(format!("group_{:04}.vlog", partition))
        }
    }

    /// Acquire the lock of one partition file
    pub fn lock(&self, partition: PartitionId) -> Result<FileGuard<'_>> {
        Ok(self.locks[self.slot(partition)?].lock())
    }

    /// Get a shared handle, opening the file if it is not cached
    pub fn handle(&self, partition: PartitionId) -> Result<Arc<File>> {
        self.slot(partition)?;
        let mut handles = self.handles.lock();
        if let Some(file) = handles.get(&partition) {
            return Ok(Arc::clone(file));
        }

        let file = Arc::new(Self::open_file(&self.path(partition), false)?);
        if let Some((evicted, _)) = handles.push(partition, Arc::clone(&file)) {
            if evicted != partition {
                tracing::trace!(partition = evicted, "evicted value log handle");
            }
        }
        Ok(file)
    }

    /// Truncate a partition file to empty and cache the fresh handle.
    ///
    /// Caller must hold the partition's file lock.
    pub fn reset(&self, partition: PartitionId) -> Result<Arc<File>> {
        self.slot(partition)?;
        let file = Arc::new(Self::open_file(&self.path(partition), true)?);
        self.handles.lock().put(partition, Arc::clone(&file));
        Ok(file)
    }

    /// Current size of a partition file (zero when it does not exist)
    pub fn file_size(&self, partition: PartitionId) -> Result<u64> {
        match fs::metadata(self.path(partition)) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Number of handles currently open
    pub fn open_count(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn partition_count(&self) -> usize {
        self.partition_count
    }

    fn slot(&self, partition: PartitionId) -> Result<usize> {
        if partition == INITIAL_PARTITION {
            Ok(self.partition_count)
        } else if (partition as usize) < self.partition_count {
            Ok(partition as usize)
        } else {
            Err(FenceError::InvalidPartition(partition))
        }
    }

    fn open_file(path: &Path, truncate: bool) -> Result<File> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(truncate)
            .open(path)?)
    }
}
