//! Configuration for FenceKV
//!
//! Centralized configuration with sensible defaults. The engine treats the
//! configuration as read-only once opened.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{FenceError, Result};

/// Main configuration for a FenceKV instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── values/          (one value log per partition)
    ///     └── index/           (index WAL + snapshot)
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // Partitioning Configuration
    // -------------------------------------------------------------------------
    /// Number of key-range partitions (value log groups)
    pub partition_count: usize,

    /// Number of pending entries that triggers pivot generation
    pub initial_buffer_capacity: usize,

    /// Max buffered bytes per partition before flush
    pub partition_buffer_size: usize,

    // -------------------------------------------------------------------------
    // Disk Budget / GC Configuration
    // -------------------------------------------------------------------------
    /// Total value log bytes allowed on disk before flushes force GC
    pub disk_budget: u64,

    /// Forced GC attempts before the budget violation becomes fatal
    pub gc_retry_limit: usize,

    /// Initial backoff between forced GC attempts (doubles each attempt)
    pub gc_retry_backoff: Duration,

    // -------------------------------------------------------------------------
    // Concurrency Configuration
    // -------------------------------------------------------------------------
    /// Worker threads used to persist partition buffers in `flush_all`
    pub flush_parallelism: usize,

    // -------------------------------------------------------------------------
    // Cache Configuration
    // -------------------------------------------------------------------------
    /// Resolved positions kept in the index LRU cache
    pub index_cache_capacity: usize,

    /// Value log files kept open at once
    pub file_cache_capacity: usize,

    // -------------------------------------------------------------------------
    // Index Store Configuration
    // -------------------------------------------------------------------------
    /// WAL size that triggers an index snapshot (in bytes)
    pub index_checkpoint_bytes: u64,

    /// Sync strategy: how often to fsync the index WAL
    pub wal_sync_strategy: WalSyncStrategy,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N uncommitted entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./fencekv_data"),
            partition_count: 16,
            initial_buffer_capacity: 100_000,
            partition_buffer_size: 4 * 1024 * 1024, // 4 MB
            disk_budget: 64 * 1024 * 1024 * 1024, // 64 GB
            gc_retry_limit: 16,
            gc_retry_backoff: Duration::from_millis(10),
            flush_parallelism: 4,
            index_cache_capacity: 100_000,
            file_cache_capacity: 64,
            index_checkpoint_bytes: 64 * 1024 * 1024, // 64 MB
            wal_sync_strategy: WalSyncStrategy::EveryNEntries { count: 100 },
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.partition_count < 2 {
            return Err(FenceError::Config(format!(
                "partition_count must be at least 2, got {}",
                self.partition_count
            )));
        }
        if self.partition_count >= u32::MAX as usize {
            return Err(FenceError::Config(format!(
                "partition_count {} is too large",
                self.partition_count
            )));
        }
        if self.initial_buffer_capacity < self.partition_count - 1 {
            return Err(FenceError::Config(format!(
                "initial_buffer_capacity ({}) must hold at least partition_count - 1 ({}) keys",
                self.initial_buffer_capacity,
                self.partition_count - 1
            )));
        }
        if self.partition_buffer_size == 0 {
            return Err(FenceError::Config("partition_buffer_size must be non-zero".into()));
        }
        if self.disk_budget == 0 {
            return Err(FenceError::Config("disk_budget must be non-zero".into()));
        }
        if self.flush_parallelism == 0 {
            return Err(FenceError::Config("flush_parallelism must be non-zero".into()));
        }
        if self.index_cache_capacity == 0 || self.file_cache_capacity == 0 {
            return Err(FenceError::Config("cache capacities must be non-zero".into()));
        }
        if let WalSyncStrategy::EveryNEntries { count: 0 } = self.wal_sync_strategy {
            return Err(FenceError::Config("WAL sync interval must be non-zero".into()));
        }
        Ok(())
    }

    /// Directory holding the per-partition value logs
    pub fn values_dir(&self) -> PathBuf {
        self.data_dir.join("values")
    }

    /// Directory holding the ordered index store
    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join("index")
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the number of partitions
    pub fn partition_count(mut self, count: usize) -> Self {
        self.config.partition_count = count;
        self
    }

    /// Set the pending entry count that triggers pivot generation
    pub fn initial_buffer_capacity(mut self, entries: usize) -> Self {
        self.config.initial_buffer_capacity = entries;
        self
    }

    /// Set the per-partition buffer size (in bytes)
    pub fn partition_buffer_size(mut self, size: usize) -> Self {
        self.config.partition_buffer_size = size;
        self
    }

    /// Set the disk budget (in bytes)
    pub fn disk_budget(mut self, bytes: u64) -> Self {
        self.config.disk_budget = bytes;
        self
    }

    /// Set how many forced GC rounds to attempt before giving up
    pub fn gc_retry_limit(mut self, attempts: usize) -> Self {
        self.config.gc_retry_limit = attempts;
        self
    }

    /// Set the initial backoff between forced GC rounds
    pub fn gc_retry_backoff(mut self, backoff: Duration) -> Self {
        self.config.gc_retry_backoff = backoff;
        self
    }

    /// Set the number of flush worker threads
    pub fn flush_parallelism(mut self, threads: usize) -> Self {
        self.config.flush_parallelism = threads;
        self
    }

    /// Set the index cache capacity (entries)
    pub fn index_cache_capacity(mut self, entries: usize) -> Self {
        self.config.index_cache_capacity = entries;
        self
    }

    /// Set the maximum number of open value log files
    pub fn file_cache_capacity(mut self, files: usize) -> Self {
        self.config.file_cache_capacity = files;
        self
    }

    /// Set the WAL size that triggers an index snapshot (in bytes)
    pub fn index_checkpoint_bytes(mut self, bytes: u64) -> Self {
        self.config.index_checkpoint_bytes = bytes;
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
