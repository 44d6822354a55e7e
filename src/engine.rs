//! Engine Module
//!
//! The façade that coordinates every component.
//!
//! ## Responsibilities
//! - Validate keys and values before they reach any component
//! - Route writes through the buffers and trigger partition flushes
//! - Keep total value log size under the disk budget by forcing GC
//! - Resolve point reads safely against concurrent GC
//! - Persist buffered writes on close

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::buffer::{is_tombstone, BufferEntry, BufferManager, FlushMode};
use crate::command::{Command, Output};
use crate::config::Config;
use crate::error::{FenceError, Result};
use crate::gc::{GcManager, GcReport, GcTarget};
use crate::index::{DiskIndexStore, IndexManager, IndexStore};
use crate::key::{trim_key, Key};
use crate::position::PartitionId;
use crate::scan::{Pairs, RangeScanner};
use crate::stats::{Statistics, StatsReport, StatsSink};
use crate::storage::{FileCache, ValueLog};

/// The main storage engine
///
/// ## Concurrency Model
///
/// Every method takes `&self`; the engine can be shared across threads
/// behind an `Arc`. Internally the locks are always taken in the order
/// flush → buffer → index → file (increasing partition id):
///
/// - **put**: buffer lock to stage the write; a full partition buffer is then
///   flushed under the flush lock
/// - **get**: buffer lock, then index lock → file lock to pin the record
///   while it is read
/// - **delete**: flush lock held across the buffer and index removal
/// - **scan / gc**: see [`RangeScanner`] and [`GcManager`]
pub struct Engine {
    config: Config,
    stats: Arc<dyn StatsSink>,
    files: Arc<FileCache>,
    index: Arc<IndexManager>,
    value_log: Arc<ValueLog>,
    buffer: Arc<BufferManager>,
    scanner: Arc<RangeScanner>,
    gc: GcManager,

    /// Set once the disk budget could not be restored; writes are refused
    halted: AtomicBool,

    /// Set by `close` so `Drop` does not shut down twice
    closed: AtomicBool,
}

impl Engine {
    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Create the data directories
    /// 2. Recover the index (snapshot + WAL)
    /// 3. Open every partition's value log
    /// 4. Reload persisted pivots and writes left in the initial value log
    pub fn open(config: Config) -> Result<Self> {
        Self::open_with_stats(config, Arc::new(Statistics::new()))
    }

    /// Open with a custom statistics sink
    pub fn open_with_stats(config: Config, stats: Arc<dyn StatsSink>) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;

        let files = Arc::new(FileCache::open(
            &config.values_dir(),
            config.partition_count,
            config.file_cache_capacity,
        )?);
        let store: Arc<dyn IndexStore> = Arc::new(DiskIndexStore::open(
            &config.index_dir(),
            config.index_checkpoint_bytes,
            config.wal_sync_strategy,
        )?);
        let index = Arc::new(IndexManager::new(store, config.index_cache_capacity)?);
        let value_log = Arc::new(ValueLog::open(Arc::clone(&files), Arc::clone(&stats))?);
        let buffer = Arc::new(BufferManager::open(
            &config,
            Arc::clone(&index),
            Arc::clone(&value_log),
            Arc::clone(&stats),
        )?);
        let scanner = Arc::new(RangeScanner::new(
            Arc::clone(&buffer),
            Arc::clone(&index),
            Arc::clone(&value_log),
            Arc::clone(&files),
            Arc::clone(&stats),
        ));
        let gc = GcManager::new(
            Arc::clone(&buffer),
            Arc::clone(&index),
            Arc::clone(&value_log),
            Arc::clone(&files),
            Arc::clone(&scanner),
            Arc::clone(&stats),
        );

        tracing::info!(
            data_dir = %config.data_dir.display(),
            partitions = config.partition_count,
            partitioned = buffer.is_partitioned(),
            disk_bytes = value_log.total_size(),
            "engine opened"
        );

        Ok(Self {
            config,
            stats,
            files,
            index,
            value_log,
            buffer,
            scanner,
            gc,
            halted: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = Config::builder().data_dir(path).build();
        Self::open(config)
    }

    /// Execute a command
    ///
    /// Routes commands to appropriate handlers
    pub fn execute(&self, command: Command) -> Result<Output> {
        tracing::trace!(command = command.name(), "execute");
        match command {
            Command::Get { key } => self.get(&key).map(Output::Value),
            Command::Put { key, value } => {
                self.put(&key, &value)?;
                Ok(Output::Done)
            }
            Command::Delete { key } => {
                self.delete(&key)?;
                Ok(Output::Done)
            }
            Command::Scan { start, count } => self.scan(&start, count).map(Output::Pairs),
            Command::ScanRange { lower, upper } => self
                .scan_between(lower.as_deref(), upper.as_deref())
                .map(Output::Pairs),
            Command::Gc { partition } => {
                let target = partition.map_or(GcTarget::Auto, GcTarget::Partition);
                self.gc(target).map(Output::Gc)
            }
            Command::GcAll => self.gc_all().map(Output::GcAll),
            Command::Flush => {
                self.flush()?;
                Ok(Output::Done)
            }
        }
    }

    // =========================================================================
    // Point operations
    // =========================================================================

    /// Put a key-value pair
    ///
    /// Steps:
    /// 1. Validate key and value
    /// 2. Stage the write in the buffers
    /// 3. If a partition buffer is full, make room on disk and flush it
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_writable()?;
        let key = Key::new(key)?;
        validate_value(value)?;

        if let Some(partition) = self.buffer.put(key.to_vec(), value.to_vec())? {
            self.ensure_disk_budget()?;
            self.buffer.flush(partition)?;
        }
        Ok(())
    }

    /// Get a value by key
    ///
    /// Search order:
    /// 1. Buffers (most recent writes)
    /// 2. Index → value log, pinned by the partition's file lock
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let key = Key::new(key)?;

        match self.buffer.get(key.as_bytes()) {
            Some(BufferEntry::Value(value)) => return Ok(Some(value)),
            Some(BufferEntry::Tombstone) => return Ok(None),
            None => {}
        }

        loop {
            let Some(position) = self.index.get(key.as_bytes())? else {
                return Ok(None);
            };

            let index_guard = self.index.lock();
            let file_guard = match self.files.lock(position.partition) {
                Ok(guard) => guard,
                Err(FenceError::InvalidPartition(p)) => {
                    tracing::warn!(key = ?key, partition = p, "index points at an unknown partition");
                    return Ok(None);
                }
                Err(e) => return Err(e),
            };

            // GC may have moved the record since the first lookup
            let current = self.index.get(key.as_bytes())?;
            drop(index_guard);
            match current {
                None => return Ok(None),
                Some(now) if now != position => {
                    drop(file_guard);
                    continue;
                }
                Some(_) => {}
            }

            let record = self.value_log.read(&position)?;
            drop(file_guard);

            if record.key != key.as_bytes() {
                return Err(FenceError::RecordCorruption {
                    partition: position.partition,
                    reason: format!(
                        "record at offset {} holds a different key",
                        position.offset
                    ),
                });
            }
            return Ok(Some(record.value));
        }
    }

    /// Delete a key
    ///
    /// Success means the key is no longer reachable: the index removal went
    /// through. Deleting a key that was never written is `Ok(())`, the same
    /// as deleting it twice, so callers need no existence check first.
    ///
    /// The flush lock is held throughout so a concurrent flush cannot
    /// re-publish the key after it was removed from the index.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.check_writable()?;
        let key = Key::new(key)?;

        let _flush = self.buffer.lock_flush();
        let buffered = self.buffer.delete(key.as_bytes());
        let indexed = self.index.delete(key.as_bytes())?;
        if !buffered && !indexed {
            tracing::debug!(key = ?key, "delete of absent key");
        }
        Ok(())
    }

    // =========================================================================
    // Range operations
    // =========================================================================

    /// Up to `count` live pairs with key `>= start`, keys as written
    pub fn scan(&self, start: &[u8], count: usize) -> Result<Pairs> {
        let start = Key::new(start)?;
        let pairs = self.scanner.scan(start.as_bytes(), count)?;
        Ok(pairs
            .into_iter()
            .map(|(key, value)| (trim_key(&key).to_vec(), value))
            .collect())
    }

    /// Live pairs with `lower < key <= upper`, keys in stored (padded) form.
    /// `None` leaves that side unbounded.
    pub fn scan_between(&self, lower: Option<&[u8]>, upper: Option<&[u8]>) -> Result<Pairs> {
        let lower = lower.map(Key::new).transpose()?;
        let upper = upper.map(Key::new).transpose()?;
        self.scanner.scan_between(
            lower.as_ref().map(Key::as_bytes),
            upper.as_ref().map(Key::as_bytes),
            false,
        )
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Collect one partition
    pub fn gc(&self, target: GcTarget) -> Result<GcReport> {
        self.gc.gc(target)
    }

    /// Collect every partition in order
    pub fn gc_all(&self) -> Result<Vec<Result<GcReport>>> {
        self.gc.gc_all()
    }

    /// Persist every buffered write
    ///
    /// A no-op before pivots exist; pending writes stay in memory until
    /// partitioning or close.
    pub fn flush(&self) -> Result<()> {
        self.buffer.flush_all(FlushMode::Parallel)
    }

    /// Generate pivots now from whatever keys are pending
    pub fn force_partition(&self) -> Result<()> {
        self.buffer.force_partition()
    }

    /// Force GC until the value logs fit the disk budget again.
    ///
    /// Each failed attempt doubles the wait before the next one. Running out
    /// of attempts halts the engine.
    fn ensure_disk_budget(&self) -> Result<()> {
        let budget = self.config.disk_budget;
        let mut backoff = self.config.gc_retry_backoff;
        let mut attempts = 0;

        while self.value_log.total_size() >= budget {
            if attempts >= self.config.gc_retry_limit {
                let total_bytes = self.value_log.total_size();
                self.halted.store(true, Ordering::SeqCst);
                tracing::error!(total_bytes, budget, attempts, "disk budget exhausted, halting writes");
                return Err(FenceError::DiskBudgetExhausted {
                    total_bytes,
                    budget,
                    attempts,
                });
            }
            attempts += 1;

            match self.gc.gc(GcTarget::Auto) {
                Ok(report) => tracing::debug!(
                    partition = report.partition,
                    reclaimed = report.bytes_reclaimed(),
                    attempt = attempts,
                    "forced GC"
                ),
                Err(e) => tracing::warn!(error = %e, attempt = attempts, "forced GC failed"),
            }

            if self.value_log.total_size() >= budget {
                thread::sleep(backoff);
                backoff = backoff.saturating_mul(2);
            }
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        if self.halted.load(Ordering::SeqCst) {
            return Err(FenceError::Halted);
        }
        Ok(())
    }

    /// Close the engine gracefully
    ///
    /// Persists buffered writes and checkpoints the index
    pub fn close(self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.shutdown()
    }

    fn shutdown(&self) -> Result<()> {
        self.buffer.shutdown()?;
        self.index.checkpoint()?;
        tracing::info!(disk_bytes = self.value_log.total_size(), "engine closed");
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_partitioned(&self) -> bool {
        self.buffer.is_partitioned()
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Current pivot keys (padded), if generated
    pub fn pivots(&self) -> Option<Vec<Vec<u8>>> {
        self.buffer.pivots().map(|p| p.keys().to_vec())
    }

    /// Live keys waiting for pivot generation
    pub fn pending_len(&self) -> usize {
        self.buffer.pending_len()
    }

    /// Bytes currently buffered for one partition
    pub fn buffered_bytes(&self, partition: PartitionId) -> u64 {
        self.buffer.buffered_bytes(partition)
    }

    /// Total bytes across all partition value logs
    pub fn total_disk_size(&self) -> u64 {
        self.value_log.total_size()
    }

    /// Records flushed into `partition` since it was last collected
    pub fn writes_since_gc(&self, partition: PartitionId) -> u64 {
        self.value_log.writes_since_gc(partition)
    }

    /// Summarize (and log) the statistics recorded so far
    pub fn stats_report(&self) -> StatsReport {
        self.stats.report()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.shutdown() {
            tracing::error!(error = %e, "shutdown on drop failed");
        }
    }
}

fn validate_value(value: &[u8]) -> Result<()> {
    if is_tombstone(value) {
        return Err(FenceError::InvalidValue(
            "value equals the reserved tombstone marker".into(),
        ));
    }
    if value.len() > u32::MAX as usize {
        return Err(FenceError::InvalidValue(format!(
            "value is {} bytes, limit is {}",
            value.len(),
            u32::MAX
        )));
    }
    Ok(())
}
