//! Buffer Manager
//!
//! Owns the flush lock and the buffer lock, and every write that has not yet
//! reached a value log.
//!
//! ## Concurrency
//! - `flush_lock` (rank Flush): held for a whole flush, so at most one flush
//!   is in flight and deletes never race a half-finished flush
//! - `state` (rank Buffer): held only to read or swap buffers; durable
//!   writes happen outside it
//! - A buffer being flushed stays visible to `get` through the slot's
//!   `flushing` snapshot until the index points at the new records

use std::cell::RefCell;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{FenceError, Result};
use crate::index::{IndexManager, PIVOTS_META_KEY};
use crate::lock_order::{self, LockRank, OrderedGuard, OrderedMutex};
use crate::pool::ThreadPool;
use crate::position::{PartitionId, PositionDescriptor, INITIAL_PARTITION};
use crate::stats::{Category, StatsSink};
use crate::storage::ValueLog;

use super::{is_tombstone, BufferEntry, Pivots, WriteBuffer, TOMBSTONE};

/// Guard over the buffer lock
pub type BufferGuard<'a> = OrderedGuard<'a, RefCell<BufferState>>;

/// Guard over the flush lock
pub type FlushGuard<'a> = OrderedGuard<'a, ()>;

/// How `flush_all` runs the durable writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// On the calling thread, in increasing partition order
    Inline,
    /// On the flush pool; falls back to inline when the caller holds the
    /// index lock, since workers need it
    Parallel,
}

/// One partition's buffers
#[derive(Debug, Default)]
pub struct PartitionSlot {
    active: WriteBuffer,
    flushing: Option<Arc<WriteBuffer>>,
}

pub enum BufferState {
    /// Before pivots exist: one map for the whole key space
    Unpartitioned(WriteBuffer),
    /// After pivots exist: one slot per partition
    Partitioned {
        pivots: Arc<Pivots>,
        slots: Vec<PartitionSlot>,
    },
}

type FlushOutcome = (PartitionId, Arc<WriteBuffer>, Result<()>);

pub struct BufferManager {
    partition_count: usize,
    initial_capacity: usize,
    partition_buffer_size: u64,

    flush_lock: OrderedMutex<()>,
    state: OrderedMutex<RefCell<BufferState>>,

    index: Arc<IndexManager>,
    value_log: Arc<ValueLog>,
    stats: Arc<dyn StatsSink>,
    pool: ThreadPool,
}

impl BufferManager {
    /// Build the manager, reloading persisted pivots and draining the
    /// initial value log
    pub fn open(
        config: &Config,
        index: Arc<IndexManager>,
        value_log: Arc<ValueLog>,
        stats: Arc<dyn StatsSink>,
    ) -> Result<Self> {
        let state = match index.read_meta(PIVOTS_META_KEY)? {
            Some(bytes) => {
                let pivots = Pivots::decode(&bytes, config.partition_count - 1)?;
                tracing::info!(partitions = pivots.partition_count(), "loaded persisted pivots");
                partitioned(pivots, config.partition_count)
            }
            None => BufferState::Unpartitioned(WriteBuffer::new()),
        };

        let manager = Self {
            partition_count: config.partition_count,
            initial_capacity: config.initial_buffer_capacity,
            partition_buffer_size: config.partition_buffer_size as u64,
            flush_lock: OrderedMutex::new(LockRank::Flush, ()),
            state: OrderedMutex::new(LockRank::Buffer, RefCell::new(state)),
            index,
            value_log,
            stats,
            pool: ThreadPool::new("fencekv-flush", config.flush_parallelism)?,
        };
        manager.restore_initial()?;
        Ok(manager)
    }

    // =========================================================================
    // Locks
    // =========================================================================

    pub fn lock_flush(&self) -> FlushGuard<'_> {
        self.flush_lock.lock()
    }

    pub fn lock_state(&self) -> BufferGuard<'_> {
        self.state.lock()
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Buffer a write. Returns the partition to flush when its buffer
    /// outgrew the budget.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<Option<PartitionId>> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();

        let should_partition = match &mut *state {
            BufferState::Unpartitioned(pending) => {
                pending.put(key, value);
                pending.live_len() >= self.initial_capacity
            }
            BufferState::Partitioned { pivots, slots } => {
                let partition = pivots.partition_of(&key);
                let size = slots[partition as usize].active.put(key, value);
                return Ok((size > self.partition_buffer_size).then_some(partition));
            }
        };

        if should_partition {
            self.partition_locked(&mut state)?;
        }
        Ok(None)
    }

    /// Remove a key from the buffers, reporting whether a live value was
    /// dropped. Before pivots exist this records a tombstone.
    pub fn delete(&self, key: &[u8]) -> bool {
        let _flush = self.flush_lock.lock();
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();

        match &mut *state {
            BufferState::Unpartitioned(pending) => {
                let had_value = matches!(pending.get(key), Some(BufferEntry::Value(_)));
                pending.put(key.to_vec(), TOMBSTONE.to_vec());
                had_value
            }
            BufferState::Partitioned { pivots, slots } => {
                let partition = pivots.partition_of(key) as usize;
                slots[partition].active.remove(key).is_some()
            }
        }
    }

    /// Generate pivots now from the pending keys
    pub fn force_partition(&self) -> Result<()> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        self.partition_locked(&mut state)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Look a key up in the buffers only
    pub fn get(&self, key: &[u8]) -> Option<BufferEntry> {
        let guard = self.state.lock();
        let state = guard.borrow();

        match &*state {
            BufferState::Unpartitioned(pending) => pending.get(key),
            BufferState::Partitioned { pivots, slots } => {
                let slot = &slots[pivots.partition_of(key) as usize];
                slot.active
                    .get(key)
                    .or_else(|| slot.flushing.as_ref().and_then(|f| f.get(key)))
            }
        }
    }

    /// Up to `count` live pending pairs with key `>= start`, or `None` once
    /// pivots exist
    pub fn pending_scan(&self, start: &[u8], count: usize) -> Option<Vec<(Vec<u8>, Vec<u8>)>> {
        let guard = self.state.lock();
        let state = guard.borrow();
        match &*state {
            BufferState::Unpartitioned(pending) => Some(
                pending
                    .live_from(start)
                    .take(count)
                    .map(|(k, v)| (k.to_vec(), v.to_vec()))
                    .collect(),
            ),
            BufferState::Partitioned { .. } => None,
        }
    }

    /// Live pending pairs with `lower < key <= upper`, or `None` once pivots
    /// exist
    pub fn pending_scan_between(
        &self,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
    ) -> Option<Vec<(Vec<u8>, Vec<u8>)>> {
        let guard = self.state.lock();
        let state = guard.borrow();
        match &*state {
            BufferState::Unpartitioned(pending) => Some(pending.live_between(lower, upper)),
            BufferState::Partitioned { .. } => None,
        }
    }

    // =========================================================================
    // Flush
    // =========================================================================

    /// Persist one partition's buffer to its value log and the index.
    ///
    /// On failure the buffered entries are put back for a later retry.
    pub fn flush(&self, partition: PartitionId) -> Result<()> {
        let _flush = self.flush_lock.lock();
        let snapshots = self.begin_flush(Some(partition))?;

        let outcomes: Vec<FlushOutcome> = snapshots
            .into_iter()
            .map(|(p, buffer)| {
                let result = persist(&self.value_log, &self.index, self.stats.as_ref(), p, &buffer);
                (p, buffer, result)
            })
            .collect();
        self.finish_flush(outcomes)
    }

    /// Flush every non-empty partition buffer. A no-op before pivots exist.
    pub fn flush_all(&self, mode: FlushMode) -> Result<()> {
        let _flush = self.flush_lock.lock();
        let snapshots = match self.begin_flush(None) {
            Ok(snapshots) => snapshots,
            Err(FenceError::NotPartitioned) => return Ok(()),
            Err(e) => return Err(e),
        };
        if snapshots.is_empty() {
            return Ok(());
        }

        let parallel = mode == FlushMode::Parallel
            && snapshots.len() > 1
            && !lock_order::holds_at_least(LockRank::Index);

        let outcomes: Vec<FlushOutcome> = if parallel {
            let handles: Vec<_> = snapshots
                .into_iter()
                .map(|(p, buffer)| {
                    let value_log = Arc::clone(&self.value_log);
                    let index = Arc::clone(&self.index);
                    let stats = Arc::clone(&self.stats);
                    let job_buffer = Arc::clone(&buffer);
                    let handle = self.pool.execute(move || {
                        persist(&value_log, &index, stats.as_ref(), p, &job_buffer)
                    });
                    (p, buffer, handle)
                })
                .collect();
            handles
                .into_iter()
                .map(|(p, buffer, handle)| (p, buffer, handle.wait().and_then(|r| r)))
                .collect()
        } else {
            snapshots
                .into_iter()
                .map(|(p, buffer)| {
                    let result = persist(&self.value_log, &self.index, self.stats.as_ref(), p, &buffer);
                    (p, buffer, result)
                })
                .collect()
        };

        self.finish_flush(outcomes)
    }

    /// Swap out the active buffers of `only` (or of every partition) and
    /// publish them as in-flight snapshots
    fn begin_flush(&self, only: Option<PartitionId>) -> Result<Vec<(PartitionId, Arc<WriteBuffer>)>> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let BufferState::Partitioned { slots, .. } = &mut *state else {
            return Err(FenceError::NotPartitioned);
        };

        let partitions: Vec<PartitionId> = match only {
            Some(p) if (p as usize) < slots.len() => vec![p],
            Some(p) => return Err(FenceError::InvalidPartition(p)),
            None => (0..slots.len() as PartitionId).collect(),
        };

        let mut snapshots = Vec::new();
        for p in partitions {
            let slot = &mut slots[p as usize];
            if slot.active.is_empty() {
                continue;
            }
            let buffer = Arc::new(slot.active.take());
            slot.flushing = Some(Arc::clone(&buffer));
            snapshots.push((p, buffer));
        }
        Ok(snapshots)
    }

    /// Retire in-flight snapshots, restoring the entries of failed flushes.
    /// Returns the first failure.
    fn finish_flush(&self, outcomes: Vec<FlushOutcome>) -> Result<()> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let mut first_error = None;

        if let BufferState::Partitioned { slots, .. } = &mut *state {
            for (p, buffer, result) in outcomes {
                let slot = &mut slots[p as usize];
                slot.flushing = None;
                if let Err(e) = result {
                    tracing::warn!(partition = p, error = %e, "flush failed, keeping entries buffered");
                    let entries = Arc::try_unwrap(buffer).unwrap_or_else(|shared| (*shared).clone());
                    slot.active.absorb_older(entries);
                    first_error.get_or_insert(e);
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Persist everything still buffered. Before pivots exist the pending
    /// map goes to the initial value log, to be drained on the next open.
    pub fn shutdown(&self) -> Result<()> {
        let _flush = self.flush_lock.lock();
        let pending = {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            match &mut *state {
                BufferState::Unpartitioned(pending) => Some(pending.take()),
                BufferState::Partitioned { .. } => None,
            }
        };

        let Some(pending) = pending else {
            return self.flush_all(FlushMode::Parallel);
        };
        if pending.live_len() == 0 {
            return Ok(());
        }

        match self.value_log.append(INITIAL_PARTITION, pending.live()) {
            Ok(positions) => {
                tracing::info!(records = positions.len(), "saved pending writes to initial value log");
                Ok(())
            }
            Err(e) => {
                let guard = self.state.lock();
                if let BufferState::Unpartitioned(current) = &mut *guard.borrow_mut() {
                    current.absorb_older(pending);
                }
                Err(e)
            }
        }
    }

    /// Reload writes left in the initial value log by the previous run
    fn restore_initial(&self) -> Result<()> {
        let records = self.value_log.drain_initial()?;
        if records.is_empty() {
            return Ok(());
        }
        let count = records.len();

        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let should_partition = match &mut *state {
            BufferState::Unpartitioned(pending) => {
                // File order is write order, so later records replace earlier ones
                for record in records {
                    pending.put(record.key, record.value);
                }
                pending.live_len() >= self.initial_capacity
            }
            BufferState::Partitioned { pivots, slots } => {
                for record in records {
                    let slot = &mut slots[pivots.partition_of(&record.key) as usize];
                    if is_tombstone(&record.value) {
                        slot.active.remove(&record.key);
                    } else {
                        slot.active.put(record.key, record.value);
                    }
                }
                false
            }
        };
        tracing::info!(records = count, "restored pending writes from initial value log");

        if should_partition {
            self.partition_locked(&mut state)?;
        }
        Ok(())
    }

    /// Generate and persist pivots, then spread the pending map over the
    /// partition buffers. Caller holds the buffer lock.
    fn partition_locked(&self, state: &mut BufferState) -> Result<()> {
        let BufferState::Unpartitioned(pending) = state else {
            return Ok(());
        };

        let keys: Vec<&[u8]> = pending.live().map(|(k, _)| k).collect();
        let pivots = Pivots::generate(&keys, self.partition_count)?;
        self.index.write_meta(PIVOTS_META_KEY, &pivots.encode())?;

        let live = pending.live_len();
        let mut next = partitioned(pivots, self.partition_count);
        if let BufferState::Partitioned { pivots, slots } = &mut next {
            for (key, value) in pending.take().into_entries() {
                if is_tombstone(&value) {
                    continue;
                }
                slots[pivots.partition_of(&key) as usize].active.put(key, value);
            }
        }
        *state = next;

        tracing::info!(
            partitions = self.partition_count,
            keys = live,
            "pivots generated, pending writes distributed"
        );
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn is_partitioned(&self) -> bool {
        matches!(&*self.state.lock().borrow(), BufferState::Partitioned { .. })
    }

    pub fn pivots(&self) -> Option<Arc<Pivots>> {
        match &*self.state.lock().borrow() {
            BufferState::Partitioned { pivots, .. } => Some(Arc::clone(pivots)),
            BufferState::Unpartitioned(_) => None,
        }
    }

    /// Live keys waiting in the pending map
    pub fn pending_len(&self) -> usize {
        match &*self.state.lock().borrow() {
            BufferState::Unpartitioned(pending) => pending.live_len(),
            BufferState::Partitioned { .. } => 0,
        }
    }

    /// Bytes buffered for one partition
    pub fn buffered_bytes(&self, partition: PartitionId) -> u64 {
        match &*self.state.lock().borrow() {
            BufferState::Partitioned { slots, .. } => slots
                .get(partition as usize)
                .map_or(0, |slot| slot.active.size()),
            BufferState::Unpartitioned(_) => 0,
        }
    }

    pub fn partition_count(&self) -> usize {
        self.partition_count
    }
}

fn partitioned(pivots: Pivots, partition_count: usize) -> BufferState {
    BufferState::Partitioned {
        pivots: Arc::new(pivots),
        slots: (0..partition_count).map(|_| PartitionSlot::default()).collect(),
    }
}

/// Write one buffer to its value log, then point the index at the new records
fn persist(
    value_log: &ValueLog,
    index: &IndexManager,
    stats: &dyn StatsSink,
    partition: PartitionId,
    buffer: &WriteBuffer,
) -> Result<()> {
    let timer = stats.start_timer();
    let positions = value_log.append(partition, buffer.iter())?;
    let entries: Vec<(Vec<u8>, PositionDescriptor)> = buffer
        .iter()
        .map(|(key, _)| key.to_vec())
        .zip(positions)
        .collect();
    index.batch_put(&entries)?;

    stats.stop_timer(Category::FlushTime, timer);
    stats.add_count(Category::FlushRecords, entries.len() as u64);
    tracing::debug!(partition, records = entries.len(), "flushed partition buffer");
    Ok(())
}
