//! Range scans
//!
//! Before pivots exist, scans read the pending map directly. Afterwards they
//! follow the locking protocol:
//!
//! 1. Flush every partition buffer
//! 2. Take the index lock, then every partition file lock in increasing order
//! 3. Resolve keys and positions from the index
//! 4. Release the file locks of partitions the result does not touch
//! 5. Read the values with coalescing, then release everything

use std::sync::Arc;

use crate::buffer::{BufferManager, FlushMode};
use crate::error::Result;
use crate::index::IndexManager;
use crate::position::{PartitionId, PositionDescriptor};
use crate::stats::{Category, StatsSink};
use crate::storage::{FileCache, FileGuard, ValueLog};

/// Key-value pairs in ascending key order
pub type Pairs = Vec<(Vec<u8>, Vec<u8>)>;

pub struct RangeScanner {
    buffer: Arc<BufferManager>,
    index: Arc<IndexManager>,
    value_log: Arc<ValueLog>,
    files: Arc<FileCache>,
    stats: Arc<dyn StatsSink>,
}

impl RangeScanner {
    pub fn new(
        buffer: Arc<BufferManager>,
        index: Arc<IndexManager>,
        value_log: Arc<ValueLog>,
        files: Arc<FileCache>,
        stats: Arc<dyn StatsSink>,
    ) -> Self {
        Self {
            buffer,
            index,
            value_log,
            files,
            stats,
        }
    }

    /// Up to `count` live pairs with padded key `>= start`
    pub fn scan(&self, start: &[u8], count: usize) -> Result<Pairs> {
        if let Some(pending) = self.buffer.pending_scan(start, count) {
            return Ok(pending);
        }
        self.scan_resolved(|index| index.get_range_count(start, count), false)
    }

    /// Live pairs with `lower < key <= upper`; `None` leaves a side open.
    ///
    /// `is_gc` keeps the reads out of the range-query statistics.
    pub fn scan_between(&self, lower: Option<&[u8]>, upper: Option<&[u8]>, is_gc: bool) -> Result<Pairs> {
        if let Some(pending) = self.buffer.pending_scan_between(lower, upper) {
            return Ok(pending);
        }
        self.scan_resolved(|index| index.get_range_between(lower, upper), is_gc)
    }

    fn scan_resolved<F>(&self, resolve: F, is_gc: bool) -> Result<Pairs>
    where
        F: FnOnce(&IndexManager) -> Result<Vec<(Vec<u8>, PositionDescriptor)>>,
    {
        let timer = self.stats.start_timer();
        self.buffer.flush_all(FlushMode::Parallel)?;

        let _index = self.index.lock();
        let partition_count = self.files.partition_count();
        let mut file_guards: Vec<Option<FileGuard<'_>>> = Vec::with_capacity(partition_count);
        for p in 0..partition_count {
            file_guards.push(Some(self.files.lock(p as PartitionId)?));
        }

        let resolved = resolve(&self.index)?;

        let mut touched = vec![false; partition_count];
        for (_, pos) in &resolved {
            if let Some(flag) = touched.get_mut(pos.partition as usize) {
                *flag = true;
            }
        }
        for (guard, touched) in file_guards.iter_mut().zip(&touched) {
            if !touched {
                guard.take();
            }
        }

        let positions: Vec<PositionDescriptor> = resolved.iter().map(|(_, pos)| *pos).collect();
        let values = self.value_log.assign_values(&positions, is_gc)?;
        drop(file_guards);

        if !is_gc {
            self.stats.stop_timer(Category::RangeQueryTime, timer);
        }
        tracing::debug!(
            results = resolved.len(),
            partitions = touched.iter().filter(|t| **t).count(),
            gc = is_gc,
            "range scan"
        );

        Ok(resolved
            .into_iter()
            .map(|(key, _)| key)
            .zip(values)
            .collect())
    }
}
