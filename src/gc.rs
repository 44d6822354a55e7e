//! GC Manager
//!
//! Reclaims dead bytes one partition at a time by rewriting the partition
//! from its live pairs.
//!
//! ## Protocol
//! 1. Take the flush, buffer and index locks (in that order)
//! 2. Compute the partition's key range from the pivots
//! 3. Range-scan exactly that range (flushing buffers first)
//! 4. Take the partition's file lock and rewrite the file
//! 5. Point the index at the rewritten records
//! 6. Release everything; the write counter restarts at zero

use std::sync::Arc;

use crate::buffer::BufferManager;
use crate::error::{FenceError, Result};
use crate::index::IndexManager;
use crate::position::{PartitionId, PositionDescriptor};
use crate::scan::RangeScanner;
use crate::stats::{Category, StatsSink};
use crate::storage::{FileCache, ValueLog};

/// Which partition to collect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcTarget {
    /// The partition with the most writes since its last GC
    Auto,
    Partition(PartitionId),
}

/// Outcome of collecting one partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcReport {
    pub partition: PartitionId,
    /// Live pairs written back
    pub live_records: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

impl GcReport {
    pub fn bytes_reclaimed(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

pub struct GcManager {
    buffer: Arc<BufferManager>,
    index: Arc<IndexManager>,
    value_log: Arc<ValueLog>,
    files: Arc<FileCache>,
    scanner: Arc<RangeScanner>,
    stats: Arc<dyn StatsSink>,
}

impl GcManager {
    pub fn new(
        buffer: Arc<BufferManager>,
        index: Arc<IndexManager>,
        value_log: Arc<ValueLog>,
        files: Arc<FileCache>,
        scanner: Arc<RangeScanner>,
        stats: Arc<dyn StatsSink>,
    ) -> Self {
        Self {
            buffer,
            index,
            value_log,
            files,
            scanner,
            stats,
        }
    }

    /// Collect one partition
    pub fn gc(&self, target: GcTarget) -> Result<GcReport> {
        let _flush = self.buffer.lock_flush();
        let _buffer = self.buffer.lock_state();
        let _index = self.index.lock();

        let pivots = self.buffer.pivots().ok_or(FenceError::NotPartitioned)?;
        let partition = match target {
            GcTarget::Auto => self
                .value_log
                .partition_with_most_writes()
                .ok_or(FenceError::NotPartitioned)?,
            GcTarget::Partition(p) if (p as usize) < pivots.partition_count() => p,
            GcTarget::Partition(p) => return Err(FenceError::InvalidPartition(p)),
        };
        let (lower, upper) = pivots.bounds(partition)?;

        let timer = self.stats.start_timer();
        let live = self.scanner.scan_between(lower, upper, true)?;

        let _file = self.files.lock(partition)?;
        let bytes_before = self.value_log.group(partition)?.size()?;
        let written = self.value_log.rewrite(
            partition,
            live.iter().map(|(k, v)| (k.as_slice(), v.as_slice())),
        )?;

        let entries: Vec<(Vec<u8>, PositionDescriptor)> = live
            .into_iter()
            .map(|(key, _)| key)
            .zip(written.positions)
            .collect();
        self.index.batch_put(&entries)?;

        self.stats.stop_timer(Category::GcTime, timer);
        self.stats.add_count(Category::GcWriteBytes, written.bytes_written);

        let report = GcReport {
            partition,
            live_records: entries.len(),
            bytes_before,
            bytes_after: written.bytes_written,
        };
        tracing::debug!(
            partition,
            live = report.live_records,
            reclaimed = report.bytes_reclaimed(),
            "partition collected"
        );
        Ok(report)
    }

    /// Collect every partition in order; one failure does not stop the rest
    pub fn gc_all(&self) -> Result<Vec<Result<GcReport>>> {
        let pivots = self.buffer.pivots().ok_or(FenceError::NotPartitioned)?;
        let reports = (0..pivots.partition_count() as PartitionId)
            .map(|p| {
                let result = self.gc(GcTarget::Partition(p));
                if let Err(e) = &result {
                    tracing::warn!(partition = p, error = %e, "partition GC failed");
                }
                result
            })
            .collect();
        Ok(reports)
    }
}
