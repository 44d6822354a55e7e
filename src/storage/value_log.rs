//! Value Log
//!
//! Routes reads and writes to the per-partition [`Group`]s and keeps the
//! disk accounting the engine uses for its budget and GC victim selection.
//!
//! ## Responsibilities
//! - Append flushed buffers and rewrite partitions during GC
//! - Batch reads with coalescing of adjacent records
//! - Track writes since the last GC per partition
//! - Track total on-disk size (initial group excluded)

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{FenceError, Result};
use crate::position::{PartitionId, PositionDescriptor, INITIAL_PARTITION};
use crate::stats::{Category, StatsSink};

use super::file_cache::FileCache;
use super::group::{Group, ReadRequest, WriteResult};
use super::record::Record;

#[derive(Debug)]
struct Accounting {
    /// Records flushed into each partition since its last GC
    writes: Vec<u64>,
    /// Sum of all partition file sizes
    total_bytes: u64,
}

pub struct ValueLog {
    groups: Vec<Group>,
    initial: Group,
    accounting: Mutex<Accounting>,
    stats: Arc<dyn StatsSink>,
}

/// One coalesced read and the output slots it fills
struct PlannedRead {
    request: ReadRequest,
    slots: std::ops::Range<usize>,
}

impl ValueLog {
    /// Open every partition's group and compute the starting disk usage
    pub fn open(files: Arc<FileCache>, stats: Arc<dyn StatsSink>) -> Result<Self> {
        let partition_count = files.partition_count();
        let groups: Vec<Group> = (0..partition_count)
            .map(|p| Group::new(p as PartitionId, Arc::clone(&files)))
            .collect();
        let initial = Group::new(INITIAL_PARTITION, Arc::clone(&files));

        let mut total_bytes = 0;
        for group in &groups {
            total_bytes += group.size()?;
        }
        tracing::debug!(partitions = partition_count, total_bytes, "value log opened");

        Ok(Self {
            groups,
            initial,
            accounting: Mutex::new(Accounting {
                writes: vec![0; partition_count],
                total_bytes,
            }),
            stats,
        })
    }

    pub fn group(&self, partition: PartitionId) -> Result<&Group> {
        if partition == INITIAL_PARTITION {
            return Ok(&self.initial);
        }
        self.groups
            .get(partition as usize)
            .ok_or(FenceError::InvalidPartition(partition))
    }

    pub fn partition_count(&self) -> usize {
        self.groups.len()
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Append records to a partition, returning one descriptor per record
    pub fn append<'a, I>(&self, partition: PartitionId, records: I) -> Result<Vec<PositionDescriptor>>
    where
        I: IntoIterator<Item = (&'a [u8], &'a [u8])>,
    {
        let result = self.group(partition)?.append(records)?;
        if partition != INITIAL_PARTITION {
            let mut acc = self.accounting.lock();
            acc.writes[partition as usize] += result.positions.len() as u64;
            acc.total_bytes += result.bytes_written;
        }
        Ok(result.positions)
    }

    /// Rewrite a partition from scratch and reset its write counter.
    ///
    /// Caller must hold the partition's file lock so the old size is stable.
    pub fn rewrite<'a, I>(&self, partition: PartitionId, records: I) -> Result<WriteResult>
    where
        I: IntoIterator<Item = (&'a [u8], &'a [u8])>,
    {
        if partition == INITIAL_PARTITION {
            return Err(FenceError::InvalidPartition(partition));
        }
        let group = self.group(partition)?;
        let old_size = group.size()?;
        let result = group.rewrite(records)?;

        let mut acc = self.accounting.lock();
        acc.total_bytes = acc.total_bytes.saturating_sub(old_size) + result.bytes_written;
        acc.writes[partition as usize] = 0;
        Ok(result)
    }

    /// Read back and truncate the initial group
    pub fn drain_initial(&self) -> Result<Vec<Record>> {
        self.initial.drain_and_reset()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Read the single record at `position`
    pub fn read(&self, position: &PositionDescriptor) -> Result<Record> {
        let request = ReadRequest {
            offset: position.offset,
            length: position.length,
        };
        let mut batches = self.group(position.partition)?.read_at(&[request])?;
        let mut records = batches.pop().unwrap_or_default();
        if records.len() != 1 {
            return Err(FenceError::RecordCorruption {
                partition: position.partition,
                reason: format!("expected one record at offset {}, decoded {}", position.offset, records.len()),
            });
        }
        records.pop().ok_or_else(|| FenceError::RecordCorruption {
            partition: position.partition,
            reason: "empty read".into(),
        })
    }

    /// Fetch the value for every descriptor, preserving order.
    ///
    /// Runs of descriptors in the same partition whose byte ranges touch are
    /// merged into one read. The number of reads issued is recorded as a
    /// range-query statistic unless `is_gc` is set.
    pub fn assign_values(&self, positions: &[PositionDescriptor], is_gc: bool) -> Result<Vec<Vec<u8>>> {
        let mut values: Vec<Vec<u8>> = vec![Vec::new(); positions.len()];
        let mut reads_issued = 0u64;

        let mut start = 0;
        while start < positions.len() {
            let partition = positions[start].partition;
            let mut end = start + 1;
            while end < positions.len() && positions[end].partition == partition {
                end += 1;
            }

            let plan = coalesce(partition, &positions[start..end], start)?;
            let requests: Vec<ReadRequest> = plan.iter().map(|p| p.request).collect();
            let batches = self.group(partition)?.read_at(&requests)?;
            reads_issued += requests.len() as u64;

            for (planned, records) in plan.into_iter().zip(batches) {
                if records.len() != planned.slots.len() {
                    return Err(FenceError::RecordCorruption {
                        partition,
                        reason: format!(
                            "expected {} records at offset {}, decoded {}",
                            planned.slots.len(),
                            planned.request.offset,
                            records.len()
                        ),
                    });
                }
                for (slot, record) in planned.slots.zip(records) {
                    values[slot] = record.value;
                }
            }

            start = end;
        }

        if !is_gc {
            self.stats.add_count(Category::RangeQueryRandomReads, reads_issued);
        }
        Ok(values)
    }

    // =========================================================================
    // Accounting
    // =========================================================================

    /// Partition with the most records flushed since its last GC
    /// (lowest id on ties)
    pub fn partition_with_most_writes(&self) -> Option<PartitionId> {
        let acc = self.accounting.lock();
        let mut best: Option<(PartitionId, u64)> = None;
        for (p, &writes) in acc.writes.iter().enumerate() {
            if best.map_or(true, |(_, w)| writes > w) {
                best = Some((p as PartitionId, writes));
            }
        }
        best.map(|(p, _)| p)
    }

    pub fn writes_since_gc(&self, partition: PartitionId) -> u64 {
        self.accounting
            .lock()
            .writes
            .get(partition as usize)
            .copied()
            .unwrap_or(0)
    }

    /// Total bytes across all partition files
    pub fn total_size(&self) -> u64 {
        self.accounting.lock().total_bytes
    }
}

/// Merge touching byte ranges; `base` is the output slot of `run[0]`.
///
/// Ranges whose end overflows are reported as corruption.
fn coalesce(partition: PartitionId, run: &[PositionDescriptor], base: usize) -> Result<Vec<PlannedRead>> {
    let mut plan: Vec<PlannedRead> = Vec::new();
    for (i, pos) in run.iter().enumerate() {
        let slot = base + i;
        let overflow = || FenceError::RecordCorruption {
            partition,
            reason: format!("range {}+{} overflows", pos.offset, pos.length),
        };
        pos.offset.checked_add(pos.length).ok_or_else(overflow)?;

        if let Some(last) = plan.last_mut() {
            let last_end = last.request.offset + last.request.length;
            if last_end == pos.offset {
                last.request.length = last.request.length.checked_add(pos.length).ok_or_else(overflow)?;
                last.slots.end = slot + 1;
                continue;
            }
        }
        plan.push(PlannedRead {
            request: ReadRequest {
                offset: pos.offset,
                length: pos.length,
            },
            slots: slot..slot + 1,
        });
    }
    Ok(plan)
}
