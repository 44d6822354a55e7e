//! Group
//!
//! One partition's append-only value log file.
//!
//! ## Responsibilities
//! - Append a batch of records as one contiguous write
//! - Rewrite the whole file from scratch (GC)
//! - Positioned reads of one or more back-to-back records
//! - Drain the initial group once at startup
//!
//! Every I/O call holds the partition's file lock only for that call.

use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use crate::error::{FenceError, Result};
use crate::position::{PartitionId, PositionDescriptor};

use super::file_cache::FileCache;
use super::record::{self, Record};

/// A byte range to read from a group file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub offset: u64,
    pub length: u64,
}

/// Outcome of an append or rewrite
#[derive(Debug, Clone, Default)]
pub struct WriteResult {
    /// One descriptor per input record, in input order
    pub positions: Vec<PositionDescriptor>,
    /// Bytes written to the file
    pub bytes_written: u64,
}

pub struct Group {
    id: PartitionId,
    files: Arc<FileCache>,
}

impl Group {
    pub fn new(id: PartitionId, files: Arc<FileCache>) -> Self {
        Self { id, files }
    }

    pub fn id(&self) -> PartitionId {
        self.id
    }

    /// Append records at the end of the file with a single write
    pub fn append<'a, I>(&self, records: I) -> Result<WriteResult>
    where
        I: IntoIterator<Item = (&'a [u8], &'a [u8])>,
    {
        let (block, spans) = record::encode_block(records)?;
        if spans.is_empty() {
            return Ok(WriteResult::default());
        }

        let _guard = self.files.lock(self.id)?;
        let file = self.files.handle(self.id)?;
        let mut file = &*file;
        let base = file.seek(SeekFrom::End(0))?;
        file.write_all(&block)?;
        file.sync_data()?;

        Ok(WriteResult {
            positions: self.positions(base, &spans),
            bytes_written: block.len() as u64,
        })
    }

    /// Replace the file contents with `records`, written from offset zero.
    ///
    /// Old descriptors into this group are invalid afterwards.
    pub fn rewrite<'a, I>(&self, records: I) -> Result<WriteResult>
    where
        I: IntoIterator<Item = (&'a [u8], &'a [u8])>,
    {
        let (block, spans) = record::encode_block(records)?;

        let _guard = self.files.lock(self.id)?;
        let file = self.files.reset(self.id)?;
        let mut file = &*file;
        file.write_all(&block)?;
        file.sync_data()?;

        Ok(WriteResult {
            positions: self.positions(0, &spans),
            bytes_written: block.len() as u64,
        })
    }

    /// Read each range and decode the records it holds.
    ///
    /// Ranges are checked against the file size before any buffer is
    /// allocated.
    pub fn read_at(&self, requests: &[ReadRequest]) -> Result<Vec<Vec<Record>>> {
        let mut out = Vec::with_capacity(requests.len());
        for request in requests {
            let buf = {
                let _guard = self.files.lock(self.id)?;
                let file = self.files.handle(self.id)?;
                let file_len = file.metadata()?.len();
                let length = self.checked_length(request, file_len)?;

                let mut buf = vec![0u8; length];
                let mut file = &*file;
                file.seek(SeekFrom::Start(request.offset))?;
                file.read_exact(&mut buf)?;
                buf
            };
            out.push(record::decode_all(&buf, self.id)?);
        }
        Ok(out)
    }

    /// Length of `request` in memory, if the range lies inside the file
    fn checked_length(&self, request: &ReadRequest, file_len: u64) -> Result<usize> {
        let within = request
            .offset
            .checked_add(request.length)
            .is_some_and(|end| end <= file_len);
        if !within {
            return Err(FenceError::RecordCorruption {
                partition: self.id,
                reason: format!(
                    "range {}+{} runs past the end of the file ({} bytes)",
                    request.offset, request.length, file_len
                ),
            });
        }
        usize::try_from(request.length).map_err(|_| FenceError::RecordCorruption {
            partition: self.id,
            reason: format!("read length {} does not fit in memory", request.length),
        })
    }

    /// Read every record in file order, then truncate the file to empty.
    ///
    /// A torn tail is dropped with a warning.
    pub fn drain_and_reset(&self) -> Result<Vec<Record>> {
        let _guard = self.files.lock(self.id)?;
        let file = self.files.handle(self.id)?;
        let mut file = &*file;
        let mut bytes = Vec::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut bytes)?;

        let (records, error) = record::decode_prefix(&bytes, self.id);
        if let Some(e) = error {
            tracing::warn!(
                partition = self.id,
                recovered = records.len(),
                error = %e,
                "dropping unreadable tail of value log"
            );
        }

        self.files.reset(self.id)?;
        Ok(records)
    }

    /// Current file size in bytes
    pub fn size(&self) -> Result<u64> {
        self.files.file_size(self.id)
    }

    fn positions(&self, base: u64, spans: &[(u64, u64)]) -> Vec<PositionDescriptor> {
        spans
            .iter()
            .map(|&(offset, length)| PositionDescriptor::new(self.id, base + offset, length))
            .collect()
    }
}
