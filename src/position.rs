//! Position descriptors
//!
//! A position descriptor locates one record inside a partition's value log.
//! Descriptors are stored as the values of the ordered index.

use serde::{Deserialize, Serialize};

use crate::error::{FenceError, Result};

/// Identifier of a partition (value log group)
pub type PartitionId = u32;

/// Reserved id of the group used before pivots exist
pub const INITIAL_PARTITION: PartitionId = PartitionId::MAX;

/// Encoded size: partition (4) + offset (8) + length (8)
pub const ENCODED_POSITION_SIZE: usize = 20;

/// Where a record lives on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionDescriptor {
    /// Owning partition
    pub partition: PartitionId,

    /// Byte offset of the record in the partition file
    pub offset: u64,

    /// Byte length of the whole record
    pub length: u64,
}

impl PositionDescriptor {
    pub fn new(partition: PartitionId, offset: u64, length: u64) -> Self {
        Self {
            partition,
            offset,
            length,
        }
    }

    /// Offset one past the last byte of the record
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    /// Serialize for storage in the index
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize an index value, rejecting anything that is not exactly
    /// one encoded descriptor
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != ENCODED_POSITION_SIZE {
            return Err(FenceError::InvalidPosition(format!(
                "expected {} bytes, got {}",
                ENCODED_POSITION_SIZE,
                bytes.len()
            )));
        }
        bincode::deserialize(bytes).map_err(|e| FenceError::InvalidPosition(e.to_string()))
    }
}
