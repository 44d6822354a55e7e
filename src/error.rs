//! Error types for FenceKV
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

use crate::position::PartitionId;

/// Result type alias using FenceError
pub type Result<T> = std::result::Result<T, FenceError>;

/// Unified error type for FenceKV operations
#[derive(Debug, Error)]
pub enum FenceError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Validation Errors
    // -------------------------------------------------------------------------
    #[error("Invalid key: {reason}")]
    InvalidKey { reason: String },

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Unknown partition: {0}")]
    InvalidPartition(PartitionId),

    // -------------------------------------------------------------------------
    // Index Errors
    // -------------------------------------------------------------------------
    #[error("WAL corruption detected: {0}")]
    WalCorruption(String),

    #[error("Index snapshot corrupted: {0}")]
    SnapshotCorruption(String),

    #[error("Malformed position descriptor: {0}")]
    InvalidPosition(String),

    // -------------------------------------------------------------------------
    // Value Log Errors
    // -------------------------------------------------------------------------
    #[error("Value log corruption in partition {partition}: {reason}")]
    RecordCorruption {
        partition: PartitionId,
        reason: String,
    },

    // -------------------------------------------------------------------------
    // Partitioning Errors
    // -------------------------------------------------------------------------
    #[error("Pivot generation produced {actual} pivots, expected {expected}")]
    PivotGeneration { expected: usize, actual: usize },

    #[error("Pivots have not been generated yet")]
    NotPartitioned,

    // -------------------------------------------------------------------------
    // Capacity Errors
    // -------------------------------------------------------------------------
    #[error(
        "Disk budget exhausted: {total_bytes} bytes on disk, budget {budget} bytes, \
         gave up after {attempts} forced GC attempts"
    )]
    DiskBudgetExhausted {
        total_bytes: u64,
        budget: u64,
        attempts: usize,
    },

    #[error("Engine halted after a fatal error; writes are rejected")]
    Halted,

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Concurrency Errors
    // -------------------------------------------------------------------------
    #[error("Background task failed: {0}")]
    Task(String),
}

impl FenceError {
    /// Whether this error must stop the engine from accepting further writes
    pub fn is_fatal(&self) -> bool {
        matches!(self, FenceError::DiskBudgetExhausted { .. } | FenceError::Halted)
    }
}

impl From<bincode::Error> for FenceError {
    fn from(err: bincode::Error) -> Self {
        FenceError::Serialization(err.to_string())
    }
}
