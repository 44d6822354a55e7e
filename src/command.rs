//! Command definitions
//!
//! Operations the engine can be asked to run, and what they produce.

use crate::error::Result;
use crate::gc::GcReport;
use crate::position::PartitionId;

/// A parsed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Get a value by key
    Get { key: Vec<u8> },

    /// Put a key-value pair
    Put { key: Vec<u8>, value: Vec<u8> },

    /// Delete a key
    Delete { key: Vec<u8> },

    /// Up to `count` pairs starting at `start`
    Scan { start: Vec<u8>, count: usize },

    /// Pairs with `lower < key <= upper`
    ScanRange {
        lower: Option<Vec<u8>>,
        upper: Option<Vec<u8>>,
    },

    /// Collect one partition, or the busiest one when `partition` is `None`
    Gc { partition: Option<PartitionId> },

    /// Collect every partition
    GcAll,

    /// Persist every buffered write
    Flush,
}

impl Command {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Command::Get { .. } => "get",
            Command::Put { .. } => "put",
            Command::Delete { .. } => "delete",
            Command::Scan { .. } => "scan",
            Command::ScanRange { .. } => "scan_range",
            Command::Gc { .. } => "gc",
            Command::GcAll => "gc_all",
            Command::Flush => "flush",
        }
    }

    /// Whether the command changes stored data
    pub fn is_write(&self) -> bool {
        matches!(self, Command::Put { .. } | Command::Delete { .. })
    }
}

/// Result of a successfully executed command
#[derive(Debug)]
pub enum Output {
    /// The command has no payload
    Done,

    /// Result of a point lookup
    Value(Option<Vec<u8>>),

    /// Result of a scan, in key order
    Pairs(Vec<(Vec<u8>, Vec<u8>)>),

    /// Result of a single-partition GC
    Gc(GcReport),

    /// Per-partition results of a full GC
    GcAll(Vec<Result<GcReport>>),
}
