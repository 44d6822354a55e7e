//! Buffer Module
//!
//! In-memory staging of writes before they reach the value logs.
//!
//! ## Responsibilities
//! - Collect writes in one pending map until pivots exist
//! - Generate pivots once, persist them, then route writes per partition
//! - Signal when a partition buffer outgrows its budget
//! - Flush partition buffers to the value log and index
//!
//! ## States
//! ```text
//!   Unpartitioned ──(pending count reaches capacity)──► Partitioned
//!   (one pending map)                                  (one buffer per partition)
//! ```

mod manager;
mod pivots;
mod table;

pub use manager::{BufferGuard, BufferManager, BufferState, FlushGuard, FlushMode};
pub use pivots::Pivots;
pub use table::WriteBuffer;

/// Value marking a logical delete in the pending map
pub const TOMBSTONE: &[u8] = b"\0__FENCEKV_TOMBSTONE__\0";

pub fn is_tombstone(value: &[u8]) -> bool {
    value == TOMBSTONE
}

/// Entry found in a buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferEntry {
    /// A live value
    Value(Vec<u8>),

    /// A deleted key (pre-partition only)
    Tombstone,
}
