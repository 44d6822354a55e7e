//! Storage Module
//!
//! Key-value separated value storage: one append-only value log per
//! partition, addressed by [`PositionDescriptor`](crate::position::PositionDescriptor)s
//! held in the index.
//!
//! ## Responsibilities
//! - Record encoding and bounds-checked decoding
//! - Bounded cache of open value log files and per-file locks
//! - Per-partition append, rewrite and positioned reads
//! - Read coalescing and disk accounting across partitions
//!
//! ## Layout
//! ```text
//! {data_dir}/values/
//!   ├── group_0000.vlog
//!   ├── group_0001.vlog
//!   ├── ...
//!   └── group_initial.vlog   (pending writes before pivots exist)
//! ```

pub mod record;
mod file_cache;
mod group;
mod value_log;

pub use file_cache::{FileCache, FileGuard};
pub use group::{Group, ReadRequest, WriteResult};
pub use record::Record;
pub use value_log::ValueLog;
