//! # FenceKV
//!
//! An embedded key-value store with:
//! - Key-value separation: an ordered index maps keys to value log positions
//! - Range-partitioned value logs, one append-only file per key range
//! - Per-partition garbage collection bounded by a disk budget
//! - Parallel buffer flushes with a fixed lock order
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Engine                                │
//! │            (put / get / delete / scan / gc)                  │
//! └──────┬──────────────────┬──────────────────────┬────────────┘
//!        │                  │                      │
//!        ▼                  ▼                      ▼
//!  ┌───────────┐     ┌─────────────┐       ┌─────────────┐
//!  │  Buffer   │     │ RangeScanner│◄──────│  GcManager  │
//!  │  Manager  │     └──────┬──────┘       └──────┬──────┘
//!  └─────┬─────┘            │                     │
//!        │ flush            │                     │
//!        ▼                  ▼                     ▼
//!  ┌─────────────┐   ┌─────────────┐      ┌─────────────┐
//!  │  Value Log  │   │    Index    │      │  Value Log  │
//!  │ (per-range  │   │  (WAL +     │      │  (rewrite)  │
//!  │   groups)   │   │  snapshot)  │      └─────────────┘
//!  └─────────────┘   └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod key;
pub mod position;
pub mod lock_order;
pub mod stats;
pub mod pool;

pub mod storage;
pub mod index;
pub mod buffer;
pub mod scan;
pub mod gc;
pub mod command;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{FenceError, Result};
pub use config::{Config, WalSyncStrategy};
pub use command::{Command, Output};
pub use engine::Engine;
pub use gc::{GcReport, GcTarget};
pub use key::{Key, KEY_LENGTH};
pub use position::{PartitionId, PositionDescriptor, INITIAL_PARTITION};
pub use stats::{Category, NoopStats, Statistics, StatsReport, StatsSink};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of FenceKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
