//! Index Module
//!
//! Maps every live key to the position of its newest record.
//!
//! ## Responsibilities
//! - Ordered, durable key → position storage behind the [`IndexStore`] trait
//! - A bounded cache of decoded positions in front of the store
//! - Forward and backward range iteration for scans and GC
//! - A metadata namespace (the persisted pivot list) disjoint from user keys
//!
//! ## Layout
//! ```text
//! {data_dir}/index/
//!   ├── index.wal    (mutations since the last checkpoint)
//!   └── index.snap   (full map as of the last checkpoint)
//! ```

mod manager;
mod snapshot;
mod store;
pub mod wal;

pub use manager::{IndexGuard, IndexManager, PIVOTS_META_KEY};
pub use store::DiskIndexStore;

use crate::error::Result;

/// Ordered, durable byte map
pub trait IndexStore: Send + Sync {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Apply every pair or none of them
    fn batch_put(&self, entries: &[(Vec<u8>, Vec<u8>)]) -> Result<()>;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Remove `key`, reporting whether it was present
    fn delete(&self, key: &[u8]) -> Result<bool>;

    /// Ordered cursor over a consistent view of the store
    fn cursor(&self) -> Box<dyn IndexCursor + '_>;

    /// Fold logged mutations into durable state
    fn checkpoint(&self) -> Result<()>;
}

/// Bidirectional cursor; starts unpositioned
pub trait IndexCursor {
    /// Position at the first key `>= key`
    fn seek(&mut self, key: &[u8]);

    /// Position at the last key
    fn seek_to_last(&mut self);

    fn next(&mut self);

    fn prev(&mut self);

    fn valid(&self) -> bool;

    /// Current key; empty when not valid
    fn key(&self) -> &[u8];

    /// Current value; empty when not valid
    fn value(&self) -> &[u8];
}
