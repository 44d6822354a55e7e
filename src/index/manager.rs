//! Index Manager
//!
//! Caches decoded positions in front of the [`IndexStore`] and owns the index
//! lock.
//!
//! ## Responsibilities
//! - Write-through puts (store first, then cache)
//! - Cached point lookups
//! - Range lookups by count and by `(lower, upper]` bounds
//! - Metadata keys, which never show up in ranges

use std::cell::RefCell;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use crate::error::{FenceError, Result};
use crate::key::KEY_LENGTH;
use crate::lock_order::{LockRank, OrderedGuard, OrderedMutex};
use crate::position::PositionDescriptor;

use super::{IndexCursor, IndexStore};

/// Metadata key holding the persisted pivot list
pub const PIVOTS_META_KEY: &[u8] = b"!fencekv:pivots";

type PositionCache = LruCache<Vec<u8>, PositionDescriptor>;

/// Guard over the index lock (and the cache it protects)
pub type IndexGuard<'a> = OrderedGuard<'a, RefCell<PositionCache>>;

pub struct IndexManager {
    store: Arc<dyn IndexStore>,
    cache: OrderedMutex<RefCell<PositionCache>>,
}

impl IndexManager {
    pub fn new(store: Arc<dyn IndexStore>, cache_capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(cache_capacity)
            .ok_or_else(|| FenceError::Config("index cache capacity must be non-zero".into()))?;
        Ok(Self {
            store,
            cache: OrderedMutex::new(LockRank::Index, RefCell::new(LruCache::new(capacity))),
        })
    }

    /// Acquire the index lock
    pub fn lock(&self) -> IndexGuard<'_> {
        self.cache.lock()
    }

    pub fn store(&self) -> &Arc<dyn IndexStore> {
        &self.store
    }

    // =========================================================================
    // Point operations
    // =========================================================================

    pub fn put(&self, key: &[u8], position: PositionDescriptor) -> Result<()> {
        let guard = self.lock();
        self.store.put(key, &position.encode()?)?;
        guard.borrow_mut().put(key.to_vec(), position);
        Ok(())
    }

    /// Durably apply every pair at once, then refresh the cache
    pub fn batch_put(&self, entries: &[(Vec<u8>, PositionDescriptor)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let encoded = entries
            .iter()
            .map(|(key, pos)| Ok((key.clone(), pos.encode()?)))
            .collect::<Result<Vec<_>>>()?;

        let guard = self.lock();
        self.store.batch_put(&encoded)?;
        let mut cache = guard.borrow_mut();
        for (key, pos) in entries {
            cache.put(key.clone(), *pos);
        }
        Ok(())
    }

    /// Resolve a key. A malformed stored descriptor reads as absent.
    pub fn get(&self, key: &[u8]) -> Result<Option<PositionDescriptor>> {
        let guard = self.lock();
        if let Some(pos) = guard.borrow_mut().get(key) {
            return Ok(Some(*pos));
        }

        let Some(bytes) = self.store.get(key)? else {
            return Ok(None);
        };
        match PositionDescriptor::decode(&bytes) {
            Ok(pos) => {
                guard.borrow_mut().put(key.to_vec(), pos);
                Ok(Some(pos))
            }
            Err(e) => {
                tracing::warn!(key = ?String::from_utf8_lossy(key), error = %e, "unreadable index entry");
                Ok(None)
            }
        }
    }

    /// Remove a key from cache and store, reporting whether it was indexed
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        let guard = self.lock();
        guard.borrow_mut().pop(key);
        self.store.delete(key)
    }

    // =========================================================================
    // Range operations
    // =========================================================================

    /// Up to `count` entries with key `>= start`, ascending
    pub fn get_range_count(&self, start: &[u8], count: usize) -> Result<Vec<(Vec<u8>, PositionDescriptor)>> {
        let _guard = self.lock();
        let mut out = Vec::new();
        if count == 0 {
            return Ok(out);
        }

        let mut cursor = self.store.cursor();
        cursor.seek(start);
        while cursor.valid() && out.len() < count {
            if let Some(entry) = user_entry(&*cursor) {
                out.push(entry);
            }
            cursor.next();
        }
        Ok(out)
    }

    /// All entries with `lower < key <= upper`, ascending.
    ///
    /// `None` leaves that side unbounded. With no lower bound the cursor walks
    /// backward from the upper bound and the result is reversed.
    pub fn get_range_between(
        &self,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
    ) -> Result<Vec<(Vec<u8>, PositionDescriptor)>> {
        let _guard = self.lock();
        let mut cursor = self.store.cursor();
        let mut out = Vec::new();

        match lower {
            None => {
                match upper {
                    Some(upper) => {
                        cursor.seek(upper);
                        if !cursor.valid() {
                            cursor.seek_to_last();
                        } else if cursor.key() > upper {
                            cursor.prev();
                        }
                    }
                    None => cursor.seek_to_last(),
                }
                while cursor.valid() {
                    if let Some(entry) = user_entry(&*cursor) {
                        out.push(entry);
                    }
                    cursor.prev();
                }
                out.reverse();
            }
            Some(lower) => {
                cursor.seek(lower);
                if cursor.valid() && cursor.key() == lower {
                    cursor.next();
                }
                while cursor.valid() {
                    if upper.is_some_and(|upper| cursor.key() > upper) {
                        break;
                    }
                    if let Some(entry) = user_entry(&*cursor) {
                        out.push(entry);
                    }
                    cursor.next();
                }
            }
        }
        Ok(out)
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    pub fn write_meta(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let _guard = self.lock();
        self.store.put(key, value)
    }

    pub fn read_meta(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let _guard = self.lock();
        self.store.get(key)
    }

    /// Fold the store's log into durable state
    pub fn checkpoint(&self) -> Result<()> {
        let _guard = self.lock();
        self.store.checkpoint()
    }
}

/// Decode the cursor's entry, skipping metadata and malformed values
fn user_entry(cursor: &dyn IndexCursor) -> Option<(Vec<u8>, PositionDescriptor)> {
    let key = cursor.key();
    if key.len() != KEY_LENGTH {
        return None;
    }
    match PositionDescriptor::decode(cursor.value()) {
        Ok(pos) => Some((key.to_vec(), pos)),
        Err(e) => {
            tracing::warn!(key = ?String::from_utf8_lossy(key), error = %e, "skipping unreadable index entry");
            None
        }
    }
}
