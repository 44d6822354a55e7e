//! Write buffer
//!
//! Ordered in-memory map of pending writes for one partition (or for the
//! whole key space before pivots exist).

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::storage::record::record_size;

use super::{is_tombstone, BufferEntry};

/// Pending writes, sorted by padded key
#[derive(Debug, Clone, Default)]
pub struct WriteBuffer {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    /// Bytes the entries will occupy in the value log
    size: u64,
    /// Entries whose value is the tombstone marker
    tombstones: usize,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a pair, returning the new buffer size
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> u64 {
        let added = record_size(value.len());
        if is_tombstone(&value) {
            self.tombstones += 1;
        }
        if let Some(old) = self.entries.insert(key, value) {
            self.forget(&old);
        }
        self.size += added;
        self.size
    }

    pub fn get(&self, key: &[u8]) -> Option<BufferEntry> {
        self.entries.get(key).map(|value| {
            if is_tombstone(value) {
                BufferEntry::Tombstone
            } else {
                BufferEntry::Value(value.clone())
            }
        })
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove a key outright, returning its value
    pub fn remove(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        let old = self.entries.remove(key)?;
        self.forget(&old);
        Some(old)
    }

    /// Approximate on-disk size of the buffered records
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Entries including tombstones
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries holding a real value
    pub fn live_len(&self) -> usize {
        self.entries.len() - self.tombstones
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in key order, tombstones included
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    /// Live entries in key order
    pub fn live(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.iter().filter(|(_, v)| !is_tombstone(v))
    }

    /// Live entries with key `>= start`, in key order
    pub fn live_from<'a>(&'a self, start: &'a [u8]) -> impl Iterator<Item = (&'a [u8], &'a [u8])> {
        self.entries
            .range::<[u8], _>((Bound::Included(start), Bound::Unbounded))
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
            .filter(|(_, v)| !is_tombstone(v))
    }

    /// Live entries with `lower < key <= upper`, in key order
    pub fn live_between(&self, lower: Option<&[u8]>, upper: Option<&[u8]>) -> Vec<(Vec<u8>, Vec<u8>)> {
        if let (Some(lo), Some(hi)) = (lower, upper) {
            if lo >= hi {
                return Vec::new();
            }
        }
        let lower = lower.map_or(Bound::Unbounded, Bound::Excluded);
        let upper = upper.map_or(Bound::Unbounded, Bound::Included);
        self.entries
            .range::<[u8], _>((lower, upper))
            .filter(|(_, v)| !is_tombstone(v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Move every entry out, leaving this buffer empty
    pub fn take(&mut self) -> WriteBuffer {
        std::mem::take(self)
    }

    /// Merge entries from an older buffer; keys already present here are newer
    /// and win
    pub fn absorb_older(&mut self, older: WriteBuffer) {
        for (key, value) in older.entries {
            if !self.entries.contains_key(&key) {
                self.put(key, value);
            }
        }
    }

    /// Consume the buffer, yielding entries in key order
    pub fn into_entries(self) -> impl Iterator<Item = (Vec<u8>, Vec<u8>)> {
        self.entries.into_iter()
    }

    fn forget(&mut self, old: &[u8]) {
        self.size -= record_size(old.len());
        if is_tombstone(old) {
            self.tombstones -= 1;
        }
    }
}
