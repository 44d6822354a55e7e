//! Pivots
//!
//! `partition_count - 1` sorted keys splitting the key space into
//! contiguous ranges. Range 0 is `(-∞, p0]`, range i is `(p[i-1], p[i]]` and
//! the last range is `(p[last], +∞)`.

use crate::error::{FenceError, Result};
use crate::key::KEY_LENGTH;
use crate::position::PartitionId;

/// Separator between pivots in the persisted form
const SEPARATOR: u8 = b'|';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pivots {
    keys: Vec<Vec<u8>>,
}

impl Pivots {
    /// Pick pivots from sorted, distinct keys.
    ///
    /// With `n` keys and `g = partition_count - 1`, pivots sit at indices
    /// `n % g, n % g + gap, …` where `gap = n / g`, so every range between
    /// two pivots holds exactly `gap` keys.
    pub fn generate(sorted_keys: &[&[u8]], partition_count: usize) -> Result<Self> {
        let wanted = partition_count.saturating_sub(1);
        let n = sorted_keys.len();
        if wanted == 0 || n < wanted {
            return Err(FenceError::PivotGeneration {
                expected: wanted,
                actual: n.min(wanted),
            });
        }

        let gap = n / wanted;
        let keys: Vec<Vec<u8>> = (n % wanted..n)
            .step_by(gap)
            .take(wanted)
            .map(|i| sorted_keys[i].to_vec())
            .collect();

        if keys.len() != wanted {
            return Err(FenceError::PivotGeneration {
                expected: wanted,
                actual: keys.len(),
            });
        }
        Ok(Self { keys })
    }

    /// Build from explicit keys, which must be sorted and distinct
    pub fn from_keys(keys: Vec<Vec<u8>>) -> Result<Self> {
        if keys.windows(2).any(|w| w[0] >= w[1]) {
            return Err(FenceError::Config("pivots must be strictly increasing".into()));
        }
        Ok(Self { keys })
    }

    /// Partition owning `key`: the first pivot `>= key`, else the last range
    pub fn partition_of(&self, key: &[u8]) -> PartitionId {
        self.keys.partition_point(|pivot| pivot.as_slice() < key) as PartitionId
    }

    /// `(lower, upper)` bounds of a partition's range; lower is exclusive,
    /// upper inclusive, `None` is unbounded
    pub fn bounds(&self, partition: PartitionId) -> Result<(Option<&[u8]>, Option<&[u8]>)> {
        let p = partition as usize;
        if p > self.keys.len() {
            return Err(FenceError::InvalidPartition(partition));
        }
        let lower = p.checked_sub(1).map(|i| self.keys[i].as_slice());
        let upper = self.keys.get(p).map(|k| k.as_slice());
        Ok((lower, upper))
    }

    pub fn keys(&self) -> &[Vec<u8>] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Number of ranges the pivots define
    pub fn partition_count(&self) -> usize {
        self.keys.len() + 1
    }

    /// Persisted form: padded keys joined with `|`
    pub fn encode(&self) -> Vec<u8> {
        self.keys.join(&SEPARATOR)
    }

    /// Parse the persisted form, checking it holds `expected` pivots
    pub fn decode(bytes: &[u8], expected: usize) -> Result<Self> {
        let stride = KEY_LENGTH + 1;
        if bytes.is_empty() || (bytes.len() + 1) % stride != 0 {
            return Err(FenceError::Config(format!(
                "persisted pivot list has invalid length {}",
                bytes.len()
            )));
        }

        let mut keys = Vec::with_capacity(expected);
        for (i, chunk) in bytes.chunks(stride).enumerate() {
            let (key, sep) = chunk.split_at(KEY_LENGTH);
            let last = (i + 1) * stride > bytes.len();
            if (last && !sep.is_empty()) || (!last && sep != [SEPARATOR]) {
                return Err(FenceError::Config(format!("malformed pivot separator at pivot {}", i)));
            }
            keys.push(key.to_vec());
        }

        if keys.len() != expected {
            return Err(FenceError::Config(format!(
                "data directory was partitioned into {} ranges, configuration asks for {}",
                keys.len() + 1,
                expected + 1
            )));
        }
        Self::from_keys(keys)
    }
}
