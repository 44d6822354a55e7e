//! Fixed-width keys
//!
//! Every user key is stored as exactly [`KEY_LENGTH`] bytes. Shorter keys are
//! right-padded with [`KEY_PAD`]; keys that are too long, or that contain the
//! pad byte themselves, are rejected so padding stays reversible.

use std::fmt;

use crate::error::{FenceError, Result};

/// Width of every stored key
pub const KEY_LENGTH: usize = 24;

/// Padding byte appended to short keys
pub const KEY_PAD: u8 = b' ';

/// A validated, padded key
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key([u8; KEY_LENGTH]);

impl Key {
    /// Validate and pad a raw user key
    pub fn new(raw: &[u8]) -> Result<Self> {
        if raw.is_empty() {
            return Err(FenceError::InvalidKey {
                reason: "key must not be empty".into(),
            });
        }
        if raw.len() > KEY_LENGTH {
            return Err(FenceError::InvalidKey {
                reason: format!("key is {} bytes, limit is {}", raw.len(), KEY_LENGTH),
            });
        }
        if raw.contains(&KEY_PAD) {
            return Err(FenceError::InvalidKey {
                reason: "key must not contain the padding byte (space)".into(),
            });
        }

        let mut padded = [KEY_PAD; KEY_LENGTH];
        padded[..raw.len()].copy_from_slice(raw);
        Ok(Self(padded))
    }

    /// Rebuild a key from its stored form
    pub fn from_padded(bytes: &[u8]) -> Result<Self> {
        let padded: [u8; KEY_LENGTH] =
            bytes.try_into().map_err(|_| FenceError::InvalidKey {
                reason: format!("stored key is {} bytes, expected {}", bytes.len(), KEY_LENGTH),
            })?;
        Ok(Self(padded))
    }

    /// The padded bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The key as the caller wrote it
    pub fn trimmed(&self) -> &[u8] {
        trim_key(&self.0)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({:?})", String::from_utf8_lossy(self.trimmed()))
    }
}

/// Pad a raw key, validating it
pub fn pad_key(raw: &[u8]) -> Result<Vec<u8>> {
    Key::new(raw).map(|k| k.to_vec())
}

/// Strip trailing padding from a stored key
pub fn trim_key(padded: &[u8]) -> &[u8] {
    let end = padded
        .iter()
        .rposition(|&b| b != KEY_PAD)
        .map_or(0, |i| i + 1);
    &padded[..end]
}
