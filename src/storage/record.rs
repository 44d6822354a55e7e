//! Value log record codec
//!
//! ## Record Format
//! ```text
//! ┌──────────────────┬──────────────────────┬──────────────┐
//! │ ValueLen: u32 LE │ Key (KEY_LENGTH)     │ Value        │
//! └──────────────────┴──────────────────────┴──────────────┘
//! ```
//!
//! Records are written back-to-back with no framing between them. Decoding
//! never trusts a length field: every read is bounds-checked and failures
//! surface as [`FenceError::RecordCorruption`].

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{FenceError, Result};
use crate::key::KEY_LENGTH;
use crate::position::PartitionId;

/// Size of the value length prefix
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Bytes a record with a `value_len`-byte value occupies on disk
pub fn record_size(value_len: usize) -> u64 {
    (LENGTH_PREFIX_SIZE + KEY_LENGTH + value_len) as u64
}

/// One decoded record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Append one record to `buf`, returning the bytes written
pub fn encode_into(buf: &mut BytesMut, key: &[u8], value: &[u8]) -> Result<u64> {
    if key.len() != KEY_LENGTH {
        return Err(FenceError::InvalidKey {
            reason: format!("record key is {} bytes, expected {}", key.len(), KEY_LENGTH),
        });
    }
    let value_len = u32::try_from(value.len()).map_err(|_| {
        FenceError::InvalidValue(format!("value of {} bytes exceeds u32 length", value.len()))
    })?;

    buf.reserve(LENGTH_PREFIX_SIZE + KEY_LENGTH + value.len());
    buf.put_u32_le(value_len);
    buf.put_slice(key);
    buf.put_slice(value);
    Ok(record_size(value.len()))
}

/// Encode a batch of records into one contiguous block.
///
/// Returns the block and the `(offset, length)` of each record relative to
/// the start of the block.
pub fn encode_block<'a, I>(records: I) -> Result<(BytesMut, Vec<(u64, u64)>)>
where
    I: IntoIterator<Item = (&'a [u8], &'a [u8])>,
{
    let mut buf = BytesMut::new();
    let mut spans = Vec::new();
    let mut offset = 0u64;
    for (key, value) in records {
        let len = encode_into(&mut buf, key, value)?;
        spans.push((offset, len));
        offset += len;
    }
    Ok((buf, spans))
}

/// Decode exactly one record from the front of `cursor`, advancing it
fn decode_one(cursor: &mut &[u8], partition: PartitionId) -> Result<Record> {
    if cursor.remaining() < LENGTH_PREFIX_SIZE {
        return Err(corruption(
            partition,
            format!("{} bytes left, need a length prefix", cursor.remaining()),
        ));
    }
    let value_len = cursor.get_u32_le() as usize;

    if cursor.remaining() < KEY_LENGTH {
        return Err(corruption(
            partition,
            format!("{} bytes left, need a {}-byte key", cursor.remaining(), KEY_LENGTH),
        ));
    }
    let key = cursor[..KEY_LENGTH].to_vec();
    cursor.advance(KEY_LENGTH);

    if cursor.remaining() < value_len {
        return Err(corruption(
            partition,
            format!(
                "value length {} exceeds the {} bytes left",
                value_len,
                cursor.remaining()
            ),
        ));
    }
    let value = cursor[..value_len].to_vec();
    cursor.advance(value_len);

    Ok(Record { key, value })
}

/// Decode a buffer holding one or more complete records
pub fn decode_all(bytes: &[u8], partition: PartitionId) -> Result<Vec<Record>> {
    let mut cursor = bytes;
    let mut records = Vec::new();
    while cursor.has_remaining() {
        records.push(decode_one(&mut cursor, partition)?);
    }
    Ok(records)
}

/// Decode as many complete records as possible.
///
/// Stops at the first malformed record and returns it as the error alongside
/// everything decoded before it.
pub fn decode_prefix(bytes: &[u8], partition: PartitionId) -> (Vec<Record>, Option<FenceError>) {
    let mut cursor = bytes;
    let mut records = Vec::new();
    while cursor.has_remaining() {
        match decode_one(&mut cursor, partition) {
            Ok(record) => records.push(record),
            Err(e) => return (records, Some(e)),
        }
    }
    (records, None)
}

fn corruption(partition: PartitionId, reason: String) -> FenceError {
    FenceError::RecordCorruption { partition, reason }
}
