//! Binary format definitions for TailStore WAL records
//!
//! Every WAL record follows the same layout:
//! ChunkHeader (32 bytes) + key_len(u16) + value_len(u32) + operation(u8)
//! + user_meta(u8) + expires_at(u64) + key_bytes + value_bytes
//!
//! A transaction is written as its Put/Delete records followed by one
//! Commit record whose value is the record count (u32 LE). Replay only
//! applies records that are followed by a matching Commit.

use std::path::PathBuf;

use crate::error::{EngineError, EngineResult};

/// Magic bytes identifying TailStore WAL records: "TAIL" in ASCII
pub const MAGIC_ARRAY: [u8; 4] = *b"TAIL";

/// Hard format limit on key size (key_len is a u16)
pub const MAX_KEY_SIZE: usize = u16::MAX as usize;

/// Hard format limit on value size (128MB)
pub const MAX_VALUE_SIZE: usize = 128 * 1024 * 1024;

/// Header size in bytes
pub const HEADER_SIZE: usize = 32;

/// Fixed payload fields ahead of key/value bytes
pub const PAYLOAD_PREFIX_SIZE: usize = 2 + 4 + 1 + 1 + 8;

/// WAL operation types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Operation {
    /// Insert or update a key-value pair
    Put = 1,
    /// Delete a key
    Delete = 2,
    /// Close the preceding batch of records
    Commit = 3,
}

impl Operation {
    fn from_u8(b: u8) -> Option<Self> {
        match b {
            1 => Some(Operation::Put),
            2 => Some(Operation::Delete),
            3 => Some(Operation::Commit),
            _ => None,
        }
    }
}

/// Fixed-size header for each WAL record
/// Size: 32 bytes, alignment: 4
///
/// Layout:
///   [0..4]   magic:      [u8;4] - "TAIL"
///   [4..8]   length:     u32    - payload length in bytes
///   [8..12]  checksum:   u32    - CRC32C of payload bytes
///   [12]     entry_type: u8     - operation type
///   [13..16] reserved:   [u8;3]
///   [16..32] padding:    [u8;16]
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct ChunkHeader {
    /// Magic bytes for record identification and corruption resync
    pub magic: [u8; 4],
    /// Total length of the record payload (excluding this header)
    pub length: u32,
    /// CRC32C checksum of the payload bytes
    pub checksum: u32,
    /// Operation type
    pub entry_type: u8,
    /// Reserved for future use, must be zero
    pub reserved: [u8; 3],
    /// Padding to reach 32 bytes
    pub _padding: [u8; 16],
}

impl ChunkHeader {
    fn new(length: u32, checksum: u32, op: Operation) -> Self {
        Self {
            magic: MAGIC_ARRAY,
            length,
            checksum,
            entry_type: op as u8,
            reserved: [0; 3],
            _padding: [0; 16],
        }
    }

    fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic);
        buf[4..8].copy_from_slice(&self.length.to_le_bytes());
        buf[8..12].copy_from_slice(&self.checksum.to_le_bytes());
        buf[12] = self.entry_type;
        buf[13..16].copy_from_slice(&self.reserved);
        buf
    }

    /// Parse header from bytes
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        let mut padding = [0u8; 16];
        padding.copy_from_slice(&bytes[16..32]);

        Self {
            magic,
            length: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            checksum: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            entry_type: bytes[12],
            reserved: [bytes[13], bytes[14], bytes[15]],
            _padding: padding,
        }
    }
}

/// A decoded WAL record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    pub operation: Operation,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub user_meta: u8,
    /// Unix milliseconds after which the entry is expired; 0 = never
    pub expires_at: u64,
}

impl WalRecord {
    /// Number of records claimed by a Commit record.
    pub fn commit_count(&self) -> Option<u32> {
        if self.operation != Operation::Commit || self.value.len() != 4 {
            return None;
        }
        Some(u32::from_le_bytes([self.value[0], self.value[1], self.value[2], self.value[3]]))
    }
}

/// Encoded size of a record with the given key and value lengths.
pub fn encoded_len(key_len: usize, value_len: usize) -> usize {
    HEADER_SIZE + PAYLOAD_PREFIX_SIZE + key_len + value_len
}

/// Append one serialized record to `out`.
pub fn encode_record(
    out: &mut Vec<u8>,
    op: Operation,
    key: &[u8],
    value: &[u8],
    user_meta: u8,
    expires_at: u64,
) -> EngineResult<()> {
    // Validate before allocating
    if key.len() > MAX_KEY_SIZE {
        return Err(EngineError::OversizedEntry {
            entry_size: key.len() as u64,
            max_size: MAX_KEY_SIZE as u64,
            component: "key",
        });
    }
    if value.len() > MAX_VALUE_SIZE {
        return Err(EngineError::OversizedEntry {
            entry_size: value.len() as u64,
            max_size: MAX_VALUE_SIZE as u64,
            component: "value",
        });
    }

    let payload_len = PAYLOAD_PREFIX_SIZE + key.len() + value.len();
    out.reserve(HEADER_SIZE + payload_len);

    // Header goes in first with a zero checksum, patched once the payload is in place.
    let header_at = out.len();
    out.extend_from_slice(&ChunkHeader::new(payload_len as u32, 0, op).to_bytes());

    let payload_at = out.len();
    out.extend_from_slice(&(key.len() as u16).to_le_bytes());
    out.extend_from_slice(&(value.len() as u32).to_le_bytes());
    out.push(op as u8);
    out.push(user_meta);
    out.extend_from_slice(&expires_at.to_le_bytes());
    out.extend_from_slice(key);
    out.extend_from_slice(value);

    let checksum = crc32c::crc32c(&out[payload_at..]);
    out[header_at + 8..header_at + 12].copy_from_slice(&checksum.to_le_bytes());
    Ok(())
}

/// Append a Commit record closing a batch of `count` records.
pub fn encode_commit(out: &mut Vec<u8>, count: u32) -> EngineResult<()> {
    encode_record(out, Operation::Commit, &[], &count.to_le_bytes(), 0, 0)
}

/// Deserialize one WAL record from the start of `data`.
pub fn decode_record(data: &[u8]) -> EngineResult<WalRecord> {
    let buffer = || PathBuf::from("<buffer>");

    if data.len() < HEADER_SIZE {
        return Err(EngineError::WalCorrupted {
            path: buffer(),
            offset: 0,
            reason: format!(
                "Record too short: {} bytes, need at least {}",
                data.len(),
                HEADER_SIZE
            ),
        });
    }

    let mut header_bytes = [0u8; HEADER_SIZE];
    header_bytes.copy_from_slice(&data[..HEADER_SIZE]);
    let header = ChunkHeader::from_bytes(&header_bytes);

    if header.magic != MAGIC_ARRAY {
        return Err(EngineError::NoMagicFound {
            path: buffer(),
            offset: 0,
            found_bytes: header.magic,
        });
    }

    let payload_end = HEADER_SIZE + header.length as usize;
    if data.len() < payload_end {
        return Err(EngineError::TornWrite {
            path: buffer(),
            expected_size: header.length,
            available_bytes: (data.len() - HEADER_SIZE) as u64,
            offset: HEADER_SIZE as u64,
        });
    }

    let payload = &data[HEADER_SIZE..payload_end];
    let computed = crc32c::crc32c(payload);
    if computed != header.checksum {
        return Err(EngineError::ChecksumMismatch {
            path: buffer(),
            expected: header.checksum,
            actual: computed,
            offset: HEADER_SIZE as u64,
        });
    }

    if payload.len() < PAYLOAD_PREFIX_SIZE {
        return Err(EngineError::WalCorrupted {
            path: buffer(),
            offset: HEADER_SIZE as u64,
            reason: "Payload too short for fixed fields".to_string(),
        });
    }

    let key_len = u16::from_le_bytes([payload[0], payload[1]]) as usize;
    let value_len = u32::from_le_bytes([payload[2], payload[3], payload[4], payload[5]]) as usize;
    let operation = Operation::from_u8(payload[6]).ok_or_else(|| EngineError::WalCorrupted {
        path: buffer(),
        offset: (HEADER_SIZE + 6) as u64,
        reason: format!("Invalid operation type: {}", payload[6]),
    })?;
    let user_meta = payload[7];
    let mut expires = [0u8; 8];
    expires.copy_from_slice(&payload[8..16]);
    let expires_at = u64::from_le_bytes(expires);

    let key_end = PAYLOAD_PREFIX_SIZE + key_len;
    let value_end = key_end + value_len;
    if payload.len() != value_end {
        return Err(EngineError::WalCorrupted {
            path: buffer(),
            offset: HEADER_SIZE as u64,
            reason: format!(
                "Payload length {} does not match key({}) + value({})",
                payload.len(), key_len, value_len
            ),
        });
    }

    Ok(WalRecord {
        operation,
        key: payload[PAYLOAD_PREFIX_SIZE..key_end].to_vec(),
        value: payload[key_end..value_end].to_vec(),
        user_meta,
        expires_at,
    })
}
