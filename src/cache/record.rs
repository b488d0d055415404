//! On-Disk Record Format
//!
//! ```text
//! ┌──────────────────────────┬──────────────────────────────────────┐
//! │ timestamp (i64, BE, ms)  │ payload (gzip when compression is on) │
//! │ 8 bytes                  │ 0..n bytes                            │
//! └──────────────────────────┴──────────────────────────────────────┘
//! ```

use std::path::Path;

use bytes::{Buf, BufMut};

use crate::error::{Error, Result};

/// Length of the timestamp header
pub const HEADER_LEN: usize = 8;

/// A decoded disk record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskRecord {
    /// Creation time in epoch milliseconds
    pub timestamp_millis: i64,
    /// Payload bytes: as stored when decoded from a file, plain once the
    /// disk tier has decompressed them
    pub payload: Vec<u8>,
}

impl DiskRecord {
    pub fn new(timestamp_millis: i64, payload: Vec<u8>) -> Self {
        Self {
            timestamp_millis,
            payload,
        }
    }

    /// Serialize header + payload
    pub fn encode(&self) -> Vec<u8> {
        encode(self.timestamp_millis, &self.payload)
    }

    /// Parse a file's contents; `path` is only used for error reporting
    pub fn decode(path: &Path, data: &[u8]) -> Result<Self> {
        let timestamp_millis = read_timestamp(path, data)?;
        Ok(Self {
            timestamp_millis,
            payload: data[HEADER_LEN..].to_vec(),
        })
    }
}

/// Serialize a timestamp header followed by `payload`
pub fn encode(timestamp_millis: i64, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.put_i64(timestamp_millis);
    buf.put_slice(payload);
    buf
}

/// Read just the header timestamp
pub fn read_timestamp(path: &Path, data: &[u8]) -> Result<i64> {
    if data.len() < HEADER_LEN {
        return Err(Error::Corrupted {
            path: path.to_path_buf(),
            reason: format!(
                "file is {} bytes, shorter than the {}-byte header",
                data.len(),
                HEADER_LEN
            ),
        });
    }
    let mut header = &data[..HEADER_LEN];
    Ok(header.get_i64())
}
