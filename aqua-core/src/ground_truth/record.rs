//! Ground-truth wire record.

use crate::error::{AquaError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::Cursor;

/// Token a client sends to request one record.
pub const REQUEST_TOKEN: &[u8; 3] = b"42\n";

/// Size of one record on the wire.
pub const RECORD_SIZE: usize = 24;

/// Resource usage reported by one server.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GroundTruthRecord {
    /// CPU load.
    pub cpu: f64,
    /// Memory in use.
    pub memory: i64,
    /// Busy worker count.
    pub busy_workers: i32,
    /// Id the server reports for itself.
    pub server_id: i32,
}

impl GroundTruthRecord {
    /// Decode a little-endian record.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != RECORD_SIZE {
            return Err(AquaError::Serialization(format!(
                "ground-truth record is {} bytes, expected {}",
                bytes.len(),
                RECORD_SIZE
            )));
        }
        let mut cursor = Cursor::new(bytes);
        Ok(Self {
            cpu: cursor.read_f64::<LittleEndian>()?,
            memory: cursor.read_i64::<LittleEndian>()?,
            busy_workers: cursor.read_i32::<LittleEndian>()?,
            server_id: cursor.read_i32::<LittleEndian>()?,
        })
    }

    /// Encode as a little-endian record.
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut out = Vec::with_capacity(RECORD_SIZE);
        // Writing to a Vec cannot fail.
        let _ = out.write_f64::<LittleEndian>(self.cpu);
        let _ = out.write_i64::<LittleEndian>(self.memory);
        let _ = out.write_i32::<LittleEndian>(self.busy_workers);
        let _ = out.write_i32::<LittleEndian>(self.server_id);
        let mut bytes = [0u8; RECORD_SIZE];
        bytes.copy_from_slice(&out);
        bytes
    }
}
