//! Enrollment blob codec
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! magic "ENRL" | version u16 | kind u8 | dim u32 | count u32 | payload_len u32 | crc32 u32 | payload
//! ```
//!
//! `payload` is the postcard encoding of the vector list. The CRC covers the
//! payload only; header fields are cross-checked against the decoded vectors.

use crate::store::EnrollmentSet;
use crate::StorageError;
use serde::{Deserialize, Serialize};

pub const MAGIC: &[u8; 4] = b"ENRL";
pub const FORMAT_VERSION: u16 = 1;

const HEADER_LEN: usize = 4 + 2 + 1 + 4 + 4 + 4 + 4;

/// Which factor an enrollment set belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnrollmentKind {
    Face,
    Voice,
}

impl EnrollmentKind {
    fn tag(self) -> u8 {
        match self {
            EnrollmentKind::Face => 1,
            EnrollmentKind::Voice => 2,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(EnrollmentKind::Face),
            2 => Some(EnrollmentKind::Voice),
            _ => None,
        }
    }
}

/// Encode an enrollment set into a blob
pub fn encode(kind: EnrollmentKind, set: &EnrollmentSet) -> Result<Vec<u8>, StorageError> {
    let payload = postcard::to_allocvec(set.vectors())
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    let crc = crc32fast::hash(&payload);

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.push(kind.tag());
    out.extend_from_slice(&(set.dimension().unwrap_or(0) as u32).to_le_bytes());
    out.extend_from_slice(&(set.len() as u32).to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decode a blob, verifying magic, version, kind, checksum and dimensions
pub fn decode(expected: EnrollmentKind, bytes: &[u8]) -> Result<EnrollmentSet, StorageError> {
    if bytes.len() < HEADER_LEN {
        return Err(StorageError::Truncated);
    }
    if &bytes[0..4] != MAGIC {
        return Err(StorageError::BadMagic);
    }

    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != FORMAT_VERSION {
        return Err(StorageError::UnsupportedVersion(version));
    }

    let found = EnrollmentKind::from_tag(bytes[6]).ok_or(StorageError::BadMagic)?;
    if found != expected {
        return Err(StorageError::KindMismatch { expected, found });
    }

    let dim = read_u32(bytes, 7) as usize;
    let count = read_u32(bytes, 11) as usize;
    let payload_len = read_u32(bytes, 15) as usize;
    let stored = read_u32(bytes, 19);

    let payload = bytes
        .get(HEADER_LEN..HEADER_LEN + payload_len)
        .ok_or(StorageError::Truncated)?;
    let computed = crc32fast::hash(payload);
    if stored != computed {
        return Err(StorageError::Checksum { stored, computed });
    }

    let vectors: Vec<Vec<f32>> =
        postcard::from_bytes(payload).map_err(|e| StorageError::Serialization(e.to_string()))?;
    if vectors.len() != count {
        return Err(StorageError::Serialization(format!(
            "header count {} but payload holds {}",
            count,
            vectors.len()
        )));
    }

    let mut set = EnrollmentSet::new();
    for vector in vectors {
        if vector.len() != dim {
            return Err(StorageError::DimensionMismatch {
                expected: dim,
                actual: vector.len(),
            });
        }
        set.push(vector)?;
    }
    Ok(set)
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}
