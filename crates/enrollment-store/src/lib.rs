//! Enrollment Storage
//!
//! Durable storage for biometric enrollment sets (face encodings, voice
//! embeddings). Each set is persisted as a single versioned, checksummed
//! blob and mirrored by an in-memory cache.

mod codec;
mod outcome;
mod store;

pub use codec::{decode, encode, EnrollmentKind, FORMAT_VERSION, MAGIC};
pub use outcome::MatchOutcome;
pub use store::{EnrollmentSet, EnrollmentStore};

use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bad magic bytes")]
    BadMagic,

    #[error("Unsupported format version {0}")]
    UnsupportedVersion(u16),

    #[error("Blob holds {found:?} enrollments, expected {expected:?}")]
    KindMismatch {
        expected: EnrollmentKind,
        found: EnrollmentKind,
    },

    #[error("Truncated blob")]
    Truncated,

    #[error("Checksum mismatch (stored {stored:#010x}, computed {computed:#010x})")]
    Checksum { stored: u32, computed: u32 },

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Empty vector")]
    EmptyVector,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Lock poisoned: {0}")]
    Lock(String),
}
