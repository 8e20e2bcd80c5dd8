//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while reading or writing replica files.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of storage.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// A record in the middle of a log failed its checksum or length check.
    ///
    /// A damaged *final* record is treated as a torn write and truncated
    /// instead; this error means intact data follows the damage.
    #[error("corrupted record at offset {offset}: {reason}")]
    Corrupted {
        /// Offset of the damaged record header.
        offset: u64,
        /// What was wrong with it.
        reason: String,
    },

    /// A single record is larger than the frame format can describe.
    #[error("record of {0} bytes exceeds the 4 GiB frame limit")]
    RecordTooLarge(usize),
}

impl StorageError {
    pub(crate) fn corrupted(offset: u64, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            offset,
            reason: reason.into(),
        }
    }
}
