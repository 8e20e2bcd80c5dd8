//! Error types for the replica.

use rollcall_protocol::{EntityId, EntityKind, ValidationError};
use std::io;
use thiserror::Error;

/// Result type for replica operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the replica.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] rollcall_storage::StorageError),

    /// I/O error outside the storage backends (directory, META.json).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A persisted record could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// The write was refused before reaching the change log.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The caller's base version is not the stored version.
    #[error("version conflict on {kind} {id}: expected base {expected}, stored {actual}")]
    VersionConflict {
        /// Entity type.
        kind: EntityKind,
        /// Entity id.
        id: EntityId,
        /// Base version the caller wrote against.
        expected: u64,
        /// Version currently stored.
        actual: u64,
    },

    /// A write did not move the version forward.
    #[error("stale write on {kind} {id}: version {attempted} does not exceed stored {stored}")]
    StaleVersion {
        /// Entity type.
        kind: EntityKind,
        /// Entity id.
        id: EntityId,
        /// Version currently stored.
        stored: u64,
        /// Version the write carried.
        attempted: u64,
    },

    /// Entity not found.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Entity type.
        kind: EntityKind,
        /// Entity id.
        id: EntityId,
    },

    /// Another process holds the replica directory.
    #[error("replica locked: another process has exclusive access")]
    Locked,

    /// The replica directory or its metadata is unusable.
    #[error("invalid replica format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Whether the error means the replica can no longer persist writes.
    #[must_use]
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            Self::Storage(_) | Self::Io(_) | Self::Codec { .. } | Self::InvalidFormat { .. } | Self::Locked
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_failures_are_classified() {
        let io = CoreError::from(io::Error::new(io::ErrorKind::Other, "disk gone"));
        assert!(io.is_storage_failure());
        assert!(CoreError::Locked.is_storage_failure());

        let validation = CoreError::from(ValidationError::DuplicateAttendance {
            existing: EntityId::new(),
        });
        assert!(!validation.is_storage_failure());
        assert!(validation.to_string().contains("already recorded"));
    }
}
