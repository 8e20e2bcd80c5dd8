//! Error types for the sync engine.

use rollcall_core::CoreError;
use std::fmt;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// The five ways a sync can fail, as the rest of the app sees them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Local and remote diverged; handled by the resolver.
    VersionConflict,
    /// A write broke a uniqueness or required-field rule.
    Validation,
    /// The remote could not be reached in time; retried with backoff.
    NetworkUnavailable,
    /// The bearer token was refused; sync halts until re-authenticated.
    AuthExpired,
    /// The local replica could not be read or written.
    StorageFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::VersionConflict => "version conflict",
            ErrorKind::Validation => "validation",
            ErrorKind::NetworkUnavailable => "network unavailable",
            ErrorKind::AuthExpired => "auth expired",
            ErrorKind::StorageFailure => "storage failure",
        };
        f.write_str(name)
    }
}

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The remote could not be reached.
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    /// A push or pull did not finish in time.
    #[error("operation timed out")]
    Timeout,

    /// The remote answered 401.
    #[error("authorization expired: {0}")]
    AuthExpired(String),

    /// Sync is halted after an auth failure and waits for `resume`.
    #[error("sync halted until re-authenticated")]
    Halted,

    /// The remote answered with an error status.
    #[error("server error {status}: {message}")]
    Server {
        /// HTTP status.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// A response could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The local replica failed.
    #[error("replica error: {0}")]
    Replica(#[from] CoreError),

    /// Another cycle is running.
    #[error("a sync cycle is already running")]
    AlreadySyncing,

    /// The cycle was cancelled between states.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Taxonomy bucket of this error. `None` for control-flow outcomes
    /// (`AlreadySyncing`, `Cancelled`) that are not failures.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            SyncError::NetworkUnavailable(_)
            | SyncError::Timeout
            | SyncError::Server { .. }
            | SyncError::Protocol(_) => Some(ErrorKind::NetworkUnavailable),
            SyncError::AuthExpired(_) | SyncError::Halted => Some(ErrorKind::AuthExpired),
            SyncError::Replica(err) => Some(match err {
                CoreError::VersionConflict { .. } | CoreError::StaleVersion { .. } => {
                    ErrorKind::VersionConflict
                }
                CoreError::Validation(_)
                | CoreError::NotFound { .. }
                | CoreError::InvalidOperation { .. } => ErrorKind::Validation,
                _ => ErrorKind::StorageFailure,
            }),
            SyncError::AlreadySyncing | SyncError::Cancelled => None,
        }
    }

    /// Returns true if this error can be retried after a backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Server { status, .. } => *status >= 500,
            SyncError::NetworkUnavailable(_) | SyncError::Timeout | SyncError::Protocol(_) => true,
            _ => false,
        }
    }

    /// Whether this error puts the engine in the `Offline` state.
    pub fn is_offline(&self) -> bool {
        matches!(self, SyncError::NetworkUnavailable(_) | SyncError::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_protocol::{EntityId, EntityKind, ValidationError};

    #[test]
    fn retryable_errors() {
        assert!(SyncError::NetworkUnavailable("connection refused".into()).is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::Server {
            status: 503,
            message: "busy".into()
        }
        .is_retryable());
        assert!(!SyncError::Server {
            status: 400,
            message: "bad".into()
        }
        .is_retryable());
        assert!(!SyncError::AuthExpired("expired".into()).is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
    }

    #[test]
    fn taxonomy() {
        assert_eq!(SyncError::Timeout.kind(), Some(ErrorKind::NetworkUnavailable));
        assert_eq!(SyncError::Halted.kind(), Some(ErrorKind::AuthExpired));
        assert_eq!(SyncError::AlreadySyncing.kind(), None);

        let validation = SyncError::from(CoreError::Validation(
            ValidationError::DuplicateAttendance {
                existing: EntityId::new(),
            },
        ));
        assert_eq!(validation.kind(), Some(ErrorKind::Validation));

        let conflict = SyncError::from(CoreError::VersionConflict {
            kind: EntityKind::Class,
            id: EntityId::new(),
            expected: 1,
            actual: 2,
        });
        assert_eq!(conflict.kind(), Some(ErrorKind::VersionConflict));

        assert_eq!(
            SyncError::from(CoreError::Locked).kind(),
            Some(ErrorKind::StorageFailure)
        );
    }

    #[test]
    fn error_display() {
        let err = SyncError::Server {
            status: 502,
            message: "bad gateway".into(),
        };
        assert!(err.to_string().contains("502"));
        assert_eq!(ErrorKind::AuthExpired.to_string(), "auth expired");
    }
}
