//! Error types for the sync server.

use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Malformed or unreadable request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No credentials were presented.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Credentials were presented but are not valid (bad signature,
    /// wrong device, expired).
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// Push batch over the configured limit.
    #[error("batch too large: {size} entries, limit {max}")]
    BatchTooLarge {
        /// Entries in the batch.
        size: usize,
        /// Configured limit.
        max: u32,
    },

    /// No endpoint at this path.
    #[error("unknown route: {0}")]
    UnknownRoute(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::AuthenticationFailed(_)
                | ServerError::NotAuthorized(_)
                | ServerError::BatchTooLarge { .. }
                | ServerError::UnknownRoute(_)
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Internal(_))
    }

    /// HTTP status for this error.
    pub fn status(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_) => 400,
            ServerError::AuthenticationFailed(_) | ServerError::NotAuthorized(_) => 401,
            ServerError::UnknownRoute(_) => 404,
            ServerError::BatchTooLarge { .. } => 413,
            ServerError::Internal(_) => 500,
        }
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        ServerError::InvalidRequest(err.to_string())
    }
}
