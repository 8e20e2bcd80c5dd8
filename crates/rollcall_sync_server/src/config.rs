//! Server configuration.

use std::time::Duration;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum entities returned by one pull.
    pub max_pull_batch: u32,
    /// Maximum entries accepted in one push.
    pub max_push_batch: u32,
    /// Whether requests must carry a bearer token.
    pub require_auth: bool,
    /// Secret key for token validation (if auth enabled).
    pub auth_secret: Option<Vec<u8>>,
    /// How long an issued token stays valid.
    pub token_expiry: Duration,
}

impl ServerConfig {
    /// Creates a configuration with default limits and no auth.
    pub fn new() -> Self {
        Self {
            max_pull_batch: 100,
            max_push_batch: 100,
            require_auth: false,
            auth_secret: None,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the maximum pull batch size.
    pub fn with_max_pull_batch(mut self, size: u32) -> Self {
        self.max_pull_batch = size;
        self
    }

    /// Sets the maximum push batch size.
    pub fn with_max_push_batch(mut self, size: u32) -> Self {
        self.max_push_batch = size;
        self
    }

    /// Enables authentication with the given secret.
    pub fn with_auth(mut self, secret: Vec<u8>) -> Self {
        self.require_auth = true;
        self.auth_secret = Some(secret);
        self
    }

    /// Sets the token lifetime.
    pub fn with_token_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_pull_batch, 100);
        assert_eq!(config.max_push_batch, 100);
        assert!(!config.require_auth);
        assert!(config.auth_secret.is_none());
    }

    #[test]
    fn builder_pattern() {
        let config = ServerConfig::new()
            .with_max_pull_batch(10)
            .with_max_push_batch(5)
            .with_auth(b"secret".to_vec())
            .with_token_expiry(Duration::from_secs(60));
        assert_eq!(config.max_pull_batch, 10);
        assert_eq!(config.max_push_batch, 5);
        assert!(config.require_auth);
        assert_eq!(config.token_expiry, Duration::from_secs(60));
    }
}
