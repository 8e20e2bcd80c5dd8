//! Bearer-token authentication using HMAC-SHA256.
//!
//! ## Token Format
//!
//! - 16 bytes: device id
//! - 8 bytes: issue time (Unix millis, big-endian)
//! - 32 bytes: HMAC-SHA256 signature over the first 24 bytes
//!
//! Total: 56 bytes, hex-encoded in the `Authorization: Bearer` header.

use crate::error::{ServerError, ServerResult};
use hmac::{Hmac, Mac};
use rollcall_protocol::DeviceId;
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

const TOKEN_LEN: usize = 56;
const SIGNED_LEN: usize = 24;

/// Authentication configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a new auth configuration.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the token expiration duration.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

/// Issues and checks device tokens.
#[derive(Clone)]
pub struct TokenValidator {
    config: AuthConfig,
}

impl TokenValidator {
    /// Creates a new token validator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Issues a hex-encoded token for a device.
    pub fn create_token(&self, device_id: DeviceId) -> ServerResult<String> {
        self.create_token_at(device_id, now_millis())
    }

    fn create_token_at(&self, device_id: DeviceId, issued_at: u64) -> ServerResult<String> {
        let mut token = Vec::with_capacity(TOKEN_LEN);
        token.extend_from_slice(device_id.as_bytes());
        token.extend_from_slice(&issued_at.to_be_bytes());
        let signature = self.sign(&token)?;
        token.extend_from_slice(&signature);
        Ok(to_hex(&token))
    }

    /// Checks a hex-encoded token and returns the device it was issued to.
    pub fn validate_token(&self, token: &str) -> ServerResult<DeviceId> {
        let bytes = from_hex(token)
            .filter(|b| b.len() == TOKEN_LEN)
            .ok_or_else(|| ServerError::NotAuthorized("malformed token".into()))?;

        let (signed, signature) = bytes.split_at(SIGNED_LEN);
        if self.sign(signed)?.as_slice() != signature {
            return Err(ServerError::NotAuthorized("invalid signature".into()));
        }

        let mut device = [0u8; 16];
        device.copy_from_slice(&signed[..16]);
        let mut issued = [0u8; 8];
        issued.copy_from_slice(&signed[16..]);

        let expiry = self.config.token_expiry.as_millis() as u64;
        if now_millis() > u64::from_be_bytes(issued).saturating_add(expiry) {
            return Err(ServerError::NotAuthorized("token expired".into()));
        }
        Ok(DeviceId::from_bytes(device))
    }

    fn sign(&self, data: &[u8]) -> ServerResult<[u8; 32]> {
        let mut mac = HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::Internal(format!("hmac key: {e}")))?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().into())
    }
}

/// Extracts the token from an `Authorization` header value.
pub fn bearer_token(header: Option<&str>) -> ServerResult<&str> {
    let header =
        header.ok_or_else(|| ServerError::AuthenticationFailed("missing authorization".into()))?;
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ServerError::AuthenticationFailed("expected a bearer token".into()))
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn from_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 || !text.is_ascii() {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&text[i..i + 2], 16).ok())
        .collect()
}
