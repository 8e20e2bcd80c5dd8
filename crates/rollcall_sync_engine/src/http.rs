//! HTTP/JSON transport.
//!
//! The HTTP client is a trait so any HTTP library can back it. Bodies are
//! JSON; every call carries `Authorization: Bearer <token>` when a token is
//! available. Pulled entities are decoded one at a time so a single bad
//! record is quarantined instead of failing the page.

use crate::error::{SyncError, SyncResult};
use crate::state::Quarantined;
use crate::transport::{PulledPage, SyncTransport};
use parking_lot::RwLock;
use rollcall_protocol::{Entity, PullRequest, PullResponse, PushRequest, PushResponse};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Status and body of an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

/// Why an HTTP call produced no response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpFailure {
    /// Connection could not be made or was lost.
    Unreachable(String),
    /// No response within the timeout.
    TimedOut,
}

/// HTTP client abstraction.
pub trait HttpClient: Send + Sync {
    /// Sends a JSON `POST` and returns the response.
    fn post(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: Vec<u8>,
        timeout: Duration,
    ) -> Result<HttpResponse, HttpFailure>;
}

/// Supplies the bearer token for each call.
pub trait TokenProvider: Send + Sync {
    /// Current token, or `None` to send no `Authorization` header.
    fn token(&self) -> Option<String>;
}

/// A token held in memory and replaced on re-authentication.
#[derive(Debug, Default)]
pub struct StaticToken {
    token: RwLock<Option<String>>,
}

impl StaticToken {
    /// Creates a provider holding `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }

    /// Replaces the token.
    pub fn set(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    /// Drops the token.
    pub fn clear(&self) {
        *self.token.write() = None;
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        self.token.read().clone()
    }
}

/// HTTP-based sync transport.
pub struct HttpTransport<C: HttpClient> {
    base_url: String,
    client: C,
    tokens: Option<Arc<dyn TokenProvider>>,
    timeout: Duration,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a transport for `base_url` (e.g. `https://sync.example.com`).
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            tokens: None,
            timeout: Duration::from_secs(30),
            last_error: RwLock::new(None),
        }
    }

    /// Sets where bearer tokens come from.
    pub fn with_tokens(mut self, tokens: Arc<dyn TokenProvider>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Sets the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn post_json<Req: Serialize>(&self, endpoint: &str, request: &Req) -> SyncResult<Vec<u8>> {
        let body = serde_json::to_vec(request)
            .map_err(|e| SyncError::Protocol(format!("failed to encode request: {e}")))?;
        let url = format!("{}{}", self.base_url, endpoint);
        let token = self.tokens.as_ref().and_then(|t| t.token());

        let result = match self.client.post(&url, token.as_deref(), body, self.timeout) {
            Err(HttpFailure::Unreachable(reason)) => Err(SyncError::NetworkUnavailable(reason)),
            Err(HttpFailure::TimedOut) => Err(SyncError::Timeout),
            Ok(response) => match response.status {
                200..=299 => Ok(response.body),
                401 => Err(SyncError::AuthExpired(body_text(&response.body))),
                status => Err(SyncError::Server {
                    status,
                    message: body_text(&response.body),
                }),
            },
        };

        *self.last_error.write() = result.as_ref().err().map(ToString::to_string);
        result
    }
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        let body = self.post_json("/sync/push", request)?;
        decode(&body)
    }

    fn pull(&self, request: &PullRequest) -> SyncResult<PulledPage> {
        let body = self.post_json("/sync/pull", request)?;
        decode_pull(&body)
    }
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> SyncResult<T> {
    serde_json::from_slice(body)
        .map_err(|e| SyncError::Protocol(format!("failed to decode response: {e}")))
}

/// Decodes a pull body entity by entity.
fn decode_pull(body: &[u8]) -> SyncResult<PulledPage> {
    let mut root: Value = decode(body)?;
    let raw = match root.as_object_mut().and_then(|o| o.remove("entities")) {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => Vec::new(),
        Some(_) => return Err(SyncError::Protocol("`entities` is not an array".into())),
    };
    let mut shell: PullResponse = serde_json::from_value(root)
        .map_err(|e| SyncError::Protocol(format!("failed to decode response: {e}")))?;

    let mut quarantined = Vec::new();
    for item in raw {
        let id = item.get("id").and_then(Value::as_str).map(str::to_string);
        match serde_json::from_value::<Entity>(item) {
            Ok(entity) => shell.entities.push(entity),
            Err(err) => {
                warn!(id = ?id, error = %err, "quarantined undecodable entity");
                quarantined.push(Quarantined {
                    local_seq: None,
                    kind: None,
                    id,
                    reason: err.to_string(),
                });
            }
        }
    }
    Ok(PulledPage {
        response: shell,
        quarantined,
    })
}

fn body_text(body: &[u8]) -> String {
    String::from_utf8_lossy(body).into_owned()
}

/// A server that can handle loopback requests.
pub trait LoopbackServer: Send + Sync {
    /// Handles a `POST` to `path` and returns status and body.
    fn handle_post(&self, path: &str, authorization: Option<&str>, body: &[u8]) -> HttpResponse;
}

/// An HTTP client that routes requests directly to an in-process server.
///
/// It can be switched offline to simulate a dead network.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
    online: AtomicBool,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self {
            server,
            online: AtomicBool::new(true),
        }
    }

    /// Simulates the network going down or coming back.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Returns the server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    fn post(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: Vec<u8>,
        _timeout: Duration,
    ) -> Result<HttpResponse, HttpFailure> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(HttpFailure::Unreachable("loopback offline".into()));
        }
        let path = url.find("/sync/").map_or(url, |i| &url[i..]);
        let header = bearer.map(|token| format!("Bearer {token}"));
        Ok(self.server.handle_post(path, header.as_deref(), &body))
    }
}
