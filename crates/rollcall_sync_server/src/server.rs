//! Main sync server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use crate::store::RemoteStore;
use rollcall_protocol::{
    DeviceId, Entity, EntityId, EntityKind, PullRequest, PullResponse, PushRequest, PushResponse,
};
use std::sync::Arc;
use tracing::warn;

/// Path of the push endpoint.
pub const PUSH_PATH: &str = "/sync/push";
/// Path of the pull endpoint.
pub const PULL_PATH: &str = "/sync/pull";

/// Status and JSON body of an HTTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    /// HTTP status code.
    pub status: u16,
    /// JSON body.
    pub body: Vec<u8>,
}

/// The sync server.
///
/// Processes push and pull requests against one shared [`RemoteStore`].
/// It has no socket of its own: an HTTP front end (or an in-process
/// loopback client) hands it a path, the `Authorization` header and the
/// request body through [`SyncServer::handle_http`].
///
/// # Example
///
/// ```
/// use rollcall_sync_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default());
/// let reply = server.handle_http("/sync/pull", None, br#"{"watermark":0,"limit":50}"#);
/// assert_eq!(reply.status, 200);
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl SyncServer {
    /// Creates a sync server with an empty store.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_store(config, Arc::new(RemoteStore::new()))
    }

    /// Creates a sync server over an existing store.
    pub fn with_store(config: ServerConfig, store: Arc<RemoteStore>) -> Self {
        let context = Arc::new(HandlerContext::new(config, store));
        let handler = RequestHandler::new(Arc::clone(&context));
        Self { handler, context }
    }

    /// Handles a push request.
    pub fn handle_push(
        &self,
        authorization: Option<&str>,
        request: PushRequest,
    ) -> ServerResult<PushResponse> {
        self.handler.handle_push(authorization, request)
    }

    /// Handles a pull request.
    pub fn handle_pull(
        &self,
        authorization: Option<&str>,
        request: PullRequest,
    ) -> ServerResult<PullResponse> {
        self.handler.handle_pull(authorization, request)
    }

    /// Routes a `POST` to the matching endpoint and encodes the reply.
    pub fn handle_http(&self, path: &str, authorization: Option<&str>, body: &[u8]) -> HttpReply {
        match self.route(path, authorization, body) {
            Ok(body) => HttpReply { status: 200, body },
            Err(err) => {
                if err.is_server_error() {
                    warn!(path, error = %err, "request failed");
                }
                let body = serde_json::json!({ "error": err.to_string() }).to_string();
                HttpReply {
                    status: err.status(),
                    body: body.into_bytes(),
                }
            }
        }
    }

    fn route(&self, path: &str, authorization: Option<&str>, body: &[u8]) -> ServerResult<Vec<u8>> {
        let encoded = match path {
            PUSH_PATH => {
                let request: PushRequest = serde_json::from_slice(body)?;
                serde_json::to_vec(&self.handle_push(authorization, request)?)
            }
            PULL_PATH => {
                let request: PullRequest = serde_json::from_slice(body)?;
                serde_json::to_vec(&self.handle_pull(authorization, request)?)
            }
            other => return Err(ServerError::UnknownRoute(other.to_string())),
        };
        encoded.map_err(|e| ServerError::Internal(e.to_string()))
    }

    /// Issues a bearer token for a device.
    pub fn issue_token(&self, device_id: DeviceId) -> ServerResult<String> {
        self.context.issue_token(device_id)
    }

    /// Replaces the signing secret, invalidating every issued token.
    pub fn rotate_secret(&self, secret: Vec<u8>) {
        self.context.rotate_secret(secret);
    }

    /// Writes an entity directly, as another client's accepted write would.
    pub fn put_entity(&self, entity: Entity) -> u64 {
        self.context.store.put(entity)
    }

    /// Latest state of an entity.
    pub fn entity(&self, kind: EntityKind, id: EntityId) -> Option<Entity> {
        self.context.store.get(kind, id)
    }

    /// Number of stored entities, tombstones included.
    pub fn entity_count(&self) -> usize {
        self.context.store.len()
    }

    /// Current write sequence.
    pub fn sequence(&self) -> u64 {
        self.context.store.sequence()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }
}
