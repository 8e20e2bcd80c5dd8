//! Request handlers for the push and pull endpoints.

use crate::auth::{bearer_token, AuthConfig, TokenValidator};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::store::RemoteStore;
use parking_lot::RwLock;
use rollcall_protocol::{DeviceId, PullRequest, PullResponse, PushRequest, PushResponse};
use std::sync::Arc;
use tracing::debug;

/// State shared by all handlers.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Entity store (shared across all handlers).
    pub store: Arc<RemoteStore>,
    validator: RwLock<Option<TokenValidator>>,
}

impl HandlerContext {
    /// Creates a handler context.
    pub fn new(config: ServerConfig, store: Arc<RemoteStore>) -> Self {
        let validator = config.auth_secret.clone().map(|secret| {
            TokenValidator::new(AuthConfig::new(secret).with_expiry(config.token_expiry))
        });
        Self {
            config,
            store,
            validator: RwLock::new(validator),
        }
    }

    /// Issues a token for a device. Fails when auth is not configured.
    pub fn issue_token(&self, device_id: DeviceId) -> ServerResult<String> {
        self.validator
            .read()
            .as_ref()
            .ok_or_else(|| ServerError::Internal("auth is not configured".into()))?
            .create_token(device_id)
    }

    /// Replaces the signing secret; every token issued before is invalid.
    pub fn rotate_secret(&self, secret: Vec<u8>) {
        let config = AuthConfig::new(secret).with_expiry(self.config.token_expiry);
        *self.validator.write() = Some(TokenValidator::new(config));
    }

    /// Checks the `Authorization` header. Returns the token's device, or
    /// `None` when auth is off.
    fn authorize(&self, header: Option<&str>) -> ServerResult<Option<DeviceId>> {
        if !self.config.require_auth {
            return Ok(None);
        }
        let token = bearer_token(header)?;
        let validator = self.validator.read();
        let validator = validator
            .as_ref()
            .ok_or_else(|| ServerError::Internal("auth required but no secret".into()))?;
        validator.validate_token(token).map(Some)
    }
}

/// Handler for sync requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Handles a pull request.
    pub fn handle_pull(
        &self,
        authorization: Option<&str>,
        request: PullRequest,
    ) -> ServerResult<PullResponse> {
        self.context.authorize(authorization)?;
        let limit = request.limit.min(self.context.config.max_pull_batch).max(1);
        let response = self.context.store.changes_since(request.watermark, limit);
        debug!(
            watermark = request.watermark,
            returned = response.entities.len(),
            new_watermark = response.new_watermark,
            "handled pull"
        );
        Ok(response)
    }

    /// Handles a push request.
    pub fn handle_push(
        &self,
        authorization: Option<&str>,
        request: PushRequest,
    ) -> ServerResult<PushResponse> {
        if let Some(device) = self.context.authorize(authorization)? {
            if device != request.device_id {
                return Err(ServerError::NotAuthorized(format!(
                    "token for {device} used by {}",
                    request.device_id
                )));
            }
        }

        let max = self.context.config.max_push_batch;
        if request.entries.len() > max as usize {
            return Err(ServerError::BatchTooLarge {
                size: request.entries.len(),
                max,
            });
        }
        Ok(self.context.store.apply_push(&request))
    }
}
