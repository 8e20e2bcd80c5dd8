//! # Rollcall Sync Server
//!
//! Reference remote for the Rollcall push/pull contract.
//!
//! This crate provides:
//! - `POST /sync/push` and `POST /sync/pull` with JSON bodies
//! - A shared entity store with a global write sequence for pull watermarks
//! - Per-entry push checks: base version, missing entities, duplicate
//!   attendance triples and payload validation
//! - Bearer tokens signed with HMAC-SHA256
//!
//! The server is transport-agnostic: [`SyncServer::handle_http`] takes a
//! path, the `Authorization` header and a body, and returns a status and a
//! body, so it can sit behind any HTTP front end or be called in-process.
//!
//! # Authentication
//!
//! ```rust
//! use rollcall_protocol::DeviceId;
//! use rollcall_sync_server::{ServerConfig, SyncServer};
//!
//! let server = SyncServer::new(ServerConfig::default().with_auth(b"secret".to_vec()));
//! let token = server.issue_token(DeviceId::generate()).unwrap();
//! let header = format!("Bearer {token}");
//! let reply = server.handle_http("/sync/pull", Some(&header), br#"{"watermark":0,"limit":10}"#);
//! assert_eq!(reply.status, 200);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod handler;
mod server;
mod store;

pub use auth::{bearer_token, AuthConfig, TokenValidator};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use server::{HttpReply, SyncServer, PULL_PATH, PUSH_PATH};
pub use store::RemoteStore;
