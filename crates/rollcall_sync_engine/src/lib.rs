//! # Rollcall Sync Engine
//!
//! Keeps a device replica in step with the remote.
//!
//! This crate provides:
//! - The sync state machine (idle → pushing → pulling → resolving → idle,
//!   plus offline)
//! - Per-entry handling of push rejections and pull conflicts through the
//!   conflict resolver
//! - Retry with capped exponential backoff and full jitter
//! - The transport contract, a scripted mock, and an HTTP/JSON transport
//!   over a pluggable HTTP client
//! - A tokio auto-sync driver
//!
//! ## Key Invariants
//!
//! - One cycle at a time per engine
//! - Acknowledgements and the remote watermark are committed together at
//!   the end of a cycle; an interrupted cycle re-pushes the same entries
//! - Applying the same pull twice is the same as applying it once
//! - A 401 halts sync until the app re-authenticates and resumes

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod http;
mod scheduler;
mod state;
mod transport;

pub use config::{RetryConfig, SyncConfig};
pub use engine::{AuthSignal, CancelHandle, SyncEngine};
pub use error::{ErrorKind, SyncError, SyncResult};
pub use http::{
    HttpClient, HttpFailure, HttpResponse, HttpTransport, LoopbackClient, LoopbackServer,
    StaticToken, TokenProvider,
};
pub use scheduler::{AutoSync, AutoSyncExit};
pub use state::{ConflictRecord, Quarantined, SyncReport, SyncState, SyncStats, SyncStatus};
pub use transport::{MockFailure, MockTransport, PulledPage, SyncTransport};
