//! # Rollcall Core
//!
//! The device replica: everything a Rollcall device keeps locally so the
//! roster works with no network at all.
//!
//! - [`EntityStore`]: per-type tables of versioned entities, each persisted
//!   as a CRC-framed record log
//! - [`ChangeLog`]: every local mutation in order, until the remote
//!   acknowledges it
//! - [`AttendanceIndex`]: one live attendance record per
//!   `(student, class, date)`
//! - [`Replica`]: the facade that validates, logs, stores and recovers,
//!   plus the hooks the sync engine drives
//!
//! ## Example
//!
//! ```rust
//! use rollcall_core::Replica;
//! use rollcall_protocol::{Class, Payload};
//!
//! let replica = Replica::open_in_memory().unwrap();
//! let class = replica
//!     .create(Payload::Class(Class {
//!         name: "Lambs".into(),
//!         age_group: "3-4".into(),
//!         teacher_ids: vec![],
//!         schedule: None,
//!         room: None,
//!     }))
//!     .unwrap();
//!
//! assert_eq!(class.version, 1);
//! assert_eq!(replica.changelog().pending_count(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod attendance;
mod changelog;
mod codec;
mod config;
mod dir;
mod error;
mod meta;
mod queries;
mod replica;
mod store;
mod sync;

pub use attendance::{AttendanceIndex, Reservation};
pub use changelog::ChangeLog;
pub use config::ReplicaConfig;
pub use dir::ReplicaDir;
pub use error::{CoreError, CoreResult};
pub use meta::{SyncMeta, FORMAT_VERSION};
pub use queries::{AttendanceStats, MarkOutcome, StudentMark, UPCOMING_EVENTS_LIMIT};
pub use replica::{GcReport, Replica};
pub use store::{EntityStore, WriteMode};
pub use sync::{common_ancestor, MergeOutcome, RemoteApply};
