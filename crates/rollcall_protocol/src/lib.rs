//! # Rollcall Protocol
//!
//! Domain and wire types shared by the device replica, the sync engine and
//! the remote store:
//!
//! - [`Entity`], the versioned envelope around every roster record
//! - [`Payload`] and the per-type schemas ([`Student`], [`Class`],
//!   [`AttendanceRecord`], [`LessonPlan`], [`Event`]) with required-field
//!   validation
//! - [`ChangeLogEntry`], one local mutation waiting to be replicated
//! - [`LogicalTimestamp`] and [`LamportClock`] for deterministic ordering
//! - push/pull request and response messages
//! - [`resolve`], the pure per-type merge policy
//!
//! This crate performs no I/O.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod clock;
mod entity;
mod error;
mod id;
mod kind;
mod messages;
mod payload;
mod resolver;

pub use change::{ChangeLogEntry, ChangeOp, ChangeOrigin};
pub use clock::{LamportClock, LogicalTimestamp};
pub use entity::Entity;
pub use error::{ProtocolResult, ValidationError};
pub use id::{DeviceId, EntityId};
pub use kind::EntityKind;
pub use messages::{
    PullRequest, PullResponse, PushRequest, PushResponse, RejectReason, Rejection,
};
pub use payload::{
    is_calendar_date, AttendanceKey, AttendanceRecord, Class, Event, LessonPlan, Payload, Student,
};
pub use resolver::{resolve, resolve_detailed, MergeRule, Resolution, Side};
