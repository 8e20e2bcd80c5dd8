//! Validation errors.

use crate::id::EntityId;
use crate::kind::EntityKind;
use thiserror::Error;

/// Result type for protocol-level checks.
pub type ProtocolResult<T> = Result<T, ValidationError>;

/// A write that must be refused before it is logged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is empty.
    #[error("{kind}: missing required field '{field}'")]
    MissingField {
        /// Entity type.
        kind: EntityKind,
        /// Wire name of the field.
        field: &'static str,
    },

    /// A date field is not a `YYYY-MM-DD` calendar date.
    #[error("{kind}: field '{field}' is not a YYYY-MM-DD date: '{value}'")]
    InvalidDate {
        /// Entity type.
        kind: EntityKind,
        /// Wire name of the field.
        field: &'static str,
        /// Offending value.
        value: String,
    },

    /// Another live attendance record holds the same student, class and date.
    #[error("attendance already recorded for this student, class and date (existing {existing})")]
    DuplicateAttendance {
        /// Id of the record holding the reservation.
        existing: EntityId,
    },

    /// The payload does not belong to the table it was written to.
    #[error("payload of type {actual} written as {expected}")]
    KindMismatch {
        /// Table the write targeted.
        expected: EntityKind,
        /// Type of the payload.
        actual: EntityKind,
    },

    /// The entity is a tombstone and cannot be edited.
    #[error("{kind} {id} is deleted")]
    Deleted {
        /// Entity type.
        kind: EntityKind,
        /// Entity id.
        id: EntityId,
    },
}
