//! The versioned entity envelope.

use crate::clock::LogicalTimestamp;
use crate::id::EntityId;
use crate::kind::EntityKind;
use crate::payload::{AttendanceKey, Payload};
use serde::{Deserialize, Serialize};

/// A roster record with its replication metadata.
///
/// `id` never changes, `version` only increases, and a tombstone
/// (`deleted == true`) keeps its last payload until garbage collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Stable identifier.
    pub id: EntityId,
    /// Number of accepted mutations.
    pub version: u64,
    /// Timestamp of the last mutation.
    pub updated_at: LogicalTimestamp,
    /// Tombstone flag.
    #[serde(default)]
    pub deleted: bool,
    /// Domain fields.
    pub payload: Payload,
}

impl Entity {
    /// A freshly created entity at version 1.
    #[must_use]
    pub fn created(id: EntityId, payload: Payload, updated_at: LogicalTimestamp) -> Self {
        Self {
            id,
            version: 1,
            updated_at,
            deleted: false,
            payload,
        }
    }

    /// The entity type, taken from the payload.
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        self.payload.kind()
    }

    /// Whether the entity is live (not a tombstone).
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.deleted
    }

    /// The attendance uniqueness key, for live attendance records only.
    #[must_use]
    pub fn attendance_key(&self) -> Option<AttendanceKey> {
        if self.deleted {
            return None;
        }
        self.payload.as_attendance().map(|record| record.key())
    }

    /// The next revision of this entity with new fields.
    #[must_use]
    pub fn revised(&self, payload: Payload, updated_at: LogicalTimestamp) -> Self {
        Self {
            id: self.id,
            version: self.version + 1,
            updated_at,
            deleted: false,
            payload,
        }
    }

    /// The next revision of this entity as a tombstone.
    #[must_use]
    pub fn tombstoned(&self, updated_at: LogicalTimestamp) -> Self {
        Self {
            id: self.id,
            version: self.version + 1,
            updated_at,
            deleted: true,
            payload: self.payload.clone(),
        }
    }
}
