//! Change-log entries.

use crate::clock::LogicalTimestamp;
use crate::entity::Entity;
use crate::id::EntityId;
use crate::kind::EntityKind;
use crate::payload::Payload;
use serde::{Deserialize, Serialize};

/// What a change did to its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    /// The entity came into existence.
    Create,
    /// Fields were replaced.
    Update,
    /// The entity became a tombstone.
    Delete,
}

/// Who produced a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrigin {
    /// A user action on this device.
    #[default]
    Local,
    /// The outcome of conflict resolution.
    Merge,
}

/// One local mutation, appended before the entity store is touched and
/// replicated to the remote on the next push.
///
/// Entries are immutable once appended. `local_seq` strictly increases per
/// device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeLogEntry {
    /// Position in the device's change log.
    pub local_seq: u64,
    /// Entity type.
    pub entity_type: EntityKind,
    /// Entity id.
    pub entity_id: EntityId,
    /// Kind of mutation.
    pub op: ChangeOp,
    /// Version the mutation was made against (0 for a create).
    pub base_version: u64,
    /// Version the mutation produced.
    pub version: u64,
    /// Timestamp of the mutation.
    pub updated_at: LogicalTimestamp,
    /// Fields after the mutation. A delete carries the last fields.
    pub new_payload: Payload,
    /// Who produced the entry.
    #[serde(default)]
    pub origin: ChangeOrigin,
}

impl ChangeLogEntry {
    /// Builds the entry describing the write that produced `entity`.
    ///
    /// `local_seq` is left at zero; the change log assigns it on append.
    #[must_use]
    pub fn for_write(op: ChangeOp, base_version: u64, entity: &Entity, origin: ChangeOrigin) -> Self {
        Self {
            local_seq: 0,
            entity_type: entity.kind(),
            entity_id: entity.id,
            op,
            base_version,
            version: entity.version,
            updated_at: entity.updated_at,
            new_payload: entity.payload.clone(),
            origin,
        }
    }

    /// The entity state this entry produces.
    #[must_use]
    pub fn to_entity(&self) -> Entity {
        Entity {
            id: self.entity_id,
            version: self.version,
            updated_at: self.updated_at,
            deleted: self.op == ChangeOp::Delete,
            payload: self.new_payload.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::DeviceId;
    use crate::payload::Class;

    fn class_entity() -> Entity {
        Entity::created(
            EntityId::new(),
            Payload::Class(Class {
                name: "Lambs".into(),
                age_group: "3-4".into(),
                teacher_ids: vec![],
                schedule: None,
                room: None,
            }),
            LogicalTimestamp::new(4, DeviceId::from_bytes([2; 16])),
        )
    }

    #[test]
    fn entry_materializes_the_written_entity() {
        let entity = class_entity();
        let entry = ChangeLogEntry::for_write(ChangeOp::Create, 0, &entity, ChangeOrigin::Local);
        assert_eq!(entry.to_entity(), entity);
        assert_eq!(entry.entity_type, EntityKind::Class);
    }

    #[test]
    fn delete_entry_materializes_a_tombstone() {
        let entity = class_entity();
        let gone = entity.tombstoned(LogicalTimestamp::new(5, DeviceId::from_bytes([2; 16])));
        let entry = ChangeLogEntry::for_write(ChangeOp::Delete, 1, &gone, ChangeOrigin::Local);
        let back = entry.to_entity();
        assert!(back.deleted);
        assert_eq!(back.version, 2);
    }

    #[test]
    fn origin_defaults_to_local_on_the_wire() {
        let entity = class_entity();
        let entry = ChangeLogEntry::for_write(ChangeOp::Create, 0, &entity, ChangeOrigin::Merge);
        let mut json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["origin"], "merge");
        json.as_object_mut().unwrap().remove("origin");
        let back: ChangeLogEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back.origin, ChangeOrigin::Local);
    }
}
