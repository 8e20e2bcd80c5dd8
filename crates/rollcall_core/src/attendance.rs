//! Attendance uniqueness index.
//!
//! Maps each `(student, class, date)` triple to the one live attendance
//! record holding it. Lives beside the entity store and is rebuilt from the
//! attendance table on open.

use parking_lot::RwLock;
use rollcall_protocol::{AttendanceKey, Entity, EntityId};
use std::collections::HashMap;

/// Outcome of [`AttendanceIndex::check_and_reserve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// The triple is now held by the requesting record.
    Reserved,
    /// Another live record already holds the triple.
    Conflict(EntityId),
}

/// Triple-to-record index for live attendance records.
#[derive(Debug, Default)]
pub struct AttendanceIndex {
    keys: RwLock<HashMap<AttendanceKey, EntityId>>,
}

impl AttendanceIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `key` for `id` unless a different record holds it.
    ///
    /// Reserving a key already held by `id` succeeds.
    pub fn check_and_reserve(&self, key: &AttendanceKey, id: EntityId) -> Reservation {
        let mut keys = self.keys.write();
        match keys.get(key) {
            Some(existing) if *existing != id => Reservation::Conflict(*existing),
            Some(_) => Reservation::Reserved,
            None => {
                keys.insert(key.clone(), id);
                Reservation::Reserved
            }
        }
    }

    /// Releases `key` if `id` holds it.
    pub fn release(&self, key: &AttendanceKey, id: EntityId) -> bool {
        let mut keys = self.keys.write();
        if keys.get(key) == Some(&id) {
            keys.remove(key);
            true
        } else {
            false
        }
    }

    /// Points `key` at `id`, replacing any holder.
    pub fn assign(&self, key: AttendanceKey, id: EntityId) -> Option<EntityId> {
        self.keys.write().insert(key, id).filter(|old| *old != id)
    }

    /// The record holding `key`, if any.
    #[must_use]
    pub fn lookup(&self, key: &AttendanceKey) -> Option<EntityId> {
        self.keys.read().get(key).copied()
    }

    /// Replaces the index with the keys of the live records in `entities`.
    ///
    /// Returns the ids that lost their triple to an earlier record, which
    /// only happens if two live records share a triple on disk.
    pub fn rebuild<'a, I>(&self, entities: I) -> Vec<EntityId>
    where
        I: IntoIterator<Item = &'a Entity>,
    {
        let mut keys = HashMap::new();
        let mut duplicates = Vec::new();
        for entity in entities {
            if let Some(key) = entity.attendance_key() {
                if keys.contains_key(&key) {
                    duplicates.push(entity.id);
                } else {
                    keys.insert(key, entity.id);
                }
            }
        }
        *self.keys.write() = keys;
        duplicates
    }

    /// Number of reserved triples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    /// Whether no triple is reserved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }
}
