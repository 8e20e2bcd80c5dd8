//! Remote entity store.
//!
//! The store keeps the latest state of every entity plus a global write
//! sequence. Each accepted write moves the entity to a new sequence number;
//! a pull returns entities whose sequence is past the caller's watermark.

use parking_lot::RwLock;
use rollcall_protocol::{
    AttendanceKey, ChangeLogEntry, ChangeOp, DeviceId, Entity, EntityId, EntityKind,
    PullResponse, PushRequest, PushResponse, RejectReason, Rejection,
};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

type Key = (EntityKind, EntityId);

#[derive(Debug, Clone)]
struct Row {
    entity: Entity,
    seq: u64,
}

#[derive(Default)]
struct Inner {
    rows: HashMap<Key, Row>,
    order: BTreeMap<u64, Key>,
    attendance: HashMap<AttendanceKey, EntityId>,
    /// Outcome of every entry seen, by sender and `local_seq`; `None` means
    /// accepted.
    applied: HashMap<(DeviceId, u64), Option<RejectReason>>,
    sequence: u64,
}

/// Authoritative entity state shared by all devices.
#[derive(Default)]
pub struct RemoteStore {
    inner: RwLock<Inner>,
}

impl RemoteStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current write sequence.
    pub fn sequence(&self) -> u64 {
        self.inner.read().sequence
    }

    /// Number of stored entities, tombstones included.
    pub fn len(&self) -> usize {
        self.inner.read().rows.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Latest state of an entity.
    pub fn get(&self, kind: EntityKind, id: EntityId) -> Option<Entity> {
        self.inner
            .read()
            .rows
            .get(&(kind, id))
            .map(|row| row.entity.clone())
    }

    /// Writes an entity directly, bypassing push checks. Returns its
    /// sequence number.
    pub fn put(&self, entity: Entity) -> u64 {
        self.inner.write().write(entity)
    }

    /// Applies a push batch entry by entry.
    ///
    /// An entry already seen from the same device gets the outcome it got
    /// the first time, so a re-pushed batch is harmless.
    pub fn apply_push(&self, request: &PushRequest) -> PushResponse {
        let mut inner = self.inner.write();
        let mut response = PushResponse::default();

        for entry in &request.entries {
            let seen = (request.device_id, entry.local_seq);
            let outcome = match inner.applied.get(&seen) {
                Some(previous) => previous.clone(),
                None => {
                    let outcome = inner.check(entry).err();
                    if outcome.is_none() {
                        inner.write(entry.to_entity());
                    }
                    inner.applied.insert(seen, outcome.clone());
                    outcome
                }
            };

            match outcome {
                None => response.accepted.push(entry.local_seq),
                Some(reason) => {
                    warn!(
                        device = %request.device_id,
                        local_seq = entry.local_seq,
                        kind = %entry.entity_type,
                        id = %entry.entity_id,
                        ?reason,
                        "rejected entry"
                    );
                    let server_entity = inner.server_view(entry, &reason);
                    response
                        .rejected
                        .push(Rejection::new(entry.local_seq, reason, server_entity));
                }
            }
        }
        debug!(
            device = %request.device_id,
            accepted = response.accepted.len(),
            rejected = response.rejected.len(),
            "applied push"
        );
        response
    }

    /// Entities written after `watermark`, oldest write first.
    pub fn changes_since(&self, watermark: u64, limit: u32) -> PullResponse {
        let inner = self.inner.read();
        let mut new_watermark = watermark;
        let entities: Vec<Entity> = inner
            .order
            .range(watermark.saturating_add(1)..)
            .take(limit as usize)
            .filter_map(|(seq, key)| {
                new_watermark = *seq;
                inner.rows.get(key).map(|row| row.entity.clone())
            })
            .collect();
        let has_more = inner
            .order
            .range(new_watermark.saturating_add(1)..)
            .next()
            .is_some();
        PullResponse::new(entities, new_watermark, has_more)
    }
}

impl Inner {
    fn check(&self, entry: &ChangeLogEntry) -> Result<(), RejectReason> {
        if entry.new_payload.kind() != entry.entity_type {
            return Err(invalid(format!(
                "payload is {} but entry is {}",
                entry.new_payload.kind(),
                entry.entity_type
            )));
        }
        if entry.op != ChangeOp::Delete {
            entry
                .new_payload
                .validate()
                .map_err(|e| invalid(e.to_string()))?;
        }
        if entry.version <= entry.base_version {
            return Err(invalid(format!(
                "version {} does not advance base {}",
                entry.version, entry.base_version
            )));
        }

        let current = self.rows.get(&(entry.entity_type, entry.entity_id));
        match (entry.op, current) {
            (ChangeOp::Create, Some(_)) => return Err(RejectReason::VersionConflict),
            (ChangeOp::Create, None) => {}
            (ChangeOp::Update | ChangeOp::Delete, None) => return Err(RejectReason::NotFound),
            (ChangeOp::Update | ChangeOp::Delete, Some(row)) => {
                if row.entity.version != entry.base_version {
                    return Err(RejectReason::VersionConflict);
                }
            }
        }

        if let Some(holder) = self.holder_of(entry) {
            if holder != entry.entity_id {
                return Err(RejectReason::Duplicate);
            }
        }
        Ok(())
    }

    fn holder_of(&self, entry: &ChangeLogEntry) -> Option<EntityId> {
        if entry.op == ChangeOp::Delete {
            return None;
        }
        let key = entry.new_payload.as_attendance()?.key();
        self.attendance.get(&key).copied()
    }

    fn server_view(&self, entry: &ChangeLogEntry, reason: &RejectReason) -> Option<Entity> {
        let id = match reason {
            RejectReason::Duplicate => self.holder_of(entry)?,
            _ => entry.entity_id,
        };
        self.rows
            .get(&(entry.entity_type, id))
            .map(|row| row.entity.clone())
    }

    fn write(&mut self, entity: Entity) -> u64 {
        self.sequence += 1;
        let seq = self.sequence;
        let key = (entity.kind(), entity.id);

        if let Some(old) = self.rows.get(&key) {
            self.order.remove(&old.seq);
            if let Some(old_key) = old.entity.attendance_key() {
                if self.attendance.get(&old_key) == Some(&entity.id) {
                    self.attendance.remove(&old_key);
                }
            }
        }
        if let Some(new_key) = entity.attendance_key() {
            self.attendance.insert(new_key, entity.id);
        }
        debug!(kind = %key.0, id = %entity.id, version = entity.version, seq, "stored entity");
        self.order.insert(seq, key);
        self.rows.insert(key, Row { entity, seq });
        seq
    }
}

fn invalid(message: String) -> RejectReason {
    RejectReason::Invalid { message }
}
