//! The device replica.
//!
//! [`Replica`] ties the entity store, the change log, the attendance index
//! and the sync metadata together behind the write contract the rest of
//! the system relies on:
//!
//! 1. validate the payload (and, for attendance creates, reserve the triple)
//! 2. append a change-log entry
//! 3. write the entity store
//!
//! A crash between 2 and 3 is repaired on the next open by rolling the
//! unacknowledged log entries forward into the store.

use crate::attendance::{AttendanceIndex, Reservation};
use crate::changelog::ChangeLog;
use crate::config::ReplicaConfig;
use crate::dir::ReplicaDir;
use crate::error::{CoreError, CoreResult};
use crate::meta::SyncMeta;
use crate::store::{EntityStore, WriteMode};
use parking_lot::{Mutex, MutexGuard};
use rollcall_protocol::{
    AttendanceKey, ChangeLogEntry, ChangeOp, ChangeOrigin, DeviceId, Entity, EntityId, EntityKind,
    LamportClock, LogicalTimestamp, Payload, ValidationError,
};
use rollcall_storage::{FileBackend, InMemoryBackend, RecordLog, StorageBackend};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Result of [`Replica::collect_garbage`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Tombstones hard-removed.
    pub purged: usize,
    /// Tables whose logs were rewritten.
    pub compacted_tables: usize,
    /// Bytes reclaimed by compaction.
    pub reclaimed_bytes: u64,
}

/// A local-first replica of the roster.
pub struct Replica {
    pub(crate) dir: Option<ReplicaDir>,
    pub(crate) config: ReplicaConfig,
    pub(crate) store: EntityStore,
    pub(crate) changelog: ChangeLog,
    pub(crate) index: AttendanceIndex,
    pub(crate) meta: Mutex<SyncMeta>,
    pub(crate) clock: Mutex<LamportClock>,
    writers: [Mutex<()>; 5],
}

impl Replica {
    /// Opens (or creates) a replica in `path` with default configuration.
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, ReplicaConfig::default())
    }

    /// Opens (or creates) a replica in `path`.
    ///
    /// # Errors
    ///
    /// `Locked` if another process has the replica open, `InvalidFormat` if
    /// the directory or its metadata is unusable, and storage errors.
    pub fn open_with_config(path: &Path, config: ReplicaConfig) -> CoreResult<Self> {
        let dir = ReplicaDir::open(path, config.create_if_missing)?;
        let meta = match dir.load_meta()? {
            Some(meta) => meta,
            None => {
                let meta = SyncMeta::fresh();
                dir.save_meta(&meta)?;
                info!(device = %meta.device_id, path = %path.display(), "initialized replica");
                meta
            }
        };

        let store = EntityStore::open(
            |kind| {
                let backend = FileBackend::open(&dir.table_path(kind))?;
                Ok(Box::new(backend) as Box<dyn StorageBackend>)
            },
            config.sync_on_write,
        )?;
        let changelog = ChangeLog::open(RecordLog::new(
            Box::new(FileBackend::open(&dir.changelog_path())?),
            config.sync_on_write,
        ))?;

        Self::assemble(Some(dir), config, meta, store, changelog)
    }

    /// Creates an ephemeral replica with a fresh device id.
    pub fn open_in_memory() -> CoreResult<Self> {
        let config = ReplicaConfig::default();
        let store = EntityStore::open(
            |_| Ok(Box::new(InMemoryBackend::new()) as Box<dyn StorageBackend>),
            false,
        )?;
        let changelog = ChangeLog::open(RecordLog::new(Box::new(InMemoryBackend::new()), false))?;
        Self::assemble(None, config, SyncMeta::fresh(), store, changelog)
    }

    fn assemble(
        dir: Option<ReplicaDir>,
        config: ReplicaConfig,
        meta: SyncMeta,
        store: EntityStore,
        changelog: ChangeLog,
    ) -> CoreResult<Self> {
        let mut high_water = meta.lamport;
        for kind in EntityKind::ALL {
            for entity in store.list_with_tombstones(kind) {
                high_water = high_water.max(entity.updated_at.counter);
            }
        }
        for entry in changelog.entries_since(changelog.last_acknowledged()) {
            high_water = high_water.max(entry.updated_at.counter);
        }

        let replica = Self {
            dir,
            config,
            store,
            changelog,
            index: AttendanceIndex::new(),
            clock: Mutex::new(LamportClock::resume(meta.device_id, high_water)),
            meta: Mutex::new(meta),
            writers: std::array::from_fn(|_| Mutex::new(())),
        };
        replica.recover()?;
        Ok(replica)
    }

    /// Rolls unacknowledged change-log entries forward into the store and
    /// rebuilds the attendance index.
    fn recover(&self) -> CoreResult<()> {
        let mut rolled = 0usize;
        for entry in self
            .changelog
            .entries_since(self.changelog.last_acknowledged())
        {
            if entry.version > self.store.version_of(entry.entity_type, entry.entity_id) {
                self.store.put(entry.to_entity(), WriteMode::RemoteOverride)?;
                rolled += 1;
                debug!(
                    local_seq = entry.local_seq,
                    kind = %entry.entity_type,
                    id = %entry.entity_id,
                    version = entry.version,
                    "rolled change forward"
                );
            }
        }

        let collapsed = self.collapse_duplicate_attendance()?;
        let attendance = self.store.list(EntityKind::Attendance, |_| true);
        self.index.rebuild(&attendance);

        if rolled > 0 || collapsed > 0 {
            info!(rolled, collapsed, "recovered replica");
        }
        Ok(())
    }

    /// Purges all but the most recently written record of each triple held
    /// by more than one live attendance record. A merge that collapsed a
    /// local duplicate and crashed before purging it leaves such pairs.
    fn collapse_duplicate_attendance(&self) -> CoreResult<usize> {
        let mut holders: HashMap<AttendanceKey, Vec<Entity>> = HashMap::new();
        for entity in self.store.list(EntityKind::Attendance, |_| true) {
            if let Some(key) = entity.attendance_key() {
                holders.entry(key).or_default().push(entity);
            }
        }

        let mut purged = 0;
        for (_, mut records) in holders.into_iter().filter(|(_, v)| v.len() > 1) {
            records.sort_by_key(|e| (e.updated_at, e.version));
            records.pop();
            for loser in records {
                warn!(id = %loser.id, "purging duplicate attendance record");
                self.store.purge(EntityKind::Attendance, loser.id)?;
                purged += 1;
            }
        }
        Ok(purged)
    }

    /// This replica's device id.
    #[must_use]
    pub fn device_id(&self) -> DeviceId {
        self.meta.lock().device_id
    }

    /// The replica directory, if persistent.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(ReplicaDir::path)
    }

    /// The entity store.
    #[must_use]
    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    /// The change log.
    #[must_use]
    pub fn changelog(&self) -> &ChangeLog {
        &self.changelog
    }

    /// The attendance uniqueness index.
    #[must_use]
    pub fn attendance_index(&self) -> &AttendanceIndex {
        &self.index
    }

    /// Returns an entity, tombstones included.
    #[must_use]
    pub fn get(&self, kind: EntityKind, id: EntityId) -> Option<Entity> {
        self.store.get(kind, id)
    }

    /// Live entities of a type matching `predicate`.
    pub fn list<P>(&self, kind: EntityKind, predicate: P) -> Vec<Entity>
    where
        P: FnMut(&Entity) -> bool,
    {
        self.store.list(kind, predicate)
    }

    pub(crate) fn writer(&self, kind: EntityKind) -> MutexGuard<'_, ()> {
        self.writers[kind.index()].lock()
    }

    pub(crate) fn tick(&self) -> LogicalTimestamp {
        self.clock.lock().tick()
    }

    /// Creates an entity from `payload`.
    ///
    /// # Errors
    ///
    /// `Validation` if a required field is missing or, for attendance, the
    /// triple is already held by a live record. Nothing is logged then.
    pub fn create(&self, payload: Payload) -> CoreResult<Entity> {
        payload.validate()?;
        let _writer = self.writer(payload.kind());
        self.create_locked(EntityId::new(), payload)
    }

    pub(crate) fn create_locked(&self, id: EntityId, payload: Payload) -> CoreResult<Entity> {
        let kind = payload.kind();
        let key = payload.as_attendance().map(|record| record.key());
        if let Some(key) = &key {
            if let Reservation::Conflict(existing) = self.index.check_and_reserve(key, id) {
                debug!(%existing, date = %key.date, "refused duplicate attendance");
                return Err(ValidationError::DuplicateAttendance { existing }.into());
            }
        }

        let entity = Entity::created(id, payload, self.tick());
        let entry = ChangeLogEntry::for_write(ChangeOp::Create, 0, &entity, ChangeOrigin::Local);
        if let Err(e) = self.changelog.append(entry) {
            if let Some(key) = &key {
                self.index.release(key, id);
            }
            return Err(e);
        }
        self.store
            .put(entity.clone(), WriteMode::Local { base_version: 0 })?;
        info!(%kind, %id, "created entity");
        Ok(entity)
    }

    /// Replaces the fields of a live entity.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Validation` for a tombstone, a kind mismatch, missing
    /// fields, or an attendance edit that moves onto a held triple.
    pub fn update(&self, kind: EntityKind, id: EntityId, payload: Payload) -> CoreResult<Entity> {
        payload.validate()?;
        if payload.kind() != kind {
            return Err(ValidationError::KindMismatch {
                expected: kind,
                actual: payload.kind(),
            }
            .into());
        }
        let _writer = self.writer(kind);
        self.update_locked(kind, id, payload)
    }

    pub(crate) fn update_locked(
        &self,
        kind: EntityKind,
        id: EntityId,
        payload: Payload,
    ) -> CoreResult<Entity> {
        let current = self
            .store
            .get(kind, id)
            .ok_or(CoreError::NotFound { kind, id })?;
        if current.deleted {
            return Err(ValidationError::Deleted { kind, id }.into());
        }

        let old_key = current.attendance_key();
        let new_key = payload.as_attendance().map(|record| record.key());
        let moved = new_key.is_some() && new_key != old_key;
        if let (true, Some(key)) = (moved, &new_key) {
            if let Reservation::Conflict(existing) = self.index.check_and_reserve(key, id) {
                return Err(ValidationError::DuplicateAttendance { existing }.into());
            }
        }

        let entity = current.revised(payload, self.tick());
        let entry =
            ChangeLogEntry::for_write(ChangeOp::Update, current.version, &entity, ChangeOrigin::Local);
        if let Err(e) = self.changelog.append(entry) {
            if let (true, Some(key)) = (moved, &new_key) {
                self.index.release(key, id);
            }
            return Err(e);
        }
        self.store.put(
            entity.clone(),
            WriteMode::Local {
                base_version: current.version,
            },
        )?;
        if let (true, Some(key)) = (moved, &old_key) {
            self.index.release(key, id);
        }
        debug!(%kind, %id, version = entity.version, "updated entity");
        Ok(entity)
    }

    /// Soft-deletes an entity. Deleting a tombstone returns it unchanged.
    pub fn delete(&self, kind: EntityKind, id: EntityId) -> CoreResult<Entity> {
        let _writer = self.writer(kind);
        let current = self
            .store
            .get(kind, id)
            .ok_or(CoreError::NotFound { kind, id })?;
        if current.deleted {
            return Ok(current);
        }

        let entity = current.tombstoned(self.tick());
        let entry =
            ChangeLogEntry::for_write(ChangeOp::Delete, current.version, &entity, ChangeOrigin::Local);
        self.changelog.append(entry)?;
        self.store.put(
            entity.clone(),
            WriteMode::Local {
                base_version: current.version,
            },
        )?;
        if let Some(key) = current.attendance_key() {
            self.index.release(&key, id);
        }
        info!(%kind, %id, version = entity.version, "deleted entity");
        Ok(entity)
    }

    /// Purges tombstones whose deletes the remote has acknowledged, then
    /// compacts tables with enough superseded records.
    pub fn collect_garbage(&self) -> CoreResult<GcReport> {
        let mut report = GcReport::default();
        for kind in EntityKind::ALL {
            let _writer = self.writer(kind);
            let mut purged_here = 0;
            for entity in self.store.list_with_tombstones(kind) {
                if !entity.deleted || !self.changelog.pending_for(kind, entity.id).is_empty() {
                    continue;
                }
                if self.store.purge(kind, entity.id)? {
                    purged_here += 1;
                }
            }
            report.purged += purged_here;

            let dead = self.store.dead_records(kind);
            if dead > 0 && (purged_here > 0 || dead >= self.config.compaction_threshold) {
                report.reclaimed_bytes += self.store.compact(kind)?;
                report.compacted_tables += 1;
            }
        }
        info!(
            purged = report.purged,
            compacted = report.compacted_tables,
            reclaimed = report.reclaimed_bytes,
            "collected garbage"
        );
        Ok(report)
    }

    /// Persists the metadata, if this replica is on disk.
    pub(crate) fn save_meta(&self, meta: &SyncMeta) -> CoreResult<()> {
        match &self.dir {
            Some(dir) => dir.save_meta(meta),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Replica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replica")
            .field("path", &self.path())
            .field("device_id", &self.device_id())
            .field("store", &self.store)
            .field("changelog", &self.changelog)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_protocol::{AttendanceRecord, Class, Student};
    use tempfile::tempdir;

    fn class_payload(name: &str) -> Payload {
        Payload::Class(Class {
            name: name.into(),
            age_group: "5-7".into(),
            teacher_ids: vec![],
            schedule: None,
            room: None,
        })
    }

    fn attendance(student: EntityId, class: EntityId, present: bool) -> Payload {
        Payload::Attendance(AttendanceRecord {
            student_id: student,
            class_id: class,
            date: "2024-06-01".into(),
            present,
            notes: None,
        })
    }

    #[test]
    fn create_logs_then_stores() {
        let replica = Replica::open_in_memory().unwrap();
        let entity = replica.create(class_payload("Lambs")).unwrap();
        assert_eq!(entity.version, 1);
        assert_eq!(replica.get(EntityKind::Class, entity.id), Some(entity.clone()));

        let pending = replica.changelog().pending(10);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].op, ChangeOp::Create);
        assert_eq!(pending[0].base_version, 0);
        assert_eq!(pending[0].to_entity(), entity);
    }

    #[test]
    fn invalid_payload_never_reaches_the_log() {
        let replica = Replica::open_in_memory().unwrap();
        let err = replica.create(class_payload("")).unwrap_err();
        assert!(matches!(err, CoreError::Validation(ValidationError::MissingField { .. })));
        assert!(replica.changelog().is_empty());
    }

    #[test]
    fn duplicate_attendance_is_refused_before_logging() {
        let replica = Replica::open_in_memory().unwrap();
        let (s, c) = (EntityId::new(), EntityId::new());
        let first = replica.create(attendance(s, c, true)).unwrap();
        let err = replica.create(attendance(s, c, false)).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Validation(ValidationError::DuplicateAttendance { existing }) if existing == first.id
        ));
        assert_eq!(replica.changelog().len(), 1);
    }

    #[test]
    fn update_and_delete_bump_versions() {
        let replica = Replica::open_in_memory().unwrap();
        let v1 = replica.create(class_payload("Lambs")).unwrap();
        let v2 = replica
            .update(EntityKind::Class, v1.id, class_payload("Lions"))
            .unwrap();
        let v3 = replica.delete(EntityKind::Class, v1.id).unwrap();
        assert_eq!((v2.version, v3.version), (2, 3));
        assert!(v3.deleted);
        assert!(v3.updated_at > v2.updated_at);

        let again = replica.delete(EntityKind::Class, v1.id).unwrap();
        assert_eq!(again, v3);
        assert_eq!(replica.changelog().len(), 3);

        let err = replica
            .update(EntityKind::Class, v1.id, class_payload("Bears"))
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(ValidationError::Deleted { .. })));
    }

    #[test]
    fn update_rejects_kind_mismatch_and_unknown_ids() {
        let replica = Replica::open_in_memory().unwrap();
        let class = replica.create(class_payload("Lambs")).unwrap();
        let student = Payload::Student(Student {
            first_name: "Ann".into(),
            last_name: "Lee".into(),
            date_of_birth: "2018-02-03".into(),
            class_id: class.id,
            parent_ids: vec![],
            photo_url: None,
            notes: None,
        });
        assert!(matches!(
            replica.update(EntityKind::Class, class.id, student),
            Err(CoreError::Validation(ValidationError::KindMismatch { .. }))
        ));
        assert!(matches!(
            replica.update(EntityKind::Class, EntityId::new(), class_payload("X")),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[test]
    fn deleting_attendance_frees_the_triple() {
        let replica = Replica::open_in_memory().unwrap();
        let (s, c) = (EntityId::new(), EntityId::new());
        let first = replica.create(attendance(s, c, true)).unwrap();
        replica.delete(EntityKind::Attendance, first.id).unwrap();
        let second = replica.create(attendance(s, c, false)).unwrap();
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn editing_onto_a_held_triple_is_refused() {
        let replica = Replica::open_in_memory().unwrap();
        let (s1, s2, c) = (EntityId::new(), EntityId::new(), EntityId::new());
        replica.create(attendance(s1, c, true)).unwrap();
        let other = replica.create(attendance(s2, c, true)).unwrap();
        let err = replica
            .update(EntityKind::Attendance, other.id, attendance(s1, c, false))
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Validation(ValidationError::DuplicateAttendance { .. })
        ));
        replica
            .update(EntityKind::Attendance, other.id, attendance(s2, c, false))
            .unwrap();
    }

    #[test]
    fn reopen_keeps_device_and_data() {
        let temp = tempdir().unwrap();
        let (device, id) = {
            let replica = Replica::open(temp.path()).unwrap();
            let entity = replica.create(class_payload("Lambs")).unwrap();
            (replica.device_id(), entity.id)
        };
        let replica = Replica::open(temp.path()).unwrap();
        assert_eq!(replica.device_id(), device);
        assert!(replica.get(EntityKind::Class, id).is_some());
        let next = replica.create(class_payload("Lions")).unwrap();
        assert!(next.updated_at.counter > 1);
    }

    #[test]
    fn open_is_exclusive() {
        let temp = tempdir().unwrap();
        let _first = Replica::open(temp.path()).unwrap();
        assert!(matches!(Replica::open(temp.path()), Err(CoreError::Locked)));
    }

    #[test]
    fn gc_purges_acknowledged_tombstones_only() {
        let replica = Replica::open_in_memory().unwrap();
        let synced = replica.create(class_payload("Lambs")).unwrap();
        replica.delete(EntityKind::Class, synced.id).unwrap();
        replica.changelog().acknowledge(2).unwrap();

        let unsynced = replica.create(class_payload("Lions")).unwrap();
        replica.delete(EntityKind::Class, unsynced.id).unwrap();

        let report = replica.collect_garbage().unwrap();
        assert_eq!(report.purged, 1);
        assert_eq!(report.compacted_tables, 1);
        assert!(replica.get(EntityKind::Class, synced.id).is_none());
        assert!(replica.get(EntityKind::Class, unsynced.id).is_some());
    }
}
