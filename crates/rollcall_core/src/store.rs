//! The entity store.
//!
//! One table per [`EntityKind`]. Each table keeps its live map in memory
//! and persists every write as a record in its own [`RecordLog`] before
//! the map is touched, so a write that returned `Ok` survives a crash.

use crate::codec::{from_cbor, to_cbor};
use crate::error::{CoreError, CoreResult};
use parking_lot::RwLock;
use rollcall_protocol::{Entity, EntityId, EntityKind};
use rollcall_storage::{RecordLog, StorageBackend};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// How [`EntityStore::put`] checks the incoming version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// A write made against `base_version` (0 when creating). Fails with
    /// `VersionConflict` if the stored version differs, and with
    /// `StaleVersion` unless the new version is greater.
    Local {
        /// Version the write was made against.
        base_version: u64,
    },
    /// A remote-forced override; no version checks.
    RemoteOverride,
}

#[derive(Debug, Deserialize)]
enum TableRecord {
    Put(Entity),
    Purge(EntityId),
}

/// Borrowing twin of [`TableRecord`] with the same encoding.
#[derive(Serialize)]
enum TableRecordRef<'a> {
    Put(&'a Entity),
    Purge(EntityId),
}

struct Table {
    entities: RwLock<HashMap<EntityId, Entity>>,
    log: RecordLog,
    records: RwLock<usize>,
}

impl Table {
    fn open(kind: EntityKind, log: RecordLog) -> CoreResult<Self> {
        let replay = log.replay()?;
        let mut entities = HashMap::new();
        for bytes in &replay.records {
            match from_cbor::<TableRecord>(bytes)? {
                TableRecord::Put(entity) => {
                    if entity.kind() != kind {
                        return Err(CoreError::invalid_format(format!(
                            "{} record found in {kind} table",
                            entity.kind()
                        )));
                    }
                    entities.insert(entity.id, entity);
                }
                TableRecord::Purge(id) => {
                    entities.remove(&id);
                }
            }
        }
        debug!(%kind, entities = entities.len(), records = replay.records.len(), "loaded table");
        Ok(Self {
            entities: RwLock::new(entities),
            log,
            records: RwLock::new(replay.records.len()),
        })
    }
}

/// Per-type tables of entities.
///
/// Reads take a shared lock on one table. Writes are persisted first and
/// then applied to the map under the table's exclusive lock. Callers that
/// need read-check-write atomicity across the store, the change log and
/// the attendance index serialize through [`crate::Replica`]'s per-type
/// writer locks.
pub struct EntityStore {
    tables: Vec<Table>,
}

impl EntityStore {
    /// Opens the store, one backend per entity type in
    /// [`EntityKind::ALL`] order, replaying each table log.
    pub fn open<F>(mut backend_for: F, sync_on_write: bool) -> CoreResult<Self>
    where
        F: FnMut(EntityKind) -> CoreResult<Box<dyn StorageBackend>>,
    {
        let tables = EntityKind::ALL
            .into_iter()
            .map(|kind| {
                let log = RecordLog::new(backend_for(kind)?, sync_on_write);
                Table::open(kind, log)
            })
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(Self { tables })
    }

    fn table(&self, kind: EntityKind) -> &Table {
        &self.tables[kind.index()]
    }

    /// Returns an entity, tombstones included.
    #[must_use]
    pub fn get(&self, kind: EntityKind, id: EntityId) -> Option<Entity> {
        self.table(kind).entities.read().get(&id).cloned()
    }

    /// Current version of an entity, 0 if absent.
    #[must_use]
    pub fn version_of(&self, kind: EntityKind, id: EntityId) -> u64 {
        self.table(kind)
            .entities
            .read()
            .get(&id)
            .map_or(0, |e| e.version)
    }

    /// Upserts an entity.
    ///
    /// The record is appended and flushed before the in-memory table
    /// changes; on any error the table is left as it was.
    pub fn put(&self, entity: Entity, mode: WriteMode) -> CoreResult<()> {
        let kind = entity.kind();
        let table = self.table(kind);
        let mut entities = table.entities.write();
        let stored = entities.get(&entity.id).map_or(0, |e| e.version);

        if let WriteMode::Local { base_version } = mode {
            if stored != base_version {
                return Err(CoreError::VersionConflict {
                    kind,
                    id: entity.id,
                    expected: base_version,
                    actual: stored,
                });
            }
            if entity.version <= stored {
                return Err(CoreError::StaleVersion {
                    kind,
                    id: entity.id,
                    stored,
                    attempted: entity.version,
                });
            }
        }

        let bytes = to_cbor(&TableRecordRef::Put(&entity))?;
        {
            let mut writer = table.log.writer();
            writer.append(&bytes)?;
            writer.commit()?;
        }
        *table.records.write() += 1;

        debug!(%kind, id = %entity.id, version = entity.version, deleted = entity.deleted, "put entity");
        entities.insert(entity.id, entity);
        Ok(())
    }

    /// Hard-removes an entity. Returns whether it existed.
    pub fn purge(&self, kind: EntityKind, id: EntityId) -> CoreResult<bool> {
        let table = self.table(kind);
        let mut entities = table.entities.write();
        if !entities.contains_key(&id) {
            return Ok(false);
        }
        table.log.append(&to_cbor(&TableRecordRef::Purge(id))?)?;
        *table.records.write() += 1;
        entities.remove(&id);
        debug!(%kind, %id, "purged entity");
        Ok(true)
    }

    /// Live entities matching `predicate`, ordered by id.
    pub fn list<P>(&self, kind: EntityKind, mut predicate: P) -> Vec<Entity>
    where
        P: FnMut(&Entity) -> bool,
    {
        let mut out: Vec<Entity> = self
            .table(kind)
            .entities
            .read()
            .values()
            .filter(|e| e.is_live() && predicate(e))
            .cloned()
            .collect();
        out.sort_by_key(|e| e.id);
        out
    }

    /// Every entity including tombstones, ordered by id.
    #[must_use]
    pub fn list_with_tombstones(&self, kind: EntityKind) -> Vec<Entity> {
        let mut out: Vec<Entity> = self.table(kind).entities.read().values().cloned().collect();
        out.sort_by_key(|e| e.id);
        out
    }

    /// Number of entities (tombstones included) in a table.
    #[must_use]
    pub fn len(&self, kind: EntityKind) -> usize {
        self.table(kind).entities.read().len()
    }

    /// Whether every table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.iter().all(|t| t.entities.read().is_empty())
    }

    /// Records in a table log that no longer describe current state.
    #[must_use]
    pub fn dead_records(&self, kind: EntityKind) -> usize {
        let table = self.table(kind);
        let live = table.entities.read().len();
        table.records.read().saturating_sub(live)
    }

    /// Rewrites a table log to one record per stored entity.
    ///
    /// Returns the number of bytes reclaimed.
    pub fn compact(&self, kind: EntityKind) -> CoreResult<u64> {
        let table = self.table(kind);
        let entities = table.entities.write();
        let before = table.log.size()?;

        let mut sorted: Vec<&Entity> = entities.values().collect();
        sorted.sort_by_key(|e| e.id);
        let encoded = sorted
            .into_iter()
            .map(|e| to_cbor(&TableRecordRef::Put(e)))
            .collect::<CoreResult<Vec<_>>>()?;

        table.log.rewrite(encoded.iter().map(Vec::as_slice))?;
        *table.records.write() = encoded.len();

        let after = table.log.size()?;
        let reclaimed = before.saturating_sub(after);
        info!(%kind, records = encoded.len(), reclaimed, "compacted table");
        Ok(reclaimed)
    }
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("EntityStore");
        for kind in EntityKind::ALL {
            s.field(kind.as_str(), &self.len(kind));
        }
        s.finish()
    }
}
