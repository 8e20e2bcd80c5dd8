//! Replica operations used by the sync engine.
//!
//! All of them take the per-type writer lock, so they interleave safely
//! with UI writes.

use crate::error::CoreResult;
use crate::replica::Replica;
use crate::store::WriteMode;
use rollcall_protocol::{
    resolve_detailed, ChangeLogEntry, ChangeOp, ChangeOrigin, Entity, EntityId, EntityKind,
    MergeRule,
};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// What [`Replica::apply_remote`] did with a pulled entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteApply {
    /// Written to the store as-is.
    Applied,
    /// Already known locally; nothing written.
    Skipped,
    /// Diverged from local state; needs resolution against `local_id`.
    Conflict {
        /// The local record the remote entity conflicts with.
        local_id: EntityId,
    },
}

/// What [`Replica::resolve_conflict`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A merged entity was written and logged for the next push.
    Merged {
        /// The written entity.
        entity: Entity,
        /// The merge entry's position in the change log.
        local_seq: u64,
        /// Rule that decided the merge.
        rule: MergeRule,
    },
    /// The sides already agree; nothing was logged.
    Noop,
    /// The local record no longer exists; the remote was taken as-is.
    TookRemote,
}

/// The version local and remote last agreed on for an entity with pending
/// entries: the base of the latest merge entry, else of the earliest entry.
#[must_use]
pub fn common_ancestor(pending: &[ChangeLogEntry]) -> u64 {
    pending
        .iter()
        .rev()
        .find(|e| e.origin == ChangeOrigin::Merge)
        .or_else(|| pending.first())
        .map_or(0, |e| e.base_version)
}

impl Replica {
    /// Applies one pulled entity.
    ///
    /// `settled` holds the `local_seq`s the remote accepted during the
    /// current cycle; they no longer count as local divergence even though
    /// their acknowledgement is not yet committed.
    ///
    /// - pending local changes and `remote.version` past their common
    ///   ancestor: conflict
    /// - a live attendance record of another id holding the same triple:
    ///   conflict against that record
    /// - otherwise the remote wins if its version is newer; equal or older
    ///   versions are skipped, so applying a batch twice is harmless
    pub fn apply_remote(&self, remote: &Entity, settled: &BTreeSet<u64>) -> CoreResult<RemoteApply> {
        let kind = remote.kind();
        let _writer = self.writer(kind);
        self.clock.lock().observe(&remote.updated_at);

        let pending: Vec<ChangeLogEntry> = self
            .changelog
            .pending_for(kind, remote.id)
            .into_iter()
            .filter(|e| !settled.contains(&e.local_seq))
            .collect();
        if !pending.is_empty() {
            let ancestor = common_ancestor(&pending);
            if remote.version > ancestor {
                debug!(%kind, id = %remote.id, ancestor, remote_version = remote.version, "pull conflict");
                return Ok(RemoteApply::Conflict {
                    local_id: remote.id,
                });
            }
            return Ok(RemoteApply::Skipped);
        }

        if let Some(key) = remote.attendance_key() {
            if let Some(holder) = self.index.lookup(&key) {
                if holder != remote.id {
                    debug!(local = %holder, remote = %remote.id, "attendance triple held locally");
                    return Ok(RemoteApply::Conflict { local_id: holder });
                }
            }
        }

        let previous = self.store.get(kind, remote.id);
        if previous.as_ref().map_or(0, |e| e.version) >= remote.version {
            return Ok(RemoteApply::Skipped);
        }
        self.store.put(remote.clone(), WriteMode::RemoteOverride)?;
        self.reindex(previous.as_ref(), remote);
        debug!(%kind, id = %remote.id, version = remote.version, "applied remote entity");
        Ok(RemoteApply::Applied)
    }

    /// Resolves `remote` against the current local record `local_id`.
    ///
    /// The resolver runs against the record as it is now, so UI writes made
    /// since the conflict was detected take part. A non-noop merge is
    /// appended to the change log with the remote version as its base, then
    /// written to the store. When the ids differ (an attendance triple
    /// created on two devices) the local record is purged and the merge
    /// lands on the remote id.
    ///
    /// For a cross-id conflict the holder of the remote's triple is looked
    /// up again, since an earlier resolution in the same cycle may have
    /// tombstoned or collapsed the record that held it at pull time. A
    /// triple no longer held by another record takes the remote as-is.
    pub fn resolve_conflict(
        &self,
        kind: EntityKind,
        local_id: EntityId,
        remote: &Entity,
    ) -> CoreResult<MergeOutcome> {
        let _writer = self.writer(kind);
        self.clock.lock().observe(&remote.updated_at);

        let local_id = if local_id == remote.id {
            local_id
        } else {
            match remote.attendance_key().and_then(|key| self.index.lookup(&key)) {
                Some(holder) if holder != remote.id => holder,
                _ => {
                    debug!(%kind, id = %remote.id, stale = %local_id, "triple no longer held locally");
                    self.take_remote(remote)?;
                    return Ok(MergeOutcome::TookRemote);
                }
            }
        };

        let Some(local) = self.store.get(kind, local_id) else {
            self.take_remote(remote)?;
            return Ok(MergeOutcome::TookRemote);
        };

        let resolution = resolve_detailed(kind, &local, remote);
        if resolution.is_noop() {
            let target = resolution.entity;
            let previous = self.store.get(kind, target.id);
            if previous.as_ref().map_or(0, |e| e.version) < target.version {
                self.store.put(target.clone(), WriteMode::RemoteOverride)?;
                self.reindex(previous.as_ref(), &target);
            }
            debug!(%kind, id = %target.id, rule = ?resolution.rule, "conflict needs no merge");
            return Ok(MergeOutcome::Noop);
        }

        let mut merged = resolution.entity;
        let previous = self.store.get(kind, merged.id);
        if let Some(previous) = &previous {
            merged.version = merged.version.max(previous.version + 1);
        }

        let op = if merged.deleted {
            ChangeOp::Delete
        } else {
            ChangeOp::Update
        };
        let entry = ChangeLogEntry::for_write(op, remote.version, &merged, ChangeOrigin::Merge);
        let local_seq = self.changelog.append(entry)?;

        if local.id != merged.id {
            if let Some(key) = local.attendance_key() {
                self.index.release(&key, local.id);
            }
            self.store.purge(kind, local.id)?;
            info!(local = %local.id, remote = %merged.id, "collapsed duplicate record");
        }
        self.store.put(merged.clone(), WriteMode::RemoteOverride)?;
        self.reindex(previous.as_ref(), &merged);
        self.clock.lock().observe(&merged.updated_at);

        info!(
            %kind,
            id = %merged.id,
            version = merged.version,
            rule = ?resolution.rule,
            local_seq,
            "merged conflict"
        );
        Ok(MergeOutcome::Merged {
            entity: merged,
            local_seq,
            rule: resolution.rule,
        })
    }

    /// Logs the current state of an entity the remote reported missing as
    /// a fresh create. Returns the new entry's `local_seq`, or `None` when
    /// there is nothing to send (the entity is gone or a tombstone).
    pub fn relog_as_create(&self, kind: EntityKind, id: EntityId) -> CoreResult<Option<u64>> {
        let _writer = self.writer(kind);
        let Some(local) = self.store.get(kind, id) else {
            return Ok(None);
        };
        if local.deleted {
            return Ok(None);
        }

        let entity = local.revised(local.payload.clone(), self.tick());
        let entry = ChangeLogEntry::for_write(ChangeOp::Create, 0, &entity, ChangeOrigin::Local);
        let seq = self.changelog.append(entry)?;
        self.store.put(
            entity,
            WriteMode::Local {
                base_version: local.version,
            },
        )?;
        info!(%kind, %id, local_seq = seq, "re-logged entity missing on remote");
        Ok(Some(seq))
    }

    /// Commits the outcome of a sync cycle: acknowledges the change log up
    /// to `ack`, then records the remote watermark and clock high-water.
    pub fn commit_sync(&self, ack: Option<u64>, watermark: Option<u64>) -> CoreResult<()> {
        if let Some(seq) = ack {
            self.changelog.acknowledge(seq)?;
        }

        let mut meta = self.meta.lock();
        let lamport = self.clock.lock().last();
        let watermark = watermark.unwrap_or(0).max(meta.remote_watermark);
        if watermark == meta.remote_watermark && lamport <= meta.lamport {
            return Ok(());
        }

        let mut next = meta.clone();
        next.remote_watermark = watermark;
        next.lamport = lamport;
        self.save_meta(&next)?;
        *meta = next;
        debug!(watermark, lamport, "committed sync metadata");
        Ok(())
    }

    /// Last remote watermark fully applied.
    #[must_use]
    pub fn remote_watermark(&self) -> u64 {
        self.meta.lock().remote_watermark
    }

    /// Up to `limit` unacknowledged entries, oldest first.
    #[must_use]
    pub fn pending(&self, limit: usize) -> Vec<ChangeLogEntry> {
        self.changelog.pending(limit)
    }

    /// Writes `remote` unless the stored copy is already as new.
    fn take_remote(&self, remote: &Entity) -> CoreResult<()> {
        let previous = self.store.get(remote.kind(), remote.id);
        if previous.as_ref().map_or(0, |e| e.version) < remote.version {
            self.store.put(remote.clone(), WriteMode::RemoteOverride)?;
            self.reindex(previous.as_ref(), remote);
        }
        Ok(())
    }

    fn reindex(&self, previous: Option<&Entity>, current: &Entity) {
        let new_key = current.attendance_key();
        if let Some(old_key) = previous.and_then(Entity::attendance_key) {
            if Some(&old_key) != new_key.as_ref() {
                self.index.release(&old_key, current.id);
            }
        }
        if let Some(key) = new_key {
            self.index.assign(key, current.id);
        }
    }
}
