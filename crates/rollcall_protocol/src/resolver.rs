//! Conflict resolution.
//!
//! [`resolve`] is a pure function of its inputs: no clock reads, no I/O.
//! The merged entity's timestamp is derived from the two inputs, so every
//! replica resolving the same pair computes the same entity.
//!
//! The one argument-order dependence is the id. When the two sides carry
//! different ids the result takes the remote's, so the device that pushes
//! the merge collapses its own record onto the one the server already
//! holds. Every other field is symmetric.

use crate::clock::LogicalTimestamp;
use crate::entity::Entity;
use crate::kind::EntityKind;
use crate::payload::{AttendanceRecord, Payload};
use std::cmp::Ordering;

/// Which input a resolution kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The device's version.
    Local,
    /// The remote's version.
    Remote,
}

/// The policy that decided a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeRule {
    /// Both sides carry the same write.
    Identical,
    /// Both sides are tombstones.
    BothDeleted,
    /// Attendance delete against update.
    DeleteWins,
    /// Attendance records that differ only in `present`.
    PresenceOnly,
    /// Most recent `updated_at`, ties broken by origin device.
    LastWriterWins,
}

/// Outcome of [`resolve_detailed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The entity both replicas converge on.
    pub entity: Entity,
    /// Rule that fired.
    pub rule: MergeRule,
    /// Input whose fields survived.
    pub winner: Side,
}

impl Resolution {
    /// Whether the outcome needs no new write.
    ///
    /// No-op resolutions are not appended to the change log.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        matches!(self.rule, MergeRule::Identical | MergeRule::BothDeleted)
    }
}

/// Resolves diverged `local` and `remote` versions of one entity.
#[must_use]
pub fn resolve(kind: EntityKind, local: &Entity, remote: &Entity) -> Entity {
    resolve_detailed(kind, local, remote).entity
}

/// Resolves a conflict and reports how.
///
/// - identical writes resolve to themselves;
/// - delete against delete keeps the later tombstone unchanged;
/// - for attendance, a delete beats an update;
/// - otherwise the later `updated_at` wins.
///
/// Any other outcome is a merge: `version` is one past the larger input,
/// the counter one past the larger input counter, stamped with the
/// winner's origin. A merge of two different ids (attendance records
/// created independently for the same triple) keeps the remote id.
#[must_use]
pub fn resolve_detailed(kind: EntityKind, local: &Entity, remote: &Entity) -> Resolution {
    if local == remote {
        return Resolution {
            entity: remote.clone(),
            rule: MergeRule::Identical,
            winner: Side::Remote,
        };
    }

    if local.deleted && remote.deleted {
        let (winner, side) = later(local, remote);
        return Resolution {
            entity: Entity {
                id: remote.id,
                ..winner.clone()
            },
            rule: MergeRule::BothDeleted,
            winner: side,
        };
    }

    let (winner, side, rule) = if kind == EntityKind::Attendance && local.deleted != remote.deleted {
        if local.deleted {
            (local, Side::Local, MergeRule::DeleteWins)
        } else {
            (remote, Side::Remote, MergeRule::DeleteWins)
        }
    } else {
        let (winner, side) = later(local, remote);
        let rule = if presence_only(&local.payload, &remote.payload) {
            MergeRule::PresenceOnly
        } else {
            MergeRule::LastWriterWins
        };
        (winner, side, rule)
    };

    let counter = local.updated_at.counter.max(remote.updated_at.counter) + 1;
    Resolution {
        entity: Entity {
            id: remote.id,
            version: local.version.max(remote.version) + 1,
            updated_at: LogicalTimestamp::new(counter, winner.updated_at.origin),
            deleted: winner.deleted,
            payload: winner.payload.clone(),
        },
        rule,
        winner: side,
    }
}

/// The later of two writes by `(updated_at, version, deleted)`.
///
/// A full tie can only come from one device writing two states under the
/// same counter; the remote is kept.
fn later<'a>(local: &'a Entity, remote: &'a Entity) -> (&'a Entity, Side) {
    let key = |e: &Entity| (e.updated_at, e.version, e.deleted);
    match key(local).cmp(&key(remote)) {
        Ordering::Greater => (local, Side::Local),
        Ordering::Less | Ordering::Equal => (remote, Side::Remote),
    }
}

fn presence_only(local: &Payload, remote: &Payload) -> bool {
    match (local, remote) {
        (Payload::Attendance(a), Payload::Attendance(b)) => {
            a.present != b.present
                && AttendanceRecord {
                    present: b.present,
                    ..a.clone()
                } == *b
        }
        _ => false,
    }
}
