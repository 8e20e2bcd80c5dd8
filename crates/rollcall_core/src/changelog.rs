//! The change log.
//!
//! An append-only sequence of [`ChangeLogEntry`] records, ordered by
//! `local_seq`. Acknowledgement is a high-water mark, persisted as its own
//! record; acknowledged entries stay for audit but are no longer pending.

use crate::codec::{from_cbor, to_cbor};
use crate::error::{CoreError, CoreResult};
use parking_lot::RwLock;
use rollcall_protocol::{ChangeLogEntry, EntityId, EntityKind};
use rollcall_storage::RecordLog;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
enum LogRecord {
    Entry(ChangeLogEntry),
    Ack { up_to: u64 },
}

#[derive(Serialize)]
enum LogRecordRef<'a> {
    Entry(&'a ChangeLogEntry),
    Ack { up_to: u64 },
}

#[derive(Debug, Default)]
struct LogState {
    entries: Vec<ChangeLogEntry>,
    acknowledged: u64,
}

impl LogState {
    fn last_seq(&self) -> u64 {
        self.entries.last().map_or(0, |e| e.local_seq)
    }

    /// Index of the first entry with `local_seq > seq`.
    fn position_after(&self, seq: u64) -> usize {
        self.entries.partition_point(|e| e.local_seq <= seq)
    }
}

/// The device's change log.
pub struct ChangeLog {
    log: RecordLog,
    state: RwLock<LogState>,
}

impl ChangeLog {
    /// Opens the change log, replaying entries and acknowledgements.
    pub fn open(log: RecordLog) -> CoreResult<Self> {
        let replay = log.replay()?;
        let mut state = LogState::default();
        for bytes in &replay.records {
            match from_cbor::<LogRecord>(bytes)? {
                LogRecord::Entry(entry) => {
                    if entry.local_seq <= state.last_seq() {
                        return Err(CoreError::invalid_format(format!(
                            "change log out of order: {} after {}",
                            entry.local_seq,
                            state.last_seq()
                        )));
                    }
                    state.entries.push(entry);
                }
                LogRecord::Ack { up_to } => {
                    state.acknowledged = state.acknowledged.max(up_to);
                }
            }
        }
        info!(
            entries = state.entries.len(),
            acknowledged = state.acknowledged,
            "opened change log"
        );
        Ok(Self {
            log,
            state: RwLock::new(state),
        })
    }

    /// Appends an entry, assigning the next `local_seq`, which it returns.
    ///
    /// The entry is flushed before this returns.
    pub fn append(&self, mut entry: ChangeLogEntry) -> CoreResult<u64> {
        let mut state = self.state.write();
        entry.local_seq = state.last_seq() + 1;
        let bytes = to_cbor(&LogRecordRef::Entry(&entry))?;
        {
            let mut writer = self.log.writer();
            writer.append(&bytes)?;
            writer.commit()?;
        }
        let seq = entry.local_seq;
        debug!(
            local_seq = seq,
            kind = %entry.entity_type,
            id = %entry.entity_id,
            op = ?entry.op,
            version = entry.version,
            "appended change"
        );
        state.entries.push(entry);
        Ok(seq)
    }

    /// Entries with `local_seq > seq`, in order.
    #[must_use]
    pub fn entries_since(&self, seq: u64) -> Vec<ChangeLogEntry> {
        let state = self.state.read();
        state.entries[state.position_after(seq)..].to_vec()
    }

    /// Up to `limit` unacknowledged entries, oldest first.
    #[must_use]
    pub fn pending(&self, limit: usize) -> Vec<ChangeLogEntry> {
        let state = self.state.read();
        let start = state.position_after(state.acknowledged);
        state.entries[start..].iter().take(limit).cloned().collect()
    }

    /// Unacknowledged entries for one entity, oldest first.
    #[must_use]
    pub fn pending_for(&self, kind: EntityKind, id: EntityId) -> Vec<ChangeLogEntry> {
        let state = self.state.read();
        let start = state.position_after(state.acknowledged);
        state.entries[start..]
            .iter()
            .filter(|e| e.entity_type == kind && e.entity_id == id)
            .cloned()
            .collect()
    }

    /// Number of unacknowledged entries.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        let state = self.state.read();
        state.entries.len() - state.position_after(state.acknowledged)
    }

    /// Marks every entry up to and including `seq` as synced.
    ///
    /// Acknowledging at or below the current mark is a no-op.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if `seq` is beyond the last appended entry.
    pub fn acknowledge(&self, seq: u64) -> CoreResult<()> {
        let mut state = self.state.write();
        if seq <= state.acknowledged {
            return Ok(());
        }
        if seq > state.last_seq() {
            return Err(CoreError::invalid_operation(format!(
                "cannot acknowledge {seq}: last entry is {}",
                state.last_seq()
            )));
        }
        self.log.append(&to_cbor(&LogRecordRef::Ack { up_to: seq })?)?;
        state.acknowledged = seq;
        debug!(up_to = seq, "acknowledged changes");
        Ok(())
    }

    /// Highest acknowledged `local_seq` (0 if none).
    #[must_use]
    pub fn last_acknowledged(&self) -> u64 {
        self.state.read().acknowledged
    }

    /// Highest assigned `local_seq` (0 if empty).
    #[must_use]
    pub fn last_seq(&self) -> u64 {
        self.state.read().last_seq()
    }

    /// Total number of entries, acknowledged or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Whether the log has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }
}

impl std::fmt::Debug for ChangeLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("ChangeLog")
            .field("entries", &state.entries.len())
            .field("acknowledged", &state.acknowledged)
            .finish()
    }
}
