//! Engine states, counters and per-cycle reports.

use rollcall_protocol::{EntityId, EntityKind, MergeRule};
use std::fmt;
use std::time::{Duration, Instant};

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Not syncing.
    Idle,
    /// Sending pending change-log entries.
    Pushing,
    /// Fetching remote changes past the watermark.
    Pulling,
    /// Applying merges, then committing acknowledgements and watermark.
    Resolving,
    /// The last call could not reach the remote; waiting to retry.
    Offline,
}

impl SyncState {
    /// Returns true while a cycle is running.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Pushing | SyncState::Pulling | SyncState::Resolving
        )
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Idle => "idle",
            SyncState::Pushing => "pushing",
            SyncState::Pulling => "pulling",
            SyncState::Resolving => "resolving",
            SyncState::Offline => "offline",
        };
        f.write_str(name)
    }
}

/// Counters across the engine's lifetime.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Cycles that ran to the end.
    pub cycles_completed: u64,
    /// Entries the remote accepted.
    pub entries_pushed: u64,
    /// Entities received from pulls.
    pub entities_pulled: u64,
    /// Conflicts resolved (merges and no-ops).
    pub conflicts_resolved: u64,
    /// Entries and entities set aside as invalid.
    pub quarantined: u64,
    /// Retries made by `sync_with_retry`.
    pub retries: u64,
    /// Failed cycles since the last success.
    pub consecutive_failures: u32,
    /// Raised once `consecutive_failures` reaches the configured threshold.
    pub last_sync_failed: bool,
    /// Backoff to wait before the next attempt, after a retryable failure.
    pub next_delay: Option<Duration>,
    /// Last successful cycle.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// How one conflict was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictRecord {
    /// Entity type.
    pub kind: EntityKind,
    /// Id the merge landed on.
    pub id: EntityId,
    /// Rule that decided it, when a merge was computed.
    pub rule: Option<MergeRule>,
    /// Whether a merge entry was appended for the next push.
    pub logged: bool,
}

/// Something the engine refused to apply or the remote refused to take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quarantined {
    /// Local change-log position, for refused pushes.
    pub local_seq: Option<u64>,
    /// Entity type, when known.
    pub kind: Option<EntityKind>,
    /// Entity id as received, when there was one.
    pub id: Option<String>,
    /// Why.
    pub reason: String,
}

/// Result of one sync cycle.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Entries sent.
    pub pushed: usize,
    /// Entries the remote accepted.
    pub accepted: usize,
    /// Entries the remote refused.
    pub rejected: usize,
    /// Entities received.
    pub pulled: usize,
    /// Entities written as received.
    pub applied: usize,
    /// Conflicts settled in `Resolving`.
    pub conflicts: Vec<ConflictRecord>,
    /// Entries re-logged as creates after the remote reported them missing.
    pub relogged: usize,
    /// Items set aside this cycle.
    pub quarantined: Vec<Quarantined>,
    /// Watermark after the cycle.
    pub watermark: u64,
    /// Wall time of the cycle.
    pub duration: Duration,
}

/// Snapshot for a status line in the UI.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    /// Current state.
    pub state: SyncState,
    /// Halted after an auth failure.
    pub halted: bool,
    /// Unacknowledged change-log entries.
    pub pending: usize,
    /// Lifetime counters.
    pub stats: SyncStats,
}
