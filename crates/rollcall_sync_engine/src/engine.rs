//! The sync state machine.
//!
//! One cycle runs `Pushing → Pulling → Resolving → Idle`:
//!
//! 1. **Pushing**: unacknowledged change-log entries go out in batches.
//!    Accepted entries are remembered as settled; refused ones are resolved
//!    on the spot and queued for `Resolving`.
//! 2. **Pulling**: remote entities past the watermark are applied unless a
//!    local change diverges from them, in which case they are queued.
//! 3. **Resolving**: queued merges, re-logs and quarantines are applied,
//!    then acknowledgements and the new watermark are committed together.
//!
//! Nothing touches the change log or the watermark before `Resolving`, so a
//! cycle cancelled (or killed) earlier leaves both exactly as they were and
//! the next cycle re-pushes the same entries.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::state::{ConflictRecord, Quarantined, SyncReport, SyncState, SyncStats, SyncStatus};
use crate::transport::SyncTransport;
use parking_lot::{Mutex, RwLock};
use rollcall_core::{MergeOutcome, RemoteApply, Replica};
use rollcall_protocol::{
    resolve_detailed, ChangeLogEntry, DeviceId, Entity, EntityId, EntityKind, PullRequest,
    PushRequest, PushResponse, RejectReason, Rejection,
};
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Told when the remote refuses the device's credentials.
pub trait AuthSignal: Send + Sync {
    /// The remote answered 401. Sync stays halted until
    /// [`SyncEngine::resume`] is called.
    fn auth_expired(&self, device_id: DeviceId, reason: &str);
}

/// Requests cancellation of the running cycle from any thread.
///
/// The cycle stops at its next state transition.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Work gathered during a cycle, applied in `Resolving`.
#[derive(Default)]
struct Staged {
    ack: Option<u64>,
    watermark: Option<u64>,
    /// Entries the remote accepted this cycle.
    settled: BTreeSet<u64>,
    /// Remote side of each conflict in arrival order, with the local
    /// record it hit.
    conflicts: Vec<(EntityId, Entity)>,
    /// Position in `conflicts` of each remote entity.
    conflict_slots: HashMap<(EntityKind, EntityId), usize>,
    relogs: Vec<(EntityKind, EntityId)>,
    quarantine: Vec<Quarantined>,
}

impl Staged {
    /// Queues `remote` against `local_id`. Each remote entity is resolved
    /// once, at the highest version seen this cycle.
    fn conflict(&mut self, local_id: EntityId, remote: Entity) {
        match self.conflict_slots.entry((remote.kind(), remote.id)) {
            Entry::Occupied(slot) => {
                let seen = &mut self.conflicts[*slot.get()];
                if remote.version > seen.1.version {
                    *seen = (local_id, remote);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(self.conflicts.len());
                self.conflicts.push((local_id, remote));
            }
        }
    }

    fn quarantine(&mut self, entry: &ChangeLogEntry, reason: String) {
        self.quarantine.push(Quarantined {
            local_seq: Some(entry.local_seq),
            kind: Some(entry.entity_type),
            id: Some(entry.entity_id.to_string()),
            reason,
        });
    }
}

/// The sync engine manages synchronization of one replica with the remote.
pub struct SyncEngine<T: SyncTransport> {
    config: SyncConfig,
    replica: Arc<Replica>,
    transport: T,
    auth: Option<Arc<dyn AuthSignal>>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    cycle: Mutex<()>,
    cancel: CancelHandle,
    halted: AtomicBool,
    quarantine: Mutex<Vec<Quarantined>>,
}

impl<T: SyncTransport> SyncEngine<T> {
    /// Creates a new sync engine.
    pub fn new(mut config: SyncConfig, replica: Arc<Replica>, transport: T) -> Self {
        if config.device_id != replica.device_id() {
            warn!(
                configured = %config.device_id,
                replica = %replica.device_id(),
                "configured device id differs from the replica's; using the replica's"
            );
            config.device_id = replica.device_id();
        }
        Self {
            config,
            replica,
            transport,
            auth: None,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            cycle: Mutex::new(()),
            cancel: CancelHandle::default(),
            halted: AtomicBool::new(false),
            quarantine: Mutex::new(Vec::new()),
        }
    }

    /// Sets the collaborator told about auth failures.
    pub fn with_auth_signal(mut self, auth: Arc<dyn AuthSignal>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Snapshot for the UI.
    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            state: self.state(),
            halted: self.is_halted(),
            pending: self.replica.changelog().pending_count(),
            stats: self.stats(),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the replica.
    pub fn replica(&self) -> &Arc<Replica> {
        &self.replica
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Everything quarantined so far.
    pub fn quarantined(&self) -> Vec<Quarantined> {
        self.quarantine.lock().clone()
    }

    /// Handle for cancelling a running cycle.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Cancels the running cycle at its next state transition.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether sync is halted after an auth failure.
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Lifts an auth halt once the device has fresh credentials.
    pub fn resume(&self) {
        if self.halted.swap(false, Ordering::SeqCst) {
            info!(device = %self.config.device_id, "sync resumed");
        }
    }

    fn set_state(&self, state: SyncState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            debug!(from = %previous, to = %state, "sync state");
        }
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancel.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Runs one cycle.
    ///
    /// Fails with `AlreadySyncing` when another cycle holds the engine and
    /// with `Halted` after an auth failure until [`SyncEngine::resume`].
    pub fn sync(&self) -> SyncResult<SyncReport> {
        let Some(_cycle) = self.cycle.try_lock() else {
            debug!("sync already running");
            return Err(SyncError::AlreadySyncing);
        };
        if self.is_halted() {
            return Err(SyncError::Halted);
        }
        self.cancel.reset();

        let start = Instant::now();
        let mut report = SyncReport::default();
        match self.run_cycle(&mut report) {
            Ok(()) => {
                report.duration = start.elapsed();
                self.record_success(&report);
                Ok(report)
            }
            Err(err) => {
                self.record_failure(&err);
                Err(err)
            }
        }
    }

    /// Runs cycles until one succeeds, a non-retryable error occurs, or the
    /// configured attempts are used up, sleeping the backoff in between.
    pub fn sync_with_retry(&self) -> SyncResult<SyncReport> {
        let retry = &self.config.retry;
        let attempts = retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match self.sync() {
                Ok(report) => return Ok(report),
                Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                    attempt += 1;
                    let delay = retry.delay_for_attempt(attempt);
                    debug!(attempt, ?delay, error = %err, "retrying sync");
                    self.stats.write().retries += 1;
                    std::thread::sleep(delay);
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn run_cycle(&self, report: &mut SyncReport) -> SyncResult<()> {
        let mut staged = Staged::default();

        self.set_state(SyncState::Pushing);
        self.push_all(&mut staged, report)?;
        self.check_cancelled()?;

        self.set_state(SyncState::Pulling);
        self.pull_all(&mut staged, report)?;
        self.check_cancelled()?;

        self.set_state(SyncState::Resolving);
        self.resolve_all(staged, report)?;

        self.set_state(SyncState::Idle);
        Ok(())
    }

    fn push_all(&self, staged: &mut Staged, report: &mut SyncReport) -> SyncResult<()> {
        let changelog = self.replica.changelog();
        let upper = changelog.last_seq();
        let batch_size = self.config.push_batch_size.max(1);
        let mut cursor = changelog.last_acknowledged();

        loop {
            self.check_cancelled()?;
            let batch: Vec<ChangeLogEntry> = changelog
                .entries_since(cursor)
                .into_iter()
                .filter(|e| e.local_seq <= upper)
                .take(batch_size)
                .collect();
            let Some(last) = batch.last().map(|e| e.local_seq) else {
                break;
            };

            let request = PushRequest::new(self.config.device_id, batch);
            debug!(entries = request.entries.len(), last_seq = last, "pushing batch");
            let response = self.transport.push(&request)?;
            self.absorb_push(&request, response, upper, staged, report)?;

            staged.ack = Some(last);
            cursor = last;
        }
        Ok(())
    }

    fn absorb_push(
        &self,
        request: &PushRequest,
        response: PushResponse,
        upper: u64,
        staged: &mut Staged,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let by_seq: HashMap<u64, &ChangeLogEntry> =
            request.entries.iter().map(|e| (e.local_seq, e)).collect();
        let mut answered = BTreeSet::new();

        for seq in response.accepted {
            if by_seq.contains_key(&seq) && answered.insert(seq) {
                staged.settled.insert(seq);
                report.accepted += 1;
            } else {
                warn!(local_seq = seq, "ignoring acceptance of an entry not in the batch");
            }
        }
        for rejection in response.rejected {
            let seq = rejection.local_seq;
            match by_seq.get(&seq) {
                Some(entry) if answered.insert(seq) => {
                    report.rejected += 1;
                    self.handle_rejection(entry, rejection, upper, staged)?;
                }
                _ => warn!(local_seq = seq, "ignoring rejection of an entry not in the batch"),
            }
        }

        if answered.len() != request.entries.len() {
            return Err(SyncError::Protocol(format!(
                "push response answered {} of {} entries",
                answered.len(),
                request.entries.len()
            )));
        }
        report.pushed += request.entries.len();
        Ok(())
    }

    fn handle_rejection(
        &self,
        entry: &ChangeLogEntry,
        rejection: Rejection,
        upper: u64,
        staged: &mut Staged,
    ) -> SyncResult<()> {
        let (kind, id, seq) = (entry.entity_type, entry.entity_id, entry.local_seq);

        if let RejectReason::Invalid { message } = rejection.reason {
            warn!(%kind, %id, local_seq = seq, %message, "remote refused entry as invalid");
            staged.quarantine(entry, message);
            return Ok(());
        }

        let superseded = self
            .replica
            .changelog()
            .pending_for(kind, id)
            .iter()
            .any(|later| later.local_seq > seq && later.local_seq <= upper);
        if superseded {
            debug!(%kind, %id, local_seq = seq, "rejected entry superseded by a later one");
            return Ok(());
        }

        match rejection.reason {
            RejectReason::NotFound => {
                debug!(%kind, %id, local_seq = seq, "remote does not have entity");
                staged.relogs.push((kind, id));
            }
            reason => {
                let remote = match rejection.server_entity {
                    Some(remote) if remote.kind() == kind => remote,
                    other => {
                        let message = match other {
                            Some(remote) => format!("{reason:?} rejection carries a {}", remote.kind()),
                            None => format!("{reason:?} rejection has no server entity"),
                        };
                        warn!(%kind, %id, local_seq = seq, %message, "quarantined unresolvable rejection");
                        staged.quarantine(entry, message);
                        return Ok(());
                    }
                };
                let preview = resolve_detailed(kind, &entry.to_entity(), &remote);
                info!(
                    %kind,
                    %id,
                    local_seq = seq,
                    ?reason,
                    rule = ?preview.rule,
                    winner = ?preview.winner,
                    "push rejected"
                );
                staged.conflict(id, remote);
            }
        }
        Ok(())
    }

    fn pull_all(&self, staged: &mut Staged, report: &mut SyncReport) -> SyncResult<()> {
        let mut watermark = self.replica.remote_watermark();

        loop {
            self.check_cancelled()?;
            let request = PullRequest::new(watermark, self.config.pull_batch_size.max(1));
            let page = self.transport.pull(&request)?;
            staged.quarantine.extend(page.quarantined);
            let response = page.response;
            report.pulled += response.entities.len();

            for remote in response.entities {
                if !remote.deleted {
                    if let Err(err) = remote.payload.validate() {
                        warn!(id = %remote.id, error = %err, "quarantined invalid remote entity");
                        staged.quarantine.push(Quarantined {
                            local_seq: None,
                            kind: Some(remote.kind()),
                            id: Some(remote.id.to_string()),
                            reason: err.to_string(),
                        });
                        continue;
                    }
                }
                match self.replica.apply_remote(&remote, &staged.settled)? {
                    RemoteApply::Applied => report.applied += 1,
                    RemoteApply::Skipped => {}
                    RemoteApply::Conflict { local_id } => {
                        staged.conflict(local_id, remote);
                    }
                }
            }

            if response.new_watermark < watermark {
                return Err(SyncError::Protocol(format!(
                    "watermark went back from {watermark} to {}",
                    response.new_watermark
                )));
            }
            let advanced = response.new_watermark > watermark;
            watermark = response.new_watermark;
            staged.watermark = Some(watermark);
            if !response.has_more {
                break;
            }
            if !advanced {
                return Err(SyncError::Protocol(
                    "remote has more changes but did not advance the watermark".into(),
                ));
            }
        }
        Ok(())
    }

    fn resolve_all(&self, staged: Staged, report: &mut SyncReport) -> SyncResult<()> {
        for (kind, id) in staged.relogs {
            if self.replica.relog_as_create(kind, id)?.is_some() {
                report.relogged += 1;
            }
        }

        for (local_id, remote) in staged.conflicts {
            let kind = remote.kind();
            let record = match self.replica.resolve_conflict(kind, local_id, &remote)? {
                MergeOutcome::Merged { entity, rule, .. } => ConflictRecord {
                    kind,
                    id: entity.id,
                    rule: Some(rule),
                    logged: true,
                },
                MergeOutcome::Noop | MergeOutcome::TookRemote => ConflictRecord {
                    kind,
                    id: remote.id,
                    rule: None,
                    logged: false,
                },
            };
            report.conflicts.push(record);
        }

        self.replica.commit_sync(staged.ack, staged.watermark)?;

        if !staged.quarantine.is_empty() {
            self.quarantine.lock().extend(staged.quarantine.iter().cloned());
        }
        report.quarantined = staged.quarantine;
        report.watermark = self.replica.remote_watermark();
        Ok(())
    }

    fn record_success(&self, report: &SyncReport) {
        let mut stats = self.stats.write();
        stats.cycles_completed += 1;
        stats.entries_pushed += report.accepted as u64;
        stats.entities_pulled += report.pulled as u64;
        stats.conflicts_resolved += report.conflicts.len() as u64;
        stats.quarantined += report.quarantined.len() as u64;
        stats.consecutive_failures = 0;
        stats.last_sync_failed = false;
        stats.next_delay = None;
        stats.last_sync_time = Some(Instant::now());
        stats.last_error = None;
        drop(stats);

        info!(
            pushed = report.pushed,
            rejected = report.rejected,
            pulled = report.pulled,
            conflicts = report.conflicts.len(),
            quarantined = report.quarantined.len(),
            watermark = report.watermark,
            "sync cycle complete"
        );
    }

    fn record_failure(&self, err: &SyncError) {
        if matches!(err, SyncError::Cancelled) {
            info!("sync cancelled");
            self.set_state(SyncState::Idle);
            return;
        }

        let mut stats = self.stats.write();
        stats.consecutive_failures += 1;
        stats.last_sync_failed = stats.consecutive_failures >= self.config.failure_threshold;
        stats.last_error = Some(err.to_string());
        let delay = err
            .is_retryable()
            .then(|| self.config.retry.delay_for_attempt(stats.consecutive_failures));
        stats.next_delay = delay;
        let (failures, raised, delay) = (
            stats.consecutive_failures,
            stats.last_sync_failed,
            stats.next_delay,
        );
        drop(stats);

        if err.is_retryable() {
            warn!(error = %err, failures, last_sync_failed = raised, ?delay, "sync failed; offline");
            self.set_state(SyncState::Offline);
            return;
        }

        self.set_state(SyncState::Idle);
        if let SyncError::AuthExpired(reason) = err {
            self.halted.store(true, Ordering::SeqCst);
            warn!(device = %self.config.device_id, %reason, "authorization expired; sync halted");
            if let Some(auth) = &self.auth {
                auth.auth_expired(self.config.device_id, reason);
            }
        } else {
            warn!(error = %err, kind = ?err.kind(), failures, "sync failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::transport::{MockFailure, MockTransport, PulledPage};
    use rollcall_protocol::{
        AttendanceRecord, ChangeOrigin, Class, LogicalTimestamp, Payload, PullResponse,
    };

    const REMOTE: DeviceId = DeviceId::from_bytes([0xEE; 16]);

    fn class(name: &str) -> Payload {
        Payload::Class(Class {
            name: name.into(),
            age_group: "5-7".into(),
            teacher_ids: vec![],
            schedule: None,
            room: None,
        })
    }

    fn engine() -> SyncEngine<MockTransport> {
        let replica = Arc::new(Replica::open_in_memory().unwrap());
        let config = SyncConfig::new(replica.device_id(), "mock://")
            .with_failure_threshold(2)
            .with_retry(RetryConfig::new(3).with_initial_delay(std::time::Duration::from_millis(1)));
        SyncEngine::new(config, replica, MockTransport::new())
    }

    #[derive(Default)]
    struct RecordingAuth {
        calls: Mutex<Vec<DeviceId>>,
    }

    impl AuthSignal for RecordingAuth {
        fn auth_expired(&self, device_id: DeviceId, _reason: &str) {
            self.calls.lock().push(device_id);
        }
    }

    #[test]
    fn initial_state() {
        let engine = engine();
        assert_eq!(engine.state(), SyncState::Idle);
        assert_eq!(engine.stats().cycles_completed, 0);
        assert!(!engine.is_halted());
    }

    #[test]
    fn clean_cycle_acknowledges_and_commits_watermark() {
        let engine = engine();
        for name in ["A", "B", "C"] {
            engine.replica().create(class(name)).unwrap();
        }
        engine
            .transport()
            .queue_pull(PullResponse::new(vec![], 17, false));

        let report = engine.sync().unwrap();
        assert_eq!(report.pushed, 3);
        assert_eq!(report.accepted, 3);
        assert_eq!(report.watermark, 17);
        assert_eq!(engine.replica().changelog().pending_count(), 0);
        assert_eq!(engine.replica().changelog().last_acknowledged(), 3);
        assert_eq!(engine.state(), SyncState::Idle);
        assert_eq!(engine.stats().cycles_completed, 1);
        assert_eq!(engine.transport().pulls()[0].watermark, 0);
    }

    #[test]
    fn pushes_in_batches() {
        let replica = Arc::new(Replica::open_in_memory().unwrap());
        let config = SyncConfig::new(replica.device_id(), "mock://").with_push_batch_size(2);
        let engine = SyncEngine::new(config, replica, MockTransport::new());
        for name in ["A", "B", "C", "D", "E"] {
            engine.replica().create(class(name)).unwrap();
        }
        engine.sync().unwrap();
        let sizes: Vec<usize> = engine
            .transport()
            .pushes()
            .iter()
            .map(|p| p.entries.len())
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn overlapping_trigger_is_refused() {
        let engine = engine();
        let _running = engine.cycle.lock();
        assert!(matches!(engine.sync(), Err(SyncError::AlreadySyncing)));
    }

    #[test]
    fn offline_keeps_the_batch_and_backs_off() {
        let engine = engine();
        engine.replica().create(class("A")).unwrap();
        engine.transport().set_failure(Some(MockFailure::Offline));

        assert!(engine.sync().is_err());
        assert_eq!(engine.state(), SyncState::Offline);
        assert_eq!(engine.replica().changelog().pending_count(), 1);
        let stats = engine.stats();
        assert_eq!(stats.consecutive_failures, 1);
        assert!(!stats.last_sync_failed);
        assert!(stats.next_delay.is_some());

        engine.transport().set_failure(Some(MockFailure::Timeout));
        assert!(matches!(engine.sync(), Err(SyncError::Timeout)));
        assert!(engine.stats().last_sync_failed);

        engine.transport().set_failure(None);
        engine.sync().unwrap();
        assert_eq!(engine.state(), SyncState::Idle);
        let stats = engine.stats();
        assert_eq!(stats.consecutive_failures, 0);
        assert!(!stats.last_sync_failed);
        assert_eq!(engine.replica().changelog().pending_count(), 0);
        assert_eq!(engine.transport().pushes().len(), 1);
    }

    #[test]
    fn retry_gives_up_after_max_attempts() {
        let engine = engine();
        engine.transport().set_failure(Some(MockFailure::Offline));
        assert!(engine.sync_with_retry().is_err());
        assert_eq!(engine.stats().retries, 2);
        assert_eq!(engine.stats().consecutive_failures, 3);
    }

    #[test]
    fn auth_failure_halts_until_resumed() {
        let auth = Arc::new(RecordingAuth::default());
        let engine = engine().with_auth_signal(auth.clone());
        engine.transport().set_failure(Some(MockFailure::Unauthorized));

        assert!(matches!(engine.sync(), Err(SyncError::AuthExpired(_))));
        assert!(engine.is_halted());
        assert_eq!(auth.calls.lock().as_slice(), &[engine.replica().device_id()]);

        engine.transport().set_failure(None);
        assert!(matches!(engine.sync(), Err(SyncError::Halted)));
        assert!(engine.transport().pulls().is_empty());

        engine.resume();
        engine.sync().unwrap();
        assert!(!engine.is_halted());
    }

    struct CancelOnPush {
        inner: MockTransport,
        handle: Mutex<Option<CancelHandle>>,
    }

    impl SyncTransport for CancelOnPush {
        fn push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
            let response = self.inner.push(request);
            if let Some(handle) = self.handle.lock().as_ref() {
                handle.cancel();
            }
            response
        }

        fn pull(&self, request: &PullRequest) -> SyncResult<PulledPage> {
            self.inner.pull(request)
        }
    }

    #[test]
    fn cancelled_cycle_changes_nothing() {
        let replica = Arc::new(Replica::open_in_memory().unwrap());
        replica.create(class("A")).unwrap();
        let config = SyncConfig::new(replica.device_id(), "mock://");
        let engine = SyncEngine::new(
            config,
            replica,
            CancelOnPush {
                inner: MockTransport::new(),
                handle: Mutex::new(None),
            },
        );
        *engine.transport().handle.lock() = Some(engine.cancel_handle());

        assert!(matches!(engine.sync(), Err(SyncError::Cancelled)));
        assert_eq!(engine.state(), SyncState::Idle);
        assert_eq!(engine.transport().inner.pushes().len(), 1);
        assert!(engine.transport().inner.pulls().is_empty());
        assert_eq!(engine.replica().changelog().last_acknowledged(), 0);
        assert_eq!(engine.replica().remote_watermark(), 0);
        assert_eq!(engine.stats().consecutive_failures, 0);
    }

    #[test]
    fn invalid_rejection_is_quarantined_and_acknowledged() {
        let engine = engine();
        let entity = engine.replica().create(class("A")).unwrap();
        engine.transport().queue_push(PushResponse {
            accepted: vec![],
            rejected: vec![Rejection::new(
                1,
                RejectReason::Invalid {
                    message: "room required".into(),
                },
                None,
            )],
        });

        let report = engine.sync().unwrap();
        assert_eq!(report.rejected, 1);
        assert_eq!(report.quarantined.len(), 1);
        assert_eq!(report.quarantined[0].local_seq, Some(1));
        assert_eq!(engine.quarantined().len(), 1);
        assert_eq!(engine.replica().changelog().pending_count(), 0);
        assert!(engine.replica().get(EntityKind::Class, entity.id).is_some());
    }

    #[test]
    fn not_found_is_relogged_as_create() {
        let engine = engine();
        let entity = engine.replica().create(class("A")).unwrap();
        engine.transport().queue_push(PushResponse {
            accepted: vec![],
            rejected: vec![Rejection::new(1, RejectReason::NotFound, None)],
        });

        let report = engine.sync().unwrap();
        assert_eq!(report.relogged, 1);
        let pending = engine.replica().pending(10);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].entity_id, entity.id);
        assert_eq!(pending[0].base_version, 0);
        assert_eq!(pending[0].origin, ChangeOrigin::Local);
    }

    #[test]
    fn version_conflict_is_merged_and_logged() {
        let engine = engine();
        let local = engine.replica().create(class("Lambs")).unwrap();
        let remote = Entity {
            id: local.id,
            version: 3,
            updated_at: LogicalTimestamp::new(50, REMOTE),
            deleted: false,
            payload: class("Lions"),
        };
        engine.transport().queue_push(PushResponse {
            accepted: vec![],
            rejected: vec![Rejection::new(
                1,
                RejectReason::VersionConflict,
                Some(remote.clone()),
            )],
        });

        let report = engine.sync().unwrap();
        assert_eq!(report.conflicts.len(), 1);
        assert!(report.conflicts[0].logged);
        let merged = engine.replica().get(EntityKind::Class, local.id).unwrap();
        assert_eq!(merged.version, 4);
        assert_eq!(merged.payload, class("Lions"));

        let pending = engine.replica().pending(10);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].origin, ChangeOrigin::Merge);
        assert_eq!(pending[0].base_version, 3);
    }

    #[test]
    fn unresolvable_rejection_does_not_block_the_batch() {
        let engine = engine();
        engine.replica().create(class("A")).unwrap();
        engine.replica().create(class("B")).unwrap();
        engine.replica().create(class("C")).unwrap();
        engine.transport().queue_push(PushResponse {
            accepted: vec![1, 3],
            rejected: vec![Rejection::new(2, RejectReason::VersionConflict, None)],
        });

        let report = engine.sync().unwrap();
        assert_eq!(report.accepted, 2);
        assert_eq!(report.quarantined.len(), 1);
        assert_eq!(report.quarantined[0].local_seq, Some(2));
        assert!(report.conflicts.is_empty());
        assert_eq!(engine.replica().changelog().last_acknowledged(), 3);
        assert_eq!(engine.replica().changelog().pending_count(), 0);
    }

    #[test]
    fn rejection_carrying_another_kind_is_quarantined() {
        let engine = engine();
        engine.replica().create(class("A")).unwrap();
        let stray = Entity::created(
            EntityId::new(),
            Payload::Attendance(AttendanceRecord {
                student_id: EntityId::new(),
                class_id: EntityId::new(),
                date: "2024-06-01".into(),
                present: true,
                notes: None,
            }),
            LogicalTimestamp::new(2, REMOTE),
        );
        engine.transport().queue_push(PushResponse {
            accepted: vec![],
            rejected: vec![Rejection::new(1, RejectReason::VersionConflict, Some(stray))],
        });

        let report = engine.sync().unwrap();
        assert_eq!(report.quarantined.len(), 1);
        assert_eq!(engine.quarantined().len(), 1);
        assert_eq!(engine.replica().changelog().pending_count(), 0);
    }

    #[test]
    fn unanswered_entries_fail_the_cycle() {
        let engine = engine();
        engine.replica().create(class("A")).unwrap();
        engine.replica().create(class("B")).unwrap();
        engine.transport().queue_push(PushResponse {
            accepted: vec![1],
            rejected: vec![],
        });
        assert!(matches!(engine.sync(), Err(SyncError::Protocol(_))));
        assert_eq!(engine.replica().changelog().last_acknowledged(), 0);
    }

    #[test]
    fn invalid_remote_entities_are_quarantined() {
        let engine = engine();
        let good = Entity::created(EntityId::new(), class("Lions"), LogicalTimestamp::new(2, REMOTE));
        let bad = Entity::created(
            EntityId::new(),
            Payload::Attendance(AttendanceRecord {
                student_id: EntityId::new(),
                class_id: EntityId::new(),
                date: "someday".into(),
                present: true,
                notes: None,
            }),
            LogicalTimestamp::new(3, REMOTE),
        );
        engine
            .transport()
            .queue_pull(PullResponse::new(vec![good.clone(), bad.clone()], 2, false));

        let report = engine.sync().unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(report.quarantined.len(), 1);
        assert!(engine.replica().get(EntityKind::Class, good.id).is_some());
        assert!(engine.replica().get(EntityKind::Attendance, bad.id).is_none());
        assert_eq!(engine.replica().remote_watermark(), 2);
    }

    #[test]
    fn pulls_until_no_more() {
        let engine = engine();
        let page = |n: u64, more| {
            let e = Entity::created(EntityId::new(), class("X"), LogicalTimestamp::new(n, REMOTE));
            PullResponse::new(vec![e], n, more)
        };
        engine.transport().queue_pull(page(1, true));
        engine.transport().queue_pull(page(2, true));
        engine.transport().queue_pull(page(3, false));

        let report = engine.sync().unwrap();
        assert_eq!(report.pulled, 3);
        assert_eq!(report.watermark, 3);
        let marks: Vec<u64> = engine.transport().pulls().iter().map(|p| p.watermark).collect();
        assert_eq!(marks, vec![0, 1, 2]);
    }

    #[test]
    fn stalled_paging_is_a_protocol_error() {
        let engine = engine();
        engine
            .transport()
            .queue_pull(PullResponse::new(vec![], 0, true));
        assert!(matches!(engine.sync(), Err(SyncError::Protocol(_))));
    }
}
