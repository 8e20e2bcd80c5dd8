//! Background auto-sync on a tokio runtime.

use crate::engine::SyncEngine;
use crate::error::{ErrorKind, SyncError};
use crate::transport::SyncTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Why an [`AutoSync`] task stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoSyncExit {
    /// [`AutoSync::shutdown`] was called.
    Shutdown,
    /// The remote refused the credentials; the engine is halted.
    AuthExpired,
    /// The replica failed.
    StorageFailure(String),
    /// A cycle panicked.
    Panicked,
}

/// Runs sync cycles on an interval and on demand.
///
/// Each cycle runs on the blocking pool. After a retryable failure the
/// task waits the engine's backoff delay instead of the interval; it stops
/// on auth expiry or storage failure.
pub struct AutoSync {
    trigger: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<AutoSyncExit>,
}

impl AutoSync {
    /// Spawns the driver on the current tokio runtime. The first cycle
    /// starts immediately.
    pub fn spawn<T>(engine: Arc<SyncEngine<T>>, interval: Duration) -> Self
    where
        T: SyncTransport + 'static,
    {
        let trigger = Arc::new(Notify::new());
        let (shutdown, stop) = watch::channel(false);
        let task = tokio::spawn(drive(engine, interval, Arc::clone(&trigger), stop));
        Self {
            trigger,
            shutdown,
            task,
        }
    }

    /// Asks for a cycle now. A request made while a cycle runs starts
    /// another one right after it.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Whether the task has stopped on its own.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the driver after the current cycle and returns why it ended.
    pub async fn shutdown(self) -> AutoSyncExit {
        // Fails only when the task already ended and dropped its receiver.
        self.shutdown.send(true).ok();
        self.join().await
    }

    /// Waits for the task to end on its own.
    pub async fn join(self) -> AutoSyncExit {
        self.task.await.unwrap_or(AutoSyncExit::Panicked)
    }
}

async fn drive<T>(
    engine: Arc<SyncEngine<T>>,
    interval: Duration,
    trigger: Arc<Notify>,
    mut stop: watch::Receiver<bool>,
) -> AutoSyncExit
where
    T: SyncTransport + 'static,
{
    info!(?interval, "auto-sync started");
    loop {
        if *stop.borrow() {
            return AutoSyncExit::Shutdown;
        }

        let cycle = Arc::clone(&engine);
        let outcome = match tokio::task::spawn_blocking(move || cycle.sync()).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "sync cycle panicked");
                return AutoSyncExit::Panicked;
            }
        };

        let delay = match outcome {
            Ok(_) | Err(SyncError::AlreadySyncing) | Err(SyncError::Cancelled) => interval,
            Err(err) => match err.kind() {
                Some(ErrorKind::AuthExpired) => {
                    warn!("auto-sync stopped: authorization expired");
                    return AutoSyncExit::AuthExpired;
                }
                Some(ErrorKind::StorageFailure) => {
                    warn!(error = %err, "auto-sync stopped: storage failure");
                    return AutoSyncExit::StorageFailure(err.to_string());
                }
                _ => engine.stats().next_delay.unwrap_or(interval),
            },
        };

        debug!(?delay, "auto-sync waiting");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = trigger.notified() => debug!("auto-sync triggered"),
            _ = stop.changed() => return AutoSyncExit::Shutdown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::transport::{MockFailure, MockTransport};
    use rollcall_core::Replica;
    use rollcall_protocol::{Class, Payload};

    fn engine() -> Arc<SyncEngine<MockTransport>> {
        let replica = Arc::new(Replica::open_in_memory().unwrap());
        let config = SyncConfig::new(replica.device_id(), "mock://");
        Arc::new(SyncEngine::new(config, replica, MockTransport::new()))
    }

    async fn wait_for(mut done: impl FnMut() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn runs_at_start_and_on_trigger() {
        let engine = engine();
        let auto = AutoSync::spawn(Arc::clone(&engine), Duration::from_secs(3600));
        wait_for(|| engine.stats().cycles_completed == 1).await;

        engine
            .replica()
            .create(Payload::Class(Class {
                name: "Lambs".into(),
                age_group: "3-4".into(),
                teacher_ids: vec![],
                schedule: None,
                room: None,
            }))
            .unwrap();
        auto.trigger();
        wait_for(|| engine.stats().cycles_completed >= 2).await;
        assert_eq!(engine.replica().changelog().pending_count(), 0);

        assert_eq!(auto.shutdown().await, AutoSyncExit::Shutdown);
    }

    #[tokio::test]
    async fn stops_when_authorization_expires() {
        let engine = engine();
        engine.transport().set_failure(Some(MockFailure::Unauthorized));
        let auto = AutoSync::spawn(Arc::clone(&engine), Duration::from_millis(5));
        assert_eq!(auto.join().await, AutoSyncExit::AuthExpired);
        assert!(engine.is_halted());
    }

    #[tokio::test]
    async fn shutdown_after_exit_reports_the_original_reason() {
        let engine = engine();
        engine.transport().set_failure(Some(MockFailure::Unauthorized));
        let auto = AutoSync::spawn(Arc::clone(&engine), Duration::from_millis(5));
        wait_for(|| auto.is_finished()).await;
        assert_eq!(auto.shutdown().await, AutoSyncExit::AuthExpired);
    }

    #[tokio::test]
    async fn keeps_retrying_while_offline() {
        let engine = engine();
        engine.transport().set_failure(Some(MockFailure::Offline));
        let auto = AutoSync::spawn(Arc::clone(&engine), Duration::from_secs(3600));
        wait_for(|| engine.stats().consecutive_failures >= 1).await;
        assert!(!auto.is_finished());

        engine.transport().set_failure(None);
        auto.trigger();
        wait_for(|| engine.stats().cycles_completed == 1).await;
        assert_eq!(auto.shutdown().await, AutoSyncExit::Shutdown);
    }
}
