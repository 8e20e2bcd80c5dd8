//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use crate::state::Quarantined;
use parking_lot::Mutex;
use rollcall_protocol::{PullRequest, PullResponse, PushRequest, PushResponse};
use std::collections::VecDeque;

/// A pull response plus the entities that could not be decoded.
#[derive(Debug, Clone, Default)]
pub struct PulledPage {
    /// Decoded response.
    pub response: PullResponse,
    /// Entities dropped at decode time.
    pub quarantined: Vec<Quarantined>,
}

impl From<PullResponse> for PulledPage {
    fn from(response: PullResponse) -> Self {
        Self {
            response,
            quarantined: Vec::new(),
        }
    }
}

/// A sync transport carries push and pull calls to the remote.
///
/// Implementations map their failures onto [`SyncError`]: unreachable
/// remote to `NetworkUnavailable`, expiry of the call's timeout to
/// `Timeout`, 401 to `AuthExpired`.
pub trait SyncTransport: Send + Sync {
    /// Pushes a batch of change-log entries.
    fn push(&self, request: &PushRequest) -> SyncResult<PushResponse>;

    /// Pulls remote changes after a watermark.
    fn pull(&self, request: &PullRequest) -> SyncResult<PulledPage>;
}

/// Failure a [`MockTransport`] is told to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// Connection refused.
    Offline,
    /// Call timed out.
    Timeout,
    /// 401.
    Unauthorized,
}

impl MockFailure {
    fn to_error(self) -> SyncError {
        match self {
            MockFailure::Offline => SyncError::NetworkUnavailable("mock offline".into()),
            MockFailure::Timeout => SyncError::Timeout,
            MockFailure::Unauthorized => SyncError::AuthExpired("mock 401".into()),
        }
    }
}

/// A scripted transport for testing.
///
/// Queued responses are returned in order; once a queue is empty, pushes
/// are accepted whole and pulls return nothing new.
#[derive(Debug, Default)]
pub struct MockTransport {
    failure: Mutex<Option<MockFailure>>,
    push_responses: Mutex<VecDeque<PushResponse>>,
    pull_responses: Mutex<VecDeque<PulledPage>>,
    pushes: Mutex<Vec<PushRequest>>,
    pulls: Mutex<Vec<PullRequest>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail, or clears the failure with `None`.
    pub fn set_failure(&self, failure: Option<MockFailure>) {
        *self.failure.lock() = failure;
    }

    /// Queues a push response.
    pub fn queue_push(&self, response: PushResponse) {
        self.push_responses.lock().push_back(response);
    }

    /// Queues a pull response.
    pub fn queue_pull(&self, page: impl Into<PulledPage>) {
        self.pull_responses.lock().push_back(page.into());
    }

    /// Push requests received so far.
    pub fn pushes(&self) -> Vec<PushRequest> {
        self.pushes.lock().clone()
    }

    /// Pull requests received so far.
    pub fn pulls(&self) -> Vec<PullRequest> {
        self.pulls.lock().clone()
    }

    fn check(&self) -> SyncResult<()> {
        match *self.failure.lock() {
            Some(failure) => Err(failure.to_error()),
            None => Ok(()),
        }
    }
}

impl SyncTransport for MockTransport {
    fn push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        self.check()?;
        self.pushes.lock().push(request.clone());
        Ok(self
            .push_responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| PushResponse::accept_all(request)))
    }

    fn pull(&self, request: &PullRequest) -> SyncResult<PulledPage> {
        self.check()?;
        self.pulls.lock().push(*request);
        Ok(self.pull_responses.lock().pop_front().unwrap_or_else(|| {
            PulledPage::from(PullResponse::new(Vec::new(), request.watermark, false))
        }))
    }
}
