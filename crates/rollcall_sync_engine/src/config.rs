//! Configuration for the sync engine.

use rand::Rng;
use rollcall_protocol::DeviceId;
use std::time::Duration;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Device ID (stable for the device's lifetime).
    pub device_id: DeviceId,
    /// Server URL.
    pub server_url: String,
    /// Maximum entities requested per pull.
    pub pull_batch_size: u32,
    /// Maximum entries sent per push.
    pub push_batch_size: usize,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Interval between automatic cycles.
    pub sync_interval: Duration,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Consecutive failed cycles before "last sync failed" is raised.
    pub failure_threshold: u32,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(device_id: DeviceId, server_url: impl Into<String>) -> Self {
        Self {
            device_id,
            server_url: server_url.into(),
            pull_batch_size: 100,
            push_batch_size: 100,
            retry: RetryConfig::default(),
            sync_interval: Duration::from_secs(300),
            timeout: Duration::from_secs(30),
            failure_threshold: 5,
        }
    }

    /// Sets the pull batch size.
    pub fn with_pull_batch_size(mut self, size: u32) -> Self {
        self.pull_batch_size = size;
        self
    }

    /// Sets the push batch size.
    pub fn with_push_batch_size(mut self, size: usize) -> Self {
        self.push_batch_size = size;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the interval for automatic sync.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets how many consecutive failures raise "last sync failed".
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts made by `sync_with_retry` before giving up.
    pub max_attempts: u32,
    /// Backoff ceiling for the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Draw the delay uniformly from zero to the ceiling.
    pub full_jitter: bool,
}

impl RetryConfig {
    /// Creates a retry configuration with the default 2s/60s backoff.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            full_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            full_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Turns full jitter on or off.
    pub fn with_full_jitter(mut self, enabled: bool) -> Self {
        self.full_jitter = enabled;
        self
    }

    /// Upper bound of the delay before retry `attempt` (0-indexed; attempt
    /// 0 is the first try and has no delay).
    pub fn ceiling_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Delay before retry `attempt`: the ceiling, or a uniform draw from
    /// zero to the ceiling with full jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling_for_attempt(attempt);
        if !self.full_jitter || ceiling.is_zero() {
            return ceiling;
        }
        let secs = rand::thread_rng().gen_range(0.0..=ceiling.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}
