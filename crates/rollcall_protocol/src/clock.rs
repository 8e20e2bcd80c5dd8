//! Logical timestamps.

use crate::id::DeviceId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A Lamport timestamp with the writing device as tiebreak.
///
/// Ordered by `counter`, then by `origin`, which gives a total order that
/// every replica computes identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogicalTimestamp {
    /// Lamport counter.
    pub counter: u64,
    /// Device that produced the timestamp.
    pub origin: DeviceId,
}

impl LogicalTimestamp {
    /// Creates a timestamp.
    #[must_use]
    pub const fn new(counter: u64, origin: DeviceId) -> Self {
        Self { counter, origin }
    }
}

impl fmt::Display for LogicalTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.counter, self.origin)
    }
}

/// A Lamport clock owned by one device.
#[derive(Debug, Clone)]
pub struct LamportClock {
    origin: DeviceId,
    last: u64,
}

impl LamportClock {
    /// Creates a clock that has issued nothing yet.
    #[must_use]
    pub fn new(origin: DeviceId) -> Self {
        Self::resume(origin, 0)
    }

    /// Recreates a clock from its persisted high-water mark.
    #[must_use]
    pub fn resume(origin: DeviceId, last: u64) -> Self {
        Self { origin, last }
    }

    /// Issues the next timestamp for a local event.
    pub fn tick(&mut self) -> LogicalTimestamp {
        self.last += 1;
        LogicalTimestamp::new(self.last, self.origin)
    }

    /// Advances past a timestamp seen from elsewhere.
    pub fn observe(&mut self, seen: &LogicalTimestamp) {
        self.last = self.last.max(seen.counter);
    }

    /// Highest counter issued or observed.
    #[must_use]
    pub fn last(&self) -> u64 {
        self.last
    }

    /// The device this clock stamps with.
    #[must_use]
    pub fn origin(&self) -> DeviceId {
        self.origin
    }
}
