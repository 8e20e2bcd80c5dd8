//! Replica configuration.

/// Configuration for opening a replica.
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    /// Whether to create the replica directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether every committed write is followed by an fsync.
    pub sync_on_write: bool,

    /// Superseded records a table log may accumulate before
    /// [`crate::Replica::collect_garbage`] compacts it.
    pub compaction_threshold: usize,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_write: true,
            compaction_threshold: 256,
        }
    }
}

impl ReplicaConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to fsync every write.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Sets the compaction threshold.
    #[must_use]
    pub const fn compaction_threshold(mut self, records: usize) -> Self {
        self.compaction_threshold = records;
        self
    }
}
