//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// An in-memory storage backend.
///
/// Clones share the same buffer. A test can keep one handle, hand another
/// to a replica, drop the replica and "reopen" it from the kept handle to
/// exercise recovery without touching the file system.
///
/// # Example
///
/// ```rust
/// use rollcall_storage::{InMemoryBackend, StorageBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let observer = backend.clone();
/// backend.append(b"shared").unwrap();
/// assert_eq!(observer.data(), b"shared");
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    data: Arc<RwLock<Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates a new empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend holding pre-existing bytes.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Returns a copy of the current bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let start = offset as usize;
        let end = start.saturating_add(len);
        if offset > size || end > data.len() {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        Ok(data[start..end].to_vec())
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let size = data.len() as u64;
        if new_size > size {
            return Err(StorageError::ReadPastEnd {
                offset: new_size,
                len: 0,
                size,
            });
        }
        data.truncate(new_size as usize);
        Ok(())
    }

    fn replace(&mut self, new_data: &[u8]) -> StorageResult<()> {
        *self.data.write() = new_data.to_vec();
        Ok(())
    }
}
