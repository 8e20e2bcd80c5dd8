//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level byte store backing one replica file.
///
/// Backends are opaque: they never interpret the bytes. The framing, the
/// checksums and the meaning of each record belong to [`crate::RecordLog`]
/// and the layers above it.
///
/// # Invariants
///
/// - `append` returns the offset where the data begins
/// - `read_at` returns exactly the bytes previously written at that offset
/// - after `sync` returns, all appended data survives process termination
/// - `replace` is all-or-nothing: readers see either the old or the new bytes
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the range extends past
    /// the current size.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Reads the entire contents.
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        self.read_at(0, size as usize)
    }

    /// Appends data to the end and returns the offset it was written at.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    fn flush(&mut self) -> StorageResult<()>;

    /// Forces data and metadata to durable media.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the current size in bytes (the offset of the next append).
    fn size(&self) -> StorageResult<u64>;

    /// Shrinks the storage to `new_size` bytes.
    ///
    /// Used to cut off a torn record left behind by a crash mid-append.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Atomically replaces the whole contents with `data`.
    ///
    /// Used when compacting a record log.
    fn replace(&mut self, data: &[u8]) -> StorageResult<()>;
}
