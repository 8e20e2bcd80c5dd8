//! Framed, checksummed record logs.
//!
//! Every record is stored as:
//!
//! ```text
//! +----------------+----------------+------------------+
//! | len: u32 (LE)  | crc32: u32 (LE)| payload (len)    |
//! +----------------+----------------+------------------+
//! ```
//!
//! The CRC covers the payload only. On replay a damaged record at the very
//! end of the log is a torn write from a crash and is truncated away; a
//! damaged record followed by more data is reported as corruption.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// Size of the per-record header (length + checksum).
pub const FRAME_HEADER_SIZE: usize = 8;

const CRC32_TABLE: [u32; 256] = build_crc32_table();

const fn build_crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// CRC-32 (IEEE) of `data`.
#[must_use]
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        crc = (crc >> 8) ^ CRC32_TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize];
    }
    !crc
}

fn encode_frame(payload: &[u8]) -> StorageResult<Vec<u8>> {
    let len = u32::try_from(payload.len()).map_err(|_| StorageError::RecordTooLarge(payload.len()))?;
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&crc32(payload).to_le_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Result of replaying a record log.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Replay {
    /// Intact record payloads in append order.
    pub records: Vec<Vec<u8>>,
    /// Bytes cut off the end because the last record was torn.
    pub truncated_bytes: u64,
}

/// An append-only log of framed records over a [`StorageBackend`].
///
/// The backend is held behind a mutex; writers take it through
/// [`RecordLog::writer`], which returns a guard that flushes on drop.
pub struct RecordLog {
    backend: Mutex<Box<dyn StorageBackend>>,
    sync_on_write: bool,
}

impl RecordLog {
    /// Creates a log over `backend`.
    ///
    /// With `sync_on_write` every committed write is followed by a full
    /// `sync()`; otherwise only `flush()` is issued.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_write: bool) -> Self {
        Self {
            backend: Mutex::new(backend),
            sync_on_write,
        }
    }

    /// Reads every intact record, truncating a torn tail if one is found.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Corrupted`] if damage is followed by more data.
    pub fn replay(&self) -> StorageResult<Replay> {
        let mut backend = self.backend.lock();
        let bytes = backend.read_all()?;
        let total = bytes.len();
        let mut records = Vec::new();
        let mut offset = 0usize;

        while offset < total {
            let remaining = total - offset;
            if remaining < FRAME_HEADER_SIZE {
                break;
            }

            let header = &bytes[offset..offset + FRAME_HEADER_SIZE];
            let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
            let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
            let end = offset + FRAME_HEADER_SIZE + len;
            if end > total {
                break;
            }

            let payload = &bytes[offset + FRAME_HEADER_SIZE..end];
            if crc32(payload) != expected_crc {
                if end == total {
                    break;
                }
                return Err(StorageError::corrupted(offset as u64, "checksum mismatch"));
            }

            records.push(payload.to_vec());
            offset = end;
        }

        let truncated_bytes = (total - offset) as u64;
        if truncated_bytes > 0 {
            warn!(
                offset,
                truncated_bytes, "discarding torn record at end of log"
            );
            backend.truncate(offset as u64)?;
        }

        debug!(records = records.len(), "replayed record log");
        Ok(Replay {
            records,
            truncated_bytes,
        })
    }

    /// Acquires the log for writing.
    ///
    /// The returned guard holds the log exclusively and flushes whatever it
    /// appended when it is committed or dropped.
    pub fn writer(&self) -> RecordWriter<'_> {
        RecordWriter {
            backend: self.backend.lock(),
            sync_on_write: self.sync_on_write,
            dirty: false,
        }
    }

    /// Appends one record and commits it. Returns the record's offset.
    pub fn append(&self, payload: &[u8]) -> StorageResult<u64> {
        let mut writer = self.writer();
        let offset = writer.append(payload)?;
        writer.commit()?;
        Ok(offset)
    }

    /// Atomically replaces the log with `records`.
    pub fn rewrite<'a, I>(&self, records: I) -> StorageResult<()>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut bytes = Vec::new();
        let mut count = 0usize;
        for record in records {
            bytes.extend_from_slice(&encode_frame(record)?);
            count += 1;
        }

        let mut backend = self.backend.lock();
        backend.replace(&bytes)?;
        debug!(records = count, bytes = bytes.len(), "rewrote record log");
        Ok(())
    }

    /// Returns the current size in bytes.
    pub fn size(&self) -> StorageResult<u64> {
        self.backend.lock().size()
    }
}

impl std::fmt::Debug for RecordLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordLog")
            .field("sync_on_write", &self.sync_on_write)
            .finish_non_exhaustive()
    }
}

/// Scoped write access to a [`RecordLog`].
///
/// Dropping the writer without calling [`RecordWriter::commit`] still
/// flushes anything appended so far; the flush error, if any, is logged
/// because `Drop` cannot return it.
pub struct RecordWriter<'a> {
    backend: MutexGuard<'a, Box<dyn StorageBackend>>,
    sync_on_write: bool,
    dirty: bool,
}

impl RecordWriter<'_> {
    /// Appends one framed record. Returns the record's offset.
    pub fn append(&mut self, payload: &[u8]) -> StorageResult<u64> {
        let frame = encode_frame(payload)?;
        self.dirty = true;
        self.backend.append(&frame)
    }

    /// Flushes (and syncs, if configured) everything appended so far.
    pub fn commit(mut self) -> StorageResult<()> {
        self.finish()
    }

    fn finish(&mut self) -> StorageResult<()> {
        if !self.dirty {
            return Ok(());
        }
        self.dirty = false;
        self.backend.flush()?;
        if self.sync_on_write {
            self.backend.sync()?;
        }
        Ok(())
    }
}

impl Drop for RecordWriter<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!(error = %e, "flush on writer drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn memory_log() -> (RecordLog, InMemoryBackend) {
        let backend = InMemoryBackend::new();
        (RecordLog::new(Box::new(backend.clone()), true), backend)
    }

    #[test]
    fn crc32_known_vector() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn append_then_replay() {
        let (log, _) = memory_log();
        log.append(b"one").unwrap();
        log.append(b"").unwrap();
        log.append(b"three").unwrap();

        let replay = log.replay().unwrap();
        assert_eq!(
            replay.records,
            vec![b"one".to_vec(), Vec::new(), b"three".to_vec()]
        );
        assert_eq!(replay.truncated_bytes, 0);
    }

    #[test]
    fn torn_tail_is_truncated() {
        let (log, backend) = memory_log();
        log.append(b"complete").unwrap();
        let intact = backend.size().unwrap();

        let frame = encode_frame(b"half-written").unwrap();
        let mut raw = backend.clone();
        raw.append(&frame[..frame.len() - 3]).unwrap();

        let replay = log.replay().unwrap();
        assert_eq!(replay.records, vec![b"complete".to_vec()]);
        assert!(replay.truncated_bytes > 0);
        assert_eq!(backend.size().unwrap(), intact);

        // Appending after repair produces a clean log again.
        log.append(b"next").unwrap();
        assert_eq!(log.replay().unwrap().records.len(), 2);
    }

    #[test]
    fn damaged_final_record_counts_as_torn() {
        let (log, backend) = memory_log();
        log.append(b"good").unwrap();
        log.append(b"flipped").unwrap();

        let mut bytes = backend.data();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let log = RecordLog::new(Box::new(InMemoryBackend::with_data(bytes)), false);

        let replay = log.replay().unwrap();
        assert_eq!(replay.records, vec![b"good".to_vec()]);
    }

    #[test]
    fn corruption_in_the_middle_is_an_error() {
        let (log, backend) = memory_log();
        log.append(b"first").unwrap();
        log.append(b"second").unwrap();

        let mut bytes = backend.data();
        bytes[FRAME_HEADER_SIZE] ^= 0xFF;
        let log = RecordLog::new(Box::new(InMemoryBackend::with_data(bytes)), false);

        assert!(matches!(
            log.replay(),
            Err(StorageError::Corrupted { offset: 0, .. })
        ));
    }

    #[test]
    fn rewrite_replaces_everything() {
        let (log, _) = memory_log();
        for i in 0..5u8 {
            log.append(&[i]).unwrap();
        }

        log.rewrite([b"a".as_slice(), b"b".as_slice()]).unwrap();
        assert_eq!(
            log.replay().unwrap().records,
            vec![b"a".to_vec(), b"b".to_vec()]
        );
    }

    /// Counts flushes and fails every append after the first `ok_appends`.
    struct FlakyBackend {
        inner: InMemoryBackend,
        ok_appends: usize,
        appends: usize,
        flushes: Arc<AtomicUsize>,
    }

    impl StorageBackend for FlakyBackend {
        fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
            self.inner.read_at(offset, len)
        }
        fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
            self.appends += 1;
            if self.appends > self.ok_appends {
                return Err(std::io::Error::other("disk full").into());
            }
            self.inner.append(data)
        }
        fn flush(&mut self) -> StorageResult<()> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn sync(&mut self) -> StorageResult<()> {
            Ok(())
        }
        fn size(&self) -> StorageResult<u64> {
            self.inner.size()
        }
        fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
            self.inner.truncate(new_size)
        }
        fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
            self.inner.replace(data)
        }
    }

    #[test]
    fn writer_flushes_on_error_path() {
        let flushes = Arc::new(AtomicUsize::new(0));
        let backend = FlakyBackend {
            inner: InMemoryBackend::new(),
            ok_appends: 1,
            appends: 0,
            flushes: Arc::clone(&flushes),
        };
        let log = RecordLog::new(Box::new(backend), false);

        let result = (|| -> StorageResult<()> {
            let mut writer = log.writer();
            writer.append(b"lands")?;
            writer.append(b"fails")?;
            writer.commit()
        })();

        assert!(result.is_err());
        assert_eq!(flushes.load(Ordering::SeqCst), 1);
        assert_eq!(log.replay().unwrap().records, vec![b"lands".to_vec()]);
    }

    proptest::proptest! {
        #[test]
        fn any_cut_replays_a_prefix(
            records in proptest::collection::vec(proptest::collection::vec(0u8..=255, 0..40), 1..8),
            cut_seed in 0usize..10_000,
        ) {
            let (log, backend) = memory_log();
            for record in &records {
                log.append(record).unwrap();
            }
            let bytes = backend.data();
            let cut = cut_seed % (bytes.len() + 1);

            let log = RecordLog::new(Box::new(InMemoryBackend::with_data(bytes[..cut].to_vec())), false);
            let replayed = log.replay().unwrap().records;

            proptest::prop_assert!(replayed.len() <= records.len());
            proptest::prop_assert_eq!(&records[..replayed.len()], &replayed[..]);
        }
    }

    #[test]
    fn untouched_writer_does_not_flush() {
        let flushes = Arc::new(AtomicUsize::new(0));
        let backend = FlakyBackend {
            inner: InMemoryBackend::new(),
            ok_appends: usize::MAX,
            appends: 0,
            flushes: Arc::clone(&flushes),
        };
        let log = RecordLog::new(Box::new(backend), false);

        drop(log.writer());
        assert_eq!(flushes.load(Ordering::SeqCst), 0);
    }
}
