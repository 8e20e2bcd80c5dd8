//! # Rollcall Storage
//!
//! Byte-level persistence for Rollcall replicas.
//!
//! Two layers live here:
//!
//! - [`StorageBackend`]: an opaque byte store (append, read, flush, replace).
//!   Backends know nothing about entities or change-log entries.
//! - [`RecordLog`]: length-prefixed, CRC-checked records on top of a backend.
//!   Writes go through a [`RecordWriter`] guard that flushes on every exit
//!   path, including early returns and panics unwinding through the caller.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - tests and ephemeral replicas; clones share bytes
//! - [`FileBackend`] - persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use rollcall_storage::{InMemoryBackend, RecordLog};
//!
//! let log = RecordLog::new(Box::new(InMemoryBackend::new()), true);
//! log.append(b"first").unwrap();
//! log.append(b"second").unwrap();
//!
//! let replay = log.replay().unwrap();
//! assert_eq!(replay.records, vec![b"first".to_vec(), b"second".to_vec()]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod frame;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use frame::{crc32, RecordLog, RecordWriter, Replay, FRAME_HEADER_SIZE};
pub use memory::InMemoryBackend;
