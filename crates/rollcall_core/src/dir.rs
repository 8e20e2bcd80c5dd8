//! Replica directory management.
//!
//! ```text
//! <replica>/
//! ├─ LOCK               # advisory lock, one process per replica
//! ├─ META.json          # device id, remote watermark, Lamport high-water
//! ├─ changelog.log      # change-log entries and acknowledgements
//! └─ tables/<type>.log  # one record log per entity type
//! ```

use crate::error::{CoreError, CoreResult};
use crate::meta::SyncMeta;
use fs2::FileExt;
use rollcall_protocol::EntityKind;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const META_FILE: &str = "META.json";
const META_TEMP: &str = "META.json.tmp";
const CHANGELOG_FILE: &str = "changelog.log";
const TABLES_DIR: &str = "tables";

/// An open replica directory.
///
/// Holds an exclusive advisory lock on `LOCK` for as long as it lives, so
/// only one process can open the replica at a time.
#[derive(Debug)]
pub struct ReplicaDir {
    path: PathBuf,
    _lock_file: File,
}

impl ReplicaDir {
    /// Opens or creates a replica directory and takes its lock.
    ///
    /// # Errors
    ///
    /// - `InvalidFormat` if the directory is missing and `create_if_missing`
    ///   is false, or the path is not a directory
    /// - `Locked` if another process holds the lock
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_format(format!(
                    "replica directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::Locked);
        }

        fs::create_dir_all(path.join(TABLES_DIR))?;

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the replica directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the change log.
    #[must_use]
    pub fn changelog_path(&self) -> PathBuf {
        self.path.join(CHANGELOG_FILE)
    }

    /// Path of one entity table's log.
    #[must_use]
    pub fn table_path(&self, kind: EntityKind) -> PathBuf {
        self.path
            .join(TABLES_DIR)
            .join(format!("{}.log", kind.as_str()))
    }

    /// Path of `META.json`.
    #[must_use]
    pub fn meta_path(&self) -> PathBuf {
        self.path.join(META_FILE)
    }

    /// Loads `META.json`, or `None` for a new replica.
    pub fn load_meta(&self) -> CoreResult<Option<SyncMeta>> {
        let path = self.meta_path();
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        if bytes.is_empty() {
            return Ok(None);
        }
        SyncMeta::decode(&bytes).map(Some)
    }

    /// Saves `META.json` with write-then-rename.
    pub fn save_meta(&self, meta: &SyncMeta) -> CoreResult<()> {
        let temp_path = self.path.join(META_TEMP);
        let data = meta.encode()?;

        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, self.meta_path())?;
        self.sync_directory()
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> CoreResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> CoreResult<()> {
        Ok(())
    }
}
