//! File-based storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A storage backend over a single OS file.
///
/// `flush()` hands data to the OS; `sync()` calls `File::sync_all()`.
/// `replace()` writes a sibling `*.tmp` file, syncs it and renames it over
/// the original, so a crash leaves either the old or the new contents.
///
/// # Example
///
/// ```no_run
/// use rollcall_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("changelog.log")).unwrap();
/// backend.append(b"entry").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: RwLock<File>,
    size: RwLock<u64>,
}

impl FileBackend {
    /// Opens or creates the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = Self::open_file(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            size: RwLock::new(size),
        })
    }

    /// Opens or creates the file, creating missing parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the file cannot
    /// be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_file(path: &Path) -> StorageResult<File> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = *self.size.read();
        let end = offset.saturating_add(len as u64);
        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut file = self.file.write();
        let mut size = self.size.write();
        let offset = *size;
        if data.is_empty() {
            return Ok(offset);
        }

        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        *size += data.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.file.write().flush()?;
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.file.write().sync_all()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let file = self.file.write();
        let mut size = self.size.write();
        if new_size > *size {
            return Err(StorageError::ReadPastEnd {
                offset: new_size,
                len: 0,
                size: *size,
            });
        }

        file.set_len(new_size)?;
        file.sync_all()?;
        *size = new_size;
        Ok(())
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        let temp = self.temp_path();
        {
            let mut out = File::create(&temp)?;
            out.write_all(data)?;
            out.sync_all()?;
        }
        fs::rename(&temp, &self.path)?;

        // The old handle still points at the unlinked inode.
        let reopened = Self::open_file(&self.path)?;
        *self.file.write() = reopened;
        *self.size.write() = data.len() as u64;
        Ok(())
    }
}
