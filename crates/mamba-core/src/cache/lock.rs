use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Exclusive advisory lock on one cache entry, shared across processes.
///
/// Released when dropped.
#[derive(Debug)]
pub struct EntryLock {
    file: File,
    path: PathBuf,
}

fn open_lock_file(lock_path: &Path) -> io::Result<File> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(lock_path)
}

impl EntryLock {
    /// Block until the lock at `lock_path` is held.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the lock file cannot be created or locked.
    pub fn acquire(lock_path: &Path) -> io::Result<Self> {
        let file = open_lock_file(lock_path)?;
        FileExt::lock_exclusive(&file)?;
        Ok(Self {
            file,
            path: lock_path.to_path_buf(),
        })
    }

    /// Take the lock only if nobody else holds it.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the lock file cannot be created.
    pub fn try_acquire(lock_path: &Path) -> io::Result<Option<Self>> {
        let file = open_lock_file(lock_path)?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Some(Self {
                file,
                path: lock_path.to_path_buf(),
            })),
            Err(_) => Ok(None),
        }
    }

    /// The lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for EntryLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
