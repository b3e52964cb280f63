use std::{
    fs::File,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use fs4::fs_std::FileExt;
use log::{debug, warn};
use thiserror::Error;

/// Exclusive advisory lock over a file, released when dropped.
pub struct FileLock {
    file: File,
    path: PathBuf,
}

#[derive(Error, Debug)]
#[error("Failed to lock {path}: {source}")]
pub struct Error {
    path: String,
    source: std::io::Error,
}

impl FileLock {
    /// Blocks until the lock on `path` is granted. Platforms without advisory
    /// locking get an unlocked guard.
    pub fn new(path: &Path) -> Result<Self, Error> {
        let wrap = |source| Error {
            path: path.display().to_string(),
            source,
        };
        let file = File::create(path).map_err(wrap)?;
        debug!("Waiting for a lock on {}", path.display());
        loop {
            match FileExt::lock_exclusive(&file) {
                Ok(()) => break,
                Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                Err(error) if error.kind() == ErrorKind::Unsupported => {
                    warn!(
                        "File locking is not supported for {}, continuing without a lock",
                        path.display()
                    );
                    break;
                }
                Err(error) => return Err(wrap(error)),
            }
        }
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(error) = FileExt::unlock(&self.file) {
            if error.kind() != ErrorKind::Unsupported {
                warn!("Failed to unlock {}: {}", self.path.display(), error);
            }
        }
    }
}
