use std::path::{Path, PathBuf};

use log::{debug, info, trace, warn};
use thiserror::Error;

use crate::{
    flock::FileLock,
    git::{GitBackend, GitError, GitRepository},
    paths::RepositoryIdentifier,
};

const REPOS_DIR: &str = "repos";
const LOCK_FILE: &str = "protoc.lock";
const GIT_MARKER: &str = ".git";

/// Cloned repositories under `<location>/repos/<identifier>`.
///
/// Creating the cache takes an exclusive lock on `<location>/protoc.lock`
/// which is held until the cache is dropped, so concurrent invocations never
/// mutate the cache at the same time.
pub struct RepositoryCache {
    location: PathBuf,
    repos: PathBuf,
    backend: Box<dyn GitBackend>,
    _lock: FileLock,
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache location {location} is not a directory")]
    BadLocation { location: String },
    #[error("Cache lock cannot be acquired: {0}")]
    Lock(#[from] crate::flock::Error),
    #[error("Failed to clone {identifier}: {source}")]
    Clone {
        identifier: String,
        source: GitError,
    },
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
}

impl RepositoryCache {
    pub fn new(location: PathBuf, backend: Box<dyn GitBackend>) -> Result<Self, CacheError> {
        if location.exists() {
            if !location.is_dir() {
                return Err(CacheError::BadLocation {
                    location: location.to_string_lossy().to_string(),
                });
            }
        } else {
            std::fs::create_dir_all(&location)?;
        }

        let lock = Self::acquire_lock(&location)?;

        let repos = location.join(REPOS_DIR);
        Ok(RepositoryCache {
            location,
            repos,
            backend,
            _lock: lock,
        })
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn repos_path(&self) -> &Path {
        &self.repos
    }

    pub fn entry_path(&self, identifier: &RepositoryIdentifier) -> PathBuf {
        self.repos.join(identifier.to_path())
    }

    /// Whether the entry looks like a complete clone rather than a leftover
    /// directory.
    pub fn is_cached(&self, identifier: &RepositoryIdentifier) -> bool {
        self.entry_path(identifier).join(GIT_MARKER).is_dir()
    }

    /// Opens a cached repository without touching the network.
    pub fn open(&self, identifier: &RepositoryIdentifier) -> Option<Box<dyn GitRepository + '_>> {
        if !self.is_cached(identifier) {
            return None;
        }
        let path = self.entry_path(identifier);
        match self.backend.open(identifier, &path) {
            Ok(repository) => {
                info!("Using cached repository {}", path.display());
                Some(repository)
            }
            Err(error) => {
                debug!("Could not open {}: {}", path.display(), error);
                None
            }
        }
    }

    /// Clones `identifier` into its entry. A failed clone leaves no `.git`
    /// behind, so a later [`open`](Self::open) cannot mistake it for a clone.
    pub fn clone_repository(
        &self,
        identifier: &RepositoryIdentifier,
    ) -> Result<Box<dyn GitRepository + '_>, CacheError> {
        let path = self.entry_path(identifier);
        std::fs::create_dir_all(&path)?;
        info!("Trying to clone {} into {}", identifier, path.display());

        match self.backend.clone_into(identifier, &path) {
            Ok(repository) => {
                info!("Cloned repository {}", identifier);
                Ok(repository)
            }
            Err(source) => {
                Self::discard_failed_clone(&path);
                Err(CacheError::Clone {
                    identifier: identifier.to_string(),
                    source,
                })
            }
        }
    }

    /// Deletes the entry so the next resolution clones it again.
    pub fn invalidate(&self, identifier: &RepositoryIdentifier) -> Result<(), CacheError> {
        let path = self.entry_path(identifier);
        info!("Invalidating cached directory {}", path.display());
        match std::fs::remove_dir_all(&path) {
            Err(error) if error.kind() != std::io::ErrorKind::NotFound => Err(error.into()),
            _ => Ok(()),
        }
    }

    fn discard_failed_clone(path: &Path) {
        let result = if path.join(GIT_MARKER).is_dir() {
            trace!("Removing partial clone {}", path.display());
            std::fs::remove_dir_all(path)
        } else if is_empty_dir(path) {
            std::fs::remove_dir(path)
        } else {
            Ok(())
        };
        if let Err(error) = result {
            warn!("Could not clean up {}: {}", path.display(), error);
        }
    }

    fn acquire_lock(location: &Path) -> Result<FileLock, CacheError> {
        let location = location.join(LOCK_FILE);
        debug!(
            "Acquiring a lock on the cache location: {}",
            location.display()
        );
        let lock = FileLock::new(&location)?;
        debug!("Acquired a lock on the cache location");
        Ok(lock)
    }
}

fn is_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path).is_ok_and(|mut entries| entries.next().is_none())
}


#[cfg(test)]
mod tests {
    use super::{
        fake::{FakeBackend, Remote},
        *,
    };

    use pretty_assertions::assert_eq;

    fn identifier(value: &str) -> RepositoryIdentifier {
        RepositoryIdentifier::new(value)
    }

    #[test]
    fn new_creates_location_and_lock() {
        let dir = tempfile::tempdir().unwrap();
        let location = dir.path().join("protoc-remote").join("0.1.0");
        let cache = RepositoryCache::new(location.clone(), Box::new(FakeBackend::default())).unwrap();
        assert_eq!(cache.location(), location.as_path());
        assert_eq!(cache.repos_path(), location.join("repos").as_path());
        assert!(location.join("protoc.lock").is_file());
    }

    #[test]
    fn new_rejects_file_location() {
        let dir = tempfile::tempdir().unwrap();
        let location = dir.path().join("file");
        std::fs::write(&location, "").unwrap();
        let result = RepositoryCache::new(location, Box::new(FakeBackend::default()));
        assert!(matches!(result, Err(CacheError::BadLocation { .. })));
    }

    #[test]
    fn open_requires_git_marker() {
        let dir = tempfile::tempdir().unwrap();
        let cache =
            RepositoryCache::new(dir.path().to_path_buf(), Box::new(FakeBackend::default()))
                .unwrap();
        let id = identifier("example.com/org/repo");

        std::fs::create_dir_all(cache.entry_path(&id)).unwrap();
        assert!(cache.open(&id).is_none());

        // A `.git` file (worktree or submodule) is not a marker directory
        std::fs::write(cache.entry_path(&id).join(".git"), "gitdir: elsewhere").unwrap();
        assert!(cache.open(&id).is_none());

        std::fs::remove_file(cache.entry_path(&id).join(".git")).unwrap();
        std::fs::create_dir(cache.entry_path(&id).join(".git")).unwrap();
        let repository = cache.open(&id).unwrap();
        assert_eq!(repository.directory(), cache.entry_path(&id).as_path());
    }

    #[test]
    fn clone_creates_entry() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::default().with_remote("example.com/org/repo", Remote::default());
        let state = backend.state.clone();
        let cache = RepositoryCache::new(dir.path().to_path_buf(), Box::new(backend)).unwrap();
        let id = identifier("example.com/org/repo");

        cache.clone_repository(&id).unwrap();
        assert!(cache.is_cached(&id));
        assert_eq!(state.borrow().clones, vec!["example.com/org/repo"]);
    }

    #[test]
    fn failed_clone_removes_partial_marker() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::default().with_broken("example.com/org/repo");
        let cache = RepositoryCache::new(dir.path().to_path_buf(), Box::new(backend)).unwrap();
        let id = identifier("example.com/org/repo");

        let result = cache.clone_repository(&id);
        assert!(matches!(result, Err(CacheError::Clone { .. })));
        assert!(!cache.entry_path(&id).exists());
    }

    #[test]
    fn failed_clone_keeps_unrelated_content() {
        let dir = tempfile::tempdir().unwrap();
        let cache =
            RepositoryCache::new(dir.path().to_path_buf(), Box::new(FakeBackend::default()))
                .unwrap();
        let parent = identifier("example.com/org");
        let nested = cache.entry_path(&identifier("example.com/org/repo"));
        std::fs::create_dir_all(nested.join(".git")).unwrap();

        assert!(cache.clone_repository(&parent).is_err());
        assert!(nested.join(".git").is_dir());
    }

    #[test]
    fn backend_io_failure_is_a_clone_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::default().with_remote("example.com/org/repo", Remote::default());
        let cache = RepositoryCache::new(dir.path().to_path_buf(), Box::new(backend)).unwrap();
        let id = identifier("example.com/org/repo");
        std::fs::create_dir_all(cache.entry_path(&id)).unwrap();
        std::fs::write(cache.entry_path(&id).join(".git"), "gitdir: elsewhere").unwrap();

        let result = cache.clone_repository(&id);
        assert!(matches!(
            result,
            Err(CacheError::Clone {
                source: GitError::Spawn(_),
                ..
            })
        ));
        // Not a partial clone, so the entry is left alone
        assert!(cache.entry_path(&id).join(".git").is_file());
    }

    #[test]
    fn invalidate_removes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::default().with_remote("example.com/org/repo", Remote::default());
        let cache = RepositoryCache::new(dir.path().to_path_buf(), Box::new(backend)).unwrap();
        let id = identifier("example.com/org/repo");

        drop(cache.clone_repository(&id).unwrap());
        cache.invalidate(&id).unwrap();
        assert!(!cache.entry_path(&id).exists());
        // Invalidating a missing entry is fine
        cache.invalidate(&id).unwrap();
    }
}
