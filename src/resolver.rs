use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use thiserror::Error;

use crate::{
    attempt::first_success,
    cache::{CacheError, RepositoryCache},
    git::{GitError, GitRepository},
    paths::{clone_candidates, open_candidates, Candidate, CloneCandidates},
    token::{ImportToken, Revision},
};

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("No repository could be found for {path}")]
    NotFound { path: String },
    #[error("Clone failed for {path}: {source}")]
    Clone { path: String, source: CacheError },
    #[error("Failed to check out {revision} of {path}: {source}")]
    Checkout {
        path: String,
        revision: Revision,
        source: GitError,
    },
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Turns remote import tokens into local file paths.
pub trait ResolveImport {
    fn resolve_import(&self, raw: &str) -> Result<PathBuf, ResolveError>;

    /// Directory that remote include paths are relative to.
    fn include_root(&self) -> &Path;
}

/// A repository found for an import, together with the file inside it.
struct Located<'a> {
    candidate: Candidate,
    repository: Box<dyn GitRepository + 'a>,
}

impl Located<'_> {
    fn local_path(&self) -> PathBuf {
        self.candidate.local_path(self.repository.directory())
    }
}

pub struct ImportResolver {
    cache: RepositoryCache,
}

impl ImportResolver {
    pub fn new(cache: RepositoryCache) -> Self {
        ImportResolver { cache }
    }

    pub fn cache(&self) -> &RepositoryCache {
        &self.cache
    }

    /// Resolves `raw` (`<path>[@<revision>]`) to a file inside a cached
    /// clone, cloning or updating the repository as needed.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, ResolveError> {
        let token = ImportToken::parse(raw);
        debug!("Resolving {}", token);

        let cached = match self.open(&token.path) {
            Some(located) if token.revision == Revision::Latest => {
                let Located {
                    candidate,
                    repository,
                } = located;
                drop(repository);
                self.cache.invalidate(&candidate.identifier)?;
                None
            }
            cached => cached,
        };
        let located = match cached {
            Some(located) => located,
            None => self.clone_repository(&token.path)?,
        };

        self.checkout(&located, &token)?;
        Ok(located.local_path())
    }

    fn open(&self, path: &str) -> Option<Located<'_>> {
        open_candidates(path).into_iter().find_map(|candidate| {
            let repository = self.cache.open(&candidate.identifier)?;
            Some(Located {
                candidate,
                repository,
            })
        })
    }

    fn clone_repository(&self, path: &str) -> Result<Located<'_>, ResolveError> {
        let attempt = |candidate: Candidate| {
            let repository = self.cache.clone_repository(&candidate.identifier)?;
            Ok::<_, CacheError>(Located {
                candidate,
                repository,
            })
        };
        let result = match clone_candidates(path) {
            CloneCandidates::Hosted(candidate) => Some(attempt(candidate)),
            CloneCandidates::Probe(candidates) => first_success(candidates, attempt),
        };
        match result {
            Some(Ok(located)) => Ok(located),
            Some(Err(source)) => Err(ResolveError::Clone {
                path: path.to_owned(),
                source,
            }),
            None => Err(ResolveError::NotFound {
                path: path.to_owned(),
            }),
        }
    }

    /// Checks out the requested revision. A failed checkout is retried once
    /// after a fetch, since the revision may be newer than the cached clone.
    fn checkout(&self, located: &Located<'_>, token: &ImportToken) -> Result<(), ResolveError> {
        let repository = &located.repository;
        let Err(error) = repository.checkout(&token.revision) else {
            return Ok(());
        };
        info!(
            "Checkout of {} failed ({}), fetching {}",
            token.revision, error, located.candidate.identifier
        );
        if let Err(error) = repository.fetch() {
            warn!(
                "Fetch of {} failed: {}",
                located.candidate.identifier, error
            );
        }
        repository
            .checkout(&token.revision)
            .map_err(|source| ResolveError::Checkout {
                path: token.path.clone(),
                revision: token.revision.clone(),
                source,
            })
    }
}

impl ResolveImport for ImportResolver {
    fn resolve_import(&self, raw: &str) -> Result<PathBuf, ResolveError> {
        self.resolve(raw)
    }

    fn include_root(&self) -> &Path {
        self.cache.repos_path()
    }
}
