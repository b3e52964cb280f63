mod cli;
mod libgit2;

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::{attempt::first_success, paths::RepositoryIdentifier, token::Revision};

pub use cli::CliBackend;
pub use libgit2::Libgit2Backend;

#[cfg(test)]
pub(crate) use libgit2::fixtures;

const HEAD_BRANCH_MARKER: &str = "HEAD branch:";
const FALLBACK_BRANCHES: [&str; 2] = ["master", "main"];

#[derive(Error, Debug)]
pub enum GitError {
    #[error("Git error: {0}")]
    Libgit2(#[from] git2::Error),
    #[error("`git {command}` failed ({status}): {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("Could not run git: {0}")]
    Spawn(std::io::Error),
    #[error("None of the default branch candidates could be checked out")]
    NoDefaultBranch,
}

/// A working copy inside the cache.
pub trait GitRepository {
    fn directory(&self) -> &Path;

    /// Moves the working copy to `revision`.
    fn checkout(&self, revision: &Revision) -> Result<(), GitError>;

    /// Brings the repository up to date with its remote. Being up to date
    /// already is not an error.
    fn fetch(&self) -> Result<(), GitError>;
}

/// Creates working copies, either from an existing directory or by cloning.
pub trait GitBackend {
    fn open<'a>(
        &'a self,
        identifier: &RepositoryIdentifier,
        directory: &Path,
    ) -> Result<Box<dyn GitRepository + 'a>, GitError>;

    fn clone_into<'a>(
        &'a self,
        identifier: &RepositoryIdentifier,
        directory: &Path,
    ) -> Result<Box<dyn GitRepository + 'a>, GitError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Built-in git client.
    #[default]
    Libgit2,
    /// The `git` executable found on `PATH`.
    Cli,
}

impl BackendKind {
    pub fn create(self, protocol: Protocol) -> Result<Box<dyn GitBackend>, GitError> {
        Ok(match self {
            BackendKind::Libgit2 => Box::new(Libgit2Backend::new(protocol)?),
            BackendKind::Cli => Box::new(CliBackend::new(protocol)),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Https,
    Ssh,
    /// Local mirrors, the identifier is an absolute path without its leading `/`.
    File,
}

impl Protocol {
    pub fn remote_url(self, identifier: &RepositoryIdentifier) -> String {
        match self {
            Protocol::Https => format!("https://{identifier}"),
            Protocol::Ssh => format!("ssh://git@{identifier}.git"),
            Protocol::File => format!("file:///{identifier}"),
        }
    }
}

/// Extracts the branch advertised on the first `HEAD branch:` line of
/// `git remote show` output.
pub fn extract_head_branch(remote_info: &str) -> Option<&str> {
    remote_info
        .lines()
        .find_map(|line| line.split_once(HEAD_BRANCH_MARKER))
        .and_then(|(_, rest)| rest.split_whitespace().next())
        // `(unknown)` or `(not queried)`
        .filter(|branch| !branch.starts_with('('))
}

/// Branches to try when moving back to the default branch.
pub fn default_branch_candidates(advertised: Option<&str>) -> Vec<String> {
    match advertised.filter(|branch| !branch.is_empty()) {
        Some(branch) => vec![branch.to_owned()],
        None => FALLBACK_BRANCHES.iter().map(|b| b.to_string()).collect(),
    }
}

/// Switches to the first default branch candidate that works and returns it.
pub(crate) fn switch_to_default_branch(
    advertised: Option<&str>,
    mut switch: impl FnMut(&str) -> Result<(), GitError>,
) -> Result<String, GitError> {
    first_success(default_branch_candidates(advertised), |branch| {
        switch(&branch).map(|()| branch)
    })
    .unwrap_or(Err(GitError::NoDefaultBranch))
}
