use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use log::{debug, info, trace};

use super::{
    extract_head_branch, switch_to_default_branch, GitBackend, GitError, GitRepository, Protocol,
};
use crate::{paths::RepositoryIdentifier, token::Revision};

const TAGS_PREFIX: &str = "refs/tags/";

/// Backend that delegates to the `git` executable, so authentication follows
/// the user's own git setup.
pub struct CliBackend {
    protocol: Protocol,
}

impl CliBackend {
    pub fn new(protocol: Protocol) -> Self {
        CliBackend { protocol }
    }
}

impl GitBackend for CliBackend {
    fn open<'a>(
        &'a self,
        _identifier: &RepositoryIdentifier,
        directory: &Path,
    ) -> Result<Box<dyn GitRepository + 'a>, GitError> {
        let repository = CliRepository {
            directory: directory.to_path_buf(),
        };
        repository.git(["rev-parse"])?;
        Ok(Box::new(repository))
    }

    fn clone_into<'a>(
        &'a self,
        identifier: &RepositoryIdentifier,
        directory: &Path,
    ) -> Result<Box<dyn GitRepository + 'a>, GitError> {
        let url = self.protocol.remote_url(identifier);
        debug!("Cloning {} into {}", url, directory.display());
        run_git([
            OsStr::new("clone"),
            OsStr::new("-q"),
            OsStr::new(&url),
            directory.as_os_str(),
        ])?;
        Ok(Box::new(CliRepository {
            directory: directory.to_path_buf(),
        }))
    }
}

struct CliRepository {
    directory: PathBuf,
}

impl CliRepository {
    /// Runs git inside the working copy.
    fn git<I, S>(&self, args: I) -> Result<String, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut full: Vec<OsString> = vec!["-C".into(), self.directory.clone().into()];
        full.extend(args.into_iter().map(|arg| arg.as_ref().to_owned()));
        run_git(full)
    }

    fn remote_info(&self) -> String {
        match self.git(["remote", "show", "origin"]) {
            Ok(output) => output,
            Err(error) => {
                // Offline: fall back to the well-known branch names
                debug!("Could not query the remote default branch: {}", error);
                String::new()
            }
        }
    }

    /// Commit of the tag named exactly `name`, peeled through annotated tags.
    fn find_tag(&self, name: &str) -> Result<Option<String>, GitError> {
        let tags = self.git(["for-each-ref", "--format=%(refname)", "refs/tags"])?;
        let found = tags
            .lines()
            .any(|tag| tag.strip_prefix(TAGS_PREFIX) == Some(name));
        if !found {
            return Ok(None);
        }
        let spec = format!("{TAGS_PREFIX}{name}^{{commit}}");
        let commit = self.git(["rev-parse", "--verify", "-q", spec.as_str()])?;
        Ok(Some(commit.trim().to_owned()))
    }
}

impl GitRepository for CliRepository {
    fn directory(&self) -> &Path {
        &self.directory
    }

    fn checkout(&self, revision: &Revision) -> Result<(), GitError> {
        let remote_info = self.remote_info();
        let branch = switch_to_default_branch(extract_head_branch(&remote_info), |branch| {
            self.git(["checkout", "-q", branch]).map(drop)
        })?;
        trace!("Switched {} to {}", self.directory.display(), branch);

        let target = match revision {
            Revision::Unspecified | Revision::Latest => "HEAD".to_owned(),
            Revision::Named(name) => match self.find_tag(name)? {
                Some(commit) => {
                    info!("Using tag {} revision {}", name, commit);
                    commit
                }
                None => name.clone(),
            },
        };
        self.git(["checkout", "-q", target.as_str()])?;
        Ok(())
    }

    fn fetch(&self) -> Result<(), GitError> {
        self.git(["fetch", "-q", "--tags", "--force", "origin"])?;
        if self.git(["symbolic-ref", "-q", "HEAD"]).is_ok() {
            self.git(["merge", "-q", "--ff-only", "@{upstream}"])?;
        }
        Ok(())
    }
}

fn run_git<I, S>(args: I) -> Result<String, GitError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<OsString> = args
        .into_iter()
        .map(|arg| arg.as_ref().to_owned())
        .collect();
    let command = args
        .iter()
        .map(|arg| arg.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ");
    trace!("Running git {}", command);

    let output = Command::new("git")
        .args(&args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .output()
        .map_err(GitError::Spawn)?;

    if !output.status.success() {
        return Err(GitError::Command {
            command,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
