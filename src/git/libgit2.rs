use std::path::{Path, PathBuf};

use git2::{
    build::{CheckoutBuilder, RepoBuilder},
    cert::Cert,
    AutotagOption, BranchType, CertificateCheckStatus, Commit, Config, Cred, CredentialType,
    FetchOptions, RemoteCallbacks, Repository,
};
use log::{debug, info, trace};
use ssh_key::{known_hosts::HostPatterns, KnownHosts};

use super::{switch_to_default_branch, GitBackend, GitError, GitRepository, Protocol};
use crate::{attempt::first_success, netrc, paths::RepositoryIdentifier, token::Revision};

const GLOBAL_KNOWN_HOSTS: &str = "/etc/ssh/ssh_known_hosts";
const ORIGIN: &str = "origin";
const ORIGIN_HEAD: &str = "refs/remotes/origin/HEAD";
const TAGS_PREFIX: &str = "refs/tags/";

/// Backend built on libgit2.
pub struct Libgit2Backend {
    git_config: Config,
    protocol: Protocol,
    netrc: Option<PathBuf>,
}

impl Libgit2Backend {
    pub fn new(protocol: Protocol) -> Result<Self, GitError> {
        let git_config = Config::open_default()?;
        let netrc = home::home_dir().map(|home| home.join(".netrc"));
        Ok(Self::with_config(git_config, protocol, netrc))
    }

    pub fn with_config(git_config: Config, protocol: Protocol, netrc: Option<PathBuf>) -> Self {
        Libgit2Backend {
            git_config,
            protocol,
            netrc,
        }
    }

    fn fetch_options(&self) -> FetchOptions<'_> {
        let mut callbacks = RemoteCallbacks::new();
        let mut attempts = CredentialAttempts::default();
        callbacks.credentials(move |url, username, allowed_types| {
            trace!(
                "Requested credentials for {}, username {:?}, allowed types {:?}",
                url,
                username,
                allowed_types
            );
            // Asking for ssh username
            if allowed_types.contains(CredentialType::USERNAME) {
                return Cred::username("git");
            }
            // SSH auth
            if allowed_types.contains(CredentialType::SSH_KEY) {
                if !attempts.first(CredentialType::SSH_KEY) {
                    return Err(git2::Error::from_str("ssh agent credentials were rejected"));
                }
                return Cred::ssh_key_from_agent(username.unwrap_or("git"));
            }
            // HTTP auth
            if allowed_types.contains(CredentialType::USER_PASS_PLAINTEXT) {
                if !attempts.first(CredentialType::USER_PASS_PLAINTEXT) {
                    return Err(git2::Error::from_str("http credentials were rejected"));
                }
                if let Some(credentials) = self.netrc_credentials(url) {
                    trace!("Using .netrc credentials for {}", url);
                    return Cred::userpass_plaintext(&credentials.login, &credentials.password);
                }
                return Cred::credential_helper(&self.git_config, url, username);
            }
            Err(git2::Error::from_str("no valid authentication available"))
        });

        callbacks.certificate_check(move |certificate, host| self.check_certificate(certificate, host));

        let mut fetch_options = FetchOptions::new();
        fetch_options
            .remote_callbacks(callbacks)
            .download_tags(AutotagOption::All);
        fetch_options
    }

    fn netrc_credentials(&self, url: &str) -> Option<netrc::Credentials> {
        let path = self.netrc.as_deref()?;
        netrc::read(path, url_host(url)?)
    }

    fn check_certificate(
        &self,
        certificate: &Cert<'_>,
        host: &str,
    ) -> Result<CertificateCheckStatus, git2::Error> {
        if let Some(hostkey) = certificate.as_hostkey().and_then(|h| h.hostkey()) {
            trace!("Loading {}", GLOBAL_KNOWN_HOSTS);
            match KnownHosts::read_file(GLOBAL_KNOWN_HOSTS) {
                Ok(entries) => {
                    for entry in entries {
                        if host_matches_patterns(host, entry.host_patterns())
                            && entry.public_key().to_bytes().as_deref() == Ok(hostkey)
                        {
                            trace!("Known host entry for {} matches the host key", host);
                            return Ok(CertificateCheckStatus::CertificateOk);
                        }
                    }
                    trace!("No known host entry matched the host key");
                }
                Err(error) => trace!("Could not load {}: {}", GLOBAL_KNOWN_HOSTS, error),
            }
        }
        Ok(CertificateCheckStatus::CertificatePassthrough)
    }
}

impl GitBackend for Libgit2Backend {
    fn open<'a>(
        &'a self,
        identifier: &RepositoryIdentifier,
        directory: &Path,
    ) -> Result<Box<dyn GitRepository + 'a>, GitError> {
        trace!("Opening existing repository at {}", directory.display());
        let repo = Repository::open(directory)?;

        let url = self.protocol.remote_url(identifier);
        {
            let remote = repo.find_remote(ORIGIN)?;
            if remote.url() != Some(url.as_str()) {
                // The protocol changed since the repository was cloned
                trace!(
                    "Updating remote existing url {:?} to new url {}",
                    remote.url(),
                    url
                );
                repo.remote_set_url(ORIGIN, &url)?;
            }
        }

        Ok(Box::new(Libgit2Repository::new(self, repo, directory)))
    }

    fn clone_into<'a>(
        &'a self,
        identifier: &RepositoryIdentifier,
        directory: &Path,
    ) -> Result<Box<dyn GitRepository + 'a>, GitError> {
        let url = self.protocol.remote_url(identifier);
        debug!("Cloning {} into {}", url, directory.display());
        let repo = RepoBuilder::new()
            .fetch_options(self.fetch_options())
            .clone(&url, directory)?;
        Ok(Box::new(Libgit2Repository::new(self, repo, directory)))
    }
}

struct Libgit2Repository<'a> {
    backend: &'a Libgit2Backend,
    repo: Repository,
    directory: PathBuf,
}

impl<'a> Libgit2Repository<'a> {
    fn new(backend: &'a Libgit2Backend, repo: Repository, directory: &Path) -> Self {
        Libgit2Repository {
            backend,
            repo,
            directory: directory.to_path_buf(),
        }
    }

    /// Branch that `origin/HEAD` points at, as recorded by the clone.
    fn advertised_default_branch(&self) -> Option<String> {
        let reference = self.repo.find_reference(ORIGIN_HEAD).ok()?;
        let target = reference.symbolic_target()?;
        target
            .strip_prefix("refs/remotes/origin/")
            .map(str::to_owned)
    }

    fn switch_branch(&self, branch: &str) -> Result<(), GitError> {
        let local = match self.repo.find_branch(branch, BranchType::Local) {
            Ok(local) => local,
            Err(_) => {
                let upstream = format!("{ORIGIN}/{branch}");
                let remote = self.repo.find_branch(&upstream, BranchType::Remote)?;
                let commit = remote.get().peel_to_commit()?;
                let mut local = self.repo.branch(branch, &commit, false)?;
                local.set_upstream(Some(&upstream))?;
                local
            }
        };
        let name = local
            .get()
            .name()
            .ok_or_else(|| git2::Error::from_str("branch name is not valid utf-8"))?
            .to_owned();
        self.repo.set_head(&name)?;
        self.repo
            .checkout_head(Some(CheckoutBuilder::new().force()))?;
        Ok(())
    }

    fn find_tag(&self, name: &str) -> Result<Option<Commit<'_>>, GitError> {
        for reference in self.repo.references_glob(&format!("{TAGS_PREFIX}*"))? {
            let reference = reference?;
            if reference
                .name()
                .and_then(|tag| tag.strip_prefix(TAGS_PREFIX))
                == Some(name)
            {
                // Peeling goes through annotated tag objects down to the commit
                return Ok(Some(reference.peel_to_commit()?));
            }
        }
        Ok(None)
    }

    fn find_revision(&self, name: &str) -> Result<Commit<'_>, GitError> {
        first_success([name.to_owned(), format!("{ORIGIN}/{name}")], |spec| {
            self.repo.revparse_single(&spec)?.peel_to_commit()
        })
        .unwrap_or_else(|| Err(git2::Error::from_str("empty revision")))
        .map_err(GitError::from)
    }

    fn fast_forward(&self) -> Result<(), GitError> {
        let head = self.repo.head()?;
        if !head.is_branch() {
            trace!("HEAD is detached, nothing to fast-forward");
            return Ok(());
        }
        let Some(branch) = head.shorthand().map(str::to_owned) else {
            return Ok(());
        };
        let current = head.peel_to_commit()?.id();
        let upstream = self
            .repo
            .find_reference(&format!("refs/remotes/{ORIGIN}/{branch}"))?
            .peel_to_commit()?
            .id();
        if current == upstream || !self.repo.graph_descendant_of(upstream, current)? {
            return Ok(());
        }
        debug!("Fast-forwarding {} to {}", branch, upstream);
        let mut head = head;
        head.set_target(upstream, "protoc-remote: fast-forward")?;
        self.repo
            .checkout_head(Some(CheckoutBuilder::new().force()))?;
        Ok(())
    }
}

impl<'a> GitRepository for Libgit2Repository<'a> {
    fn directory(&self) -> &Path {
        &self.directory
    }

    fn checkout(&self, revision: &Revision) -> Result<(), GitError> {
        let advertised = self.advertised_default_branch();
        let branch = switch_to_default_branch(advertised.as_deref(), |branch| {
            self.switch_branch(branch)
        })?;
        trace!("Switched {} to {}", self.directory.display(), branch);

        let commit = match revision {
            Revision::Unspecified | Revision::Latest => {
                let commit = self.repo.head()?.peel_to_commit()?;
                info!("Using HEAD revision {}", commit.id());
                return Ok(());
            }
            Revision::Named(name) => match self.find_tag(name)? {
                Some(commit) => {
                    info!("Using tag {} revision {}", name, commit.id());
                    commit
                }
                None => self.find_revision(name)?,
            },
        };

        self.repo
            .checkout_tree(commit.as_object(), Some(CheckoutBuilder::new().force()))?;
        self.repo.set_head_detached(commit.id())?;
        Ok(())
    }

    fn fetch(&self) -> Result<(), GitError> {
        let mut remote = self.repo.find_remote(ORIGIN)?;
        let refspecs: Vec<String> = remote
            .refspecs()
            .filter_map(|refspec| refspec.str().map(|s| s.to_string()))
            .collect();
        remote.fetch(&refspecs, Some(&mut self.backend.fetch_options()), None)?;
        self.fast_forward()
    }
}

/// Credential kinds already handed out during one remote operation. libgit2
/// asks again after a rejection, so each kind is offered only once.
#[derive(Debug)]
struct CredentialAttempts {
    tried: CredentialType,
}

impl Default for CredentialAttempts {
    fn default() -> Self {
        CredentialAttempts {
            tried: CredentialType::empty(),
        }
    }
}

impl CredentialAttempts {
    /// Records an attempt with `kind`, returning false if it was made before.
    fn first(&mut self, kind: CredentialType) -> bool {
        if self.tried.contains(kind) {
            return false;
        }
        self.tried.insert(kind);
        true
    }
}

/// Host part of a remote url such as `https://user@host:443/org/repo`.
fn url_host(url: &str) -> Option<&str> {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest.split('/').next()?;
    let host = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    let host = host.split(':').next()?;
    (!host.is_empty()).then_some(host)
}

fn host_matches_patterns(host: &str, patterns: &HostPatterns) -> bool {
    match patterns {
        HostPatterns::Patterns(patterns) => {
            let mut match_found = false;
            for pattern in patterns {
                let pattern = pattern.to_lowercase();
                // * and ? wildcards are not yet supported
                if let Some(pattern) = pattern.strip_prefix('!') {
                    if pattern == host {
                        return false;
                    }
                } else {
                    match_found |= pattern == host;
                }
            }
            match_found
        }
        // Not yet supported
        HostPatterns::HashedName { .. } => false,
    }
}


#[cfg(test)]
mod tests {
    use super::{fixtures::Remote, *};

    use pretty_assertions::assert_eq;

    fn backend() -> Libgit2Backend {
        Libgit2Backend::with_config(Config::new().unwrap(), Protocol::File, None)
    }

    /// Identifier that the `file` protocol maps back to `path`.
    fn identifier(path: &Path) -> RepositoryIdentifier {
        let path = path.to_str().unwrap().trim_start_matches('/');
        RepositoryIdentifier::new(path)
    }

    fn head_of(directory: &Path) -> git2::Oid {
        Repository::open(directory)
            .unwrap()
            .head()
            .unwrap()
            .peel_to_commit()
            .unwrap()
            .id()
    }

    #[test]
    fn clone_and_checkout_default_branch() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Remote::init(&dir.path().join("remote"));
        let tip = remote.commit("schemas/a.proto", "syntax = \"proto3\";");

        let backend = backend();
        let target = dir.path().join("clone");
        let repository = backend
            .clone_into(&identifier(&dir.path().join("remote")), &target)
            .unwrap();
        repository.checkout(&Revision::Unspecified).unwrap();

        assert_eq!(head_of(&target), tip);
        assert!(target.join("schemas/a.proto").is_file());
    }

    #[test]
    fn checkout_annotated_tag_peels_to_commit() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Remote::init(&dir.path().join("remote"));
        let tagged = remote.commit("a.proto", "v1");
        let tag_object = remote.annotated_tag("v1.0.0", tagged);
        remote.commit("a.proto", "v2");

        let backend = backend();
        let target = dir.path().join("clone");
        let repository = backend
            .clone_into(&identifier(&dir.path().join("remote")), &target)
            .unwrap();
        repository
            .checkout(&Revision::Named("v1.0.0".to_owned()))
            .unwrap();

        assert_ne!(tag_object, tagged);
        assert_eq!(head_of(&target), tagged);
        assert_eq!(std::fs::read_to_string(target.join("a.proto")).unwrap(), "v1");
    }

    #[test]
    fn checkout_commit_id() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Remote::init(&dir.path().join("remote"));
        let first = remote.commit("a.proto", "first");
        remote.commit("a.proto", "second");

        let backend = backend();
        let target = dir.path().join("clone");
        let repository = backend
            .clone_into(&identifier(&dir.path().join("remote")), &target)
            .unwrap();
        repository
            .checkout(&Revision::Named(first.to_string()))
            .unwrap();
        assert_eq!(head_of(&target), first);

        // Unspecified goes back to the tip of the default branch
        repository.checkout(&Revision::Unspecified).unwrap();
        assert_eq!(
            std::fs::read_to_string(target.join("a.proto")).unwrap(),
            "second"
        );
    }

    #[test]
    fn fetch_brings_new_tags() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Remote::init(&dir.path().join("remote"));
        remote.commit("a.proto", "v1");

        let backend = backend();
        let target = dir.path().join("clone");
        let repository = backend
            .clone_into(&identifier(&dir.path().join("remote")), &target)
            .unwrap();
        repository.checkout(&Revision::Unspecified).unwrap();

        let newer = remote.commit("a.proto", "v2");
        remote.lightweight_tag("v2.0.0", newer);

        let revision = Revision::Named("v2.0.0".to_owned());
        assert!(repository.checkout(&revision).is_err());
        repository.fetch().unwrap();
        repository.checkout(&revision).unwrap();
        assert_eq!(head_of(&target), newer);
    }

    #[test]
    fn fetch_fast_forwards_default_branch() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Remote::init(&dir.path().join("remote"));
        remote.commit("a.proto", "v1");

        let backend = backend();
        let target = dir.path().join("clone");
        let repository = backend
            .clone_into(&identifier(&dir.path().join("remote")), &target)
            .unwrap();
        repository.checkout(&Revision::Unspecified).unwrap();

        let newer = remote.commit("a.proto", "v2");
        repository.fetch().unwrap();
        // Already up to date
        repository.fetch().unwrap();
        repository.checkout(&Revision::Unspecified).unwrap();
        assert_eq!(head_of(&target), newer);
    }

    #[test]
    fn open_existing_clone() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Remote::init(&dir.path().join("remote"));
        let tip = remote.commit("a.proto", "v1");

        let backend = backend();
        let target = dir.path().join("clone");
        let id = identifier(&dir.path().join("remote"));
        drop(backend.clone_into(&id, &target).unwrap());

        let repository = backend.open(&id, &target).unwrap();
        assert_eq!(repository.directory(), target.as_path());
        repository.checkout(&Revision::Latest).unwrap();
        assert_eq!(head_of(&target), tip);
    }

    #[test]
    fn clone_missing_remote_fails() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend();
        let result = backend.clone_into(
            &identifier(&dir.path().join("missing")),
            &dir.path().join("clone"),
        );
        assert!(result.is_err());
    }

    #[test]
    fn credentials_are_offered_once_per_kind() {
        let mut attempts = CredentialAttempts::default();
        assert!(attempts.first(CredentialType::SSH_KEY));
        assert!(attempts.first(CredentialType::USER_PASS_PLAINTEXT));
        assert!(!attempts.first(CredentialType::SSH_KEY));
        assert!(!attempts.first(CredentialType::USER_PASS_PLAINTEXT));
    }

    #[test]
    fn url_hosts() {
        assert_eq!(url_host("https://example.com/org/repo"), Some("example.com"));
        assert_eq!(url_host("ssh://git@example.com:22/org"), Some("example.com"));
        assert_eq!(url_host("file:///tmp/repo"), None);
    }
}
