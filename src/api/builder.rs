use std::path::PathBuf;

use anyhow::anyhow;

use crate::{
    cache::RepositoryCache,
    config::WrapperConfig,
    git::{BackendKind, Protocol},
    resolver::ImportResolver,
    ProtocRemote,
};

#[derive(Default)]
pub struct ProtocRemoteBuilder {
    cache_directory_path: Option<PathBuf>,
    backend: BackendKind,
    protocol: Protocol,
    compiler: Option<PathBuf>,
}

impl ProtocRemoteBuilder {
    /// Applies settings from the environment.
    pub fn from_config(config: WrapperConfig) -> Self {
        Self {
            cache_directory_path: config.cache_dir,
            backend: config.git_backend,
            protocol: config.git_protocol,
            compiler: config.compiler,
        }
    }

    /// Root of the cache directory. Repositories are kept in a subdirectory
    /// per wrapper version.
    ///
    /// Defaults to the user cache directory.
    pub fn cache_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_directory_path = Some(path.into());
        self
    }

    /// Git implementation used to clone and update repositories.
    ///
    /// Defaults to libgit2.
    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Transport used for remote URLs.
    ///
    /// Defaults to `https`.
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Compiler executable.
    ///
    /// Defaults to `protoc` on `PATH`.
    pub fn compiler(mut self, path: impl Into<PathBuf>) -> Self {
        self.compiler = Some(path.into());
        self
    }

    /// Opens the cache, blocking until no other process holds its lock.
    pub fn try_build(self) -> anyhow::Result<ProtocRemote> {
        let Self {
            cache_directory_path,
            backend,
            protocol,
            compiler,
        } = self;

        let root = match cache_directory_path {
            Some(root) => root,
            None => dirs::cache_dir()
                .ok_or_else(|| anyhow!("Could not find a cache directory, set PROTOC_CACHE_DIR"))?,
        };
        let location = root
            .join(env!("CARGO_PKG_NAME"))
            .join(env!("CARGO_PKG_VERSION"));

        let cache = RepositoryCache::new(location, backend.create(protocol)?)?;

        Ok(ProtocRemote {
            resolver: ImportResolver::new(cache),
            compiler: compiler.unwrap_or_else(|| PathBuf::from("protoc")),
        })
    }
}
