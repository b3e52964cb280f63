use std::path::{Path, PathBuf};

use crate::{
    args::process_args,
    compiler,
    resolver::{ImportResolver, ResolveError},
};

mod builder;

pub use builder::ProtocRemoteBuilder;

pub struct ProtocRemote {
    resolver: ImportResolver,
    compiler: PathBuf,
}

impl ProtocRemote {
    pub fn builder() -> ProtocRemoteBuilder {
        ProtocRemoteBuilder::default()
    }

    pub fn compiler(&self) -> &Path {
        &self.compiler
    }

    /// Resolves a single `<path>[@<revision>]` import to a file in the cache.
    pub fn resolve(&self, token: &str) -> Result<PathBuf, ResolveError> {
        self.resolver.resolve(token)
    }

    /// Resolves remote imports in `args` and runs the compiler, returning its
    /// exit code.
    ///
    /// The cache lock is released before the compiler starts.
    pub fn run(self, args: impl IntoIterator<Item = String>) -> anyhow::Result<i32> {
        let Self { resolver, compiler } = self;
        let invocation = process_args(args, &resolver)?;
        drop(resolver);
        Ok(compiler::run(&compiler, invocation)?)
    }
}
