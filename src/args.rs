use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use log::debug;

use crate::resolver::{ResolveError, ResolveImport};

const INCLUDE_PREFIXES: [&str; 3] = ["--proto_path=", "-I=", "-I"];

/// Arguments for the compiler after remote imports were resolved.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Invocation {
    /// Options, including the include paths added for resolved imports.
    pub flags: Vec<String>,
    /// Input files and directories.
    pub files: Vec<PathBuf>,
}

/// Splits compiler arguments into flags and inputs, replacing remote imports
/// with files from the repository cache.
pub fn process_args<R: ResolveImport>(
    args: impl IntoIterator<Item = String>,
    resolver: &R,
) -> Result<Invocation, ResolveError> {
    let mut invocation = Invocation::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg.starts_with('-') {
            // `-I <dir>` is the same as `-I=<dir>`
            if arg == "-I" {
                if let Some(dir) = args.next() {
                    let arg = format!("-I={dir}");
                    invocation.flags.push(rewrite_include(arg, resolver.include_root()));
                    continue;
                }
            }
            invocation.flags.push(rewrite_include(arg, resolver.include_root()));
        } else if is_local(&arg) {
            invocation.files.push(PathBuf::from(arg));
        } else {
            let local = resolver.resolve_import(&arg)?;
            debug!("Resolved {} to {}", arg, local.display());
            if let Some(dir) = local.parent() {
                invocation.flags.push(format!("-I{}", dir.display()));
            }
            invocation.files.push(local);
        }
    }
    Ok(invocation)
}

/// Include paths that do not exist locally point into the repository cache.
fn rewrite_include(arg: String, include_root: &Path) -> String {
    let path = INCLUDE_PREFIXES
        .iter()
        .find_map(|prefix| arg.strip_prefix(prefix));
    match path {
        Some(path) if !path.is_empty() && !is_local(path) => {
            format!("-I={}", include_root.join(path).display())
        }
        _ => arg,
    }
}

/// Anything but a definite "not found" counts as local, so the compiler gets
/// to report other errors itself.
fn is_local(path: &str) -> bool {
    match std::fs::metadata(path) {
        Err(error) => error.kind() != ErrorKind::NotFound,
        Ok(_) => true,
    }
}
