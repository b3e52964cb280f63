use std::{
    path::{Path, PathBuf},
    process::Command,
};

use log::{debug, trace};
use thiserror::Error;

use crate::args::Invocation;

#[derive(Error, Debug)]
pub enum CompilerError {
    #[error("Could not run {compiler}: {source}")]
    Spawn {
        compiler: String,
        source: std::io::Error,
    },
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
}

/// Runs the compiler once per input file, or once with only the flags when
/// there are no inputs. Returns the first non-zero exit code.
pub fn run(compiler: &Path, invocation: Invocation) -> Result<i32, CompilerError> {
    let Invocation { flags, files } = invocation;
    let files = expand_dirs(files)?;
    if files.is_empty() {
        return execute(compiler, &flags);
    }
    for file in files {
        let mut args = flags.clone();
        args.push(file.to_string_lossy().into_owned());
        let code = execute(compiler, &args)?;
        if code != 0 {
            return Ok(code);
        }
    }
    Ok(0)
}

/// Replaces directories with the `.proto` files they contain.
pub fn expand_dirs(paths: Vec<PathBuf>) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found = find_proto_files(&path)?;
            found.sort();
            files.extend(found);
        } else {
            files.push(path);
        }
    }
    Ok(files)
}

fn find_proto_files(dir: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            files.extend(find_proto_files(&path)?);
        } else if path.extension().is_some_and(|extension| extension == "proto") {
            files.push(path);
        }
    }
    Ok(files)
}

/// Runs `compiler` with the current stdio and returns its exit code. A
/// process killed by a signal counts as exit code 1.
pub fn execute(compiler: &Path, args: &[String]) -> Result<i32, CompilerError> {
    debug!("Running {} {}", compiler.display(), args.join(" "));
    let status = Command::new(compiler)
        .args(args)
        .status()
        .map_err(|source| CompilerError::Spawn {
            compiler: compiler.display().to_string(),
            source,
        })?;
    trace!("{} exited with {}", compiler.display(), status);
    Ok(status.code().unwrap_or(1))
}
