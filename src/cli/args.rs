use clap::Parser;

/// Runs protoc, fetching imports such as `github.com/org/repo/file.proto@v1.0.0`
/// from their git repositories first.
#[derive(Debug, Parser)]
#[command(name = "protoc-remote", disable_help_flag = true, disable_version_flag = true)]
pub struct CliArgs {
    /// Compiler arguments. Remote imports and include paths are rewritten to
    /// point into the cache, everything else is passed through.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl CliArgs {
    /// `--version` anywhere reports the wrapper version in addition to the
    /// compiler's.
    pub fn is_version_request(&self) -> bool {
        self.args.iter().any(|arg| arg == "--version")
    }
}
