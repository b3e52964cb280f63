use std::process::exit;

use clap::Parser;
use protoc_remote::{cli::args::CliArgs, config::WrapperConfig, ProtocRemoteBuilder};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run() {
        Ok(code) => exit(code),
        Err(e) => {
            log::error!("{}", e);
            exit(1)
        }
    }
}

fn run() -> anyhow::Result<i32> {
    let cli_args = CliArgs::parse();
    if cli_args.is_version_request() {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    }

    let config = WrapperConfig::load()?;
    log::debug!("Loaded configuration: {:?}", config);

    let protoc = ProtocRemoteBuilder::from_config(config).try_build()?;
    protoc.run(cli_args.args)
}
