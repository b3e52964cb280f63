use std::{collections::HashMap, path::PathBuf};

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

use crate::git::{BackendKind, Protocol};

/// Settings read from `PROTOC_*` environment variables.
#[derive(Debug)]
pub struct WrapperConfig {
    pub cache_dir: Option<PathBuf>,
    pub git_backend: BackendKind,
    pub git_protocol: Protocol,
    pub compiler: Option<PathBuf>,
}

impl WrapperConfig {
    pub fn load() -> anyhow::Result<Self> {
        Ok(Self::from_raw(RawConfig::load(None)?))
    }

    fn from_raw(raw_config: RawConfig) -> Self {
        Self {
            cache_dir: raw_config.cache.dir,
            git_backend: raw_config.git.backend.unwrap_or_default(),
            git_protocol: raw_config.git.protocol.unwrap_or_default(),
            compiler: raw_config.compiler,
        }
    }
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct RawConfig {
    #[serde(default)]
    cache: CacheConfig,
    #[serde(default)]
    git: GitConfig,
    compiler: Option<PathBuf>,
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct CacheConfig {
    dir: Option<PathBuf>,
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct GitConfig {
    backend: Option<BackendKind>,
    protocol: Option<Protocol>,
}

impl RawConfig {
    fn load(env: Option<HashMap<String, String>>) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(
                Environment::with_prefix("PROTOC")
                    .separator("_")
                    .source(env),
            )
            .build()?
            .try_deserialize()
    }
}
