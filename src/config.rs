use std::{collections::HashMap, path::PathBuf};

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

use crate::digest::DigestType;

const ENV_PREFIX: &str = "PROTOMODULE";

/// Settings read from `PROTOMODULE_*` environment variables.
///
/// | Variable | Default |
/// |---|---|
/// | `PROTOMODULE_DIGEST_TYPE` | `b5` |
/// | `PROTOMODULE_WORKSPACE_FILE` | `protomodule.toml` |
/// | `PROTOMODULE_LOCK_FILE` | `protomodule.lock` |
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ProtomoduleConfig {
    pub digest_type: DigestType,
    pub workspace_file: PathBuf,
    pub lock_file: PathBuf,
}

impl ProtomoduleConfig {
    pub fn load() -> anyhow::Result<Self> {
        Ok(Self::from_env(None)?)
    }

    fn from_env(env: Option<HashMap<String, String>>) -> Result<Self, ConfigError> {
        // no key separator: PROTOMODULE_LOCK_FILE maps to `lock_file`
        Config::builder()
            .set_default("digest_type", DigestType::B5.to_string())?
            .set_default("workspace_file", "protomodule.toml")?
            .set_default("lock_file", "protomodule.lock")?
            .add_source(Environment::with_prefix(ENV_PREFIX).source(env))
            .build()?
            .try_deserialize()
    }
}
