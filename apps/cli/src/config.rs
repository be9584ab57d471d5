//! Layered configuration: defaults → `faunakeys.toml` → `FAUNAKEYS_*` env → flags

use std::path::PathBuf;

use anyhow::Context;
use faunakeys_engine::BackendConfig;
use faunakeys_engine::issuer::fauna::FaunaConnectorConfig;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::cli::GlobalArgs;

/// Variables owned by `faunakeys_log::Config::from_env`
const LOG_VARS: &[&str] = &["LOG", "LOG_FORMAT", "LOG_TIME", "LOG_SOURCE", "LOG_COLORS"];

/// Effective CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// JSON file standing in for the host's durable storage
    pub state_file: PathBuf,

    pub backend: BackendConfig,

    pub issuer: FaunaConnectorConfig,

    pub log: faunakeys_log::Config,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("faunakeys-state.json"),
            backend: BackendConfig::default(),
            issuer: FaunaConnectorConfig::default(),
            log: faunakeys_log::Config::from_env(),
        }
    }
}

impl CliConfig {
    /// Merge every layer and validate the result
    pub fn load(args: &GlobalArgs) -> anyhow::Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(&args.config))
            .merge(Env::prefixed("FAUNAKEYS_").ignore(LOG_VARS).split("__"));

        if let Some(state_file) = &args.state_file {
            figment = figment.merge(("state_file", state_file));
        }
        if let Some(level) = &args.log_level {
            figment = figment.merge(("log.level", level));
        }

        let config: Self = figment
            .extract()
            .with_context(|| format!("loading configuration from {}", args.config.display()))?;

        config.backend.validate().context("invalid [backend] section")?;
        config.issuer.validate().context("invalid [issuer] section")?;
        Ok(config)
    }
}
