//! CLI configuration.
//!
//! Sources in increasing precedence: built-in defaults, `tessera.toml` (or
//! the file named by `--config`), `TESSERA_*` environment variables, then
//! command-line flags.

use crate::logging::LogFormat;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tessera_git::protocol::DEFAULT_AGENT;
use tessera_git::UploadPackOptions;

/// Config file read when `--config` is not given. Missing is fine.
pub const DEFAULT_CONFIG_FILE: &str = "tessera.toml";
/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "TESSERA";

/// Configuration for the `tessera` binary.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
    /// Advertised `agent=` capability.
    pub agent: String,
    /// Allow side-band output from upload-pack.
    pub side_band: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            log_format: LogFormat::Pretty,
            agent: DEFAULT_AGENT.to_string(),
            side_band: true,
        }
    }
}

impl Config {
    /// Loads the configuration. An explicit `path` must exist; the default
    /// file is optional.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        config::Config::builder()
            .add_source(file)
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")
    }

    /// Negotiation settings for upload-pack.
    pub fn upload_pack_options(&self) -> UploadPackOptions {
        UploadPackOptions {
            agent: self.agent.clone(),
            allow_side_band: self.side_band,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.log_level, "warn");
        assert!(config.side_band);
        assert!(config.agent.starts_with("tessera/"));
        assert_eq!(config.upload_pack_options().agent, config.agent);
    }

    #[test]
    fn test_load_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "log_format = \"json\"\nside_band = false\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(!config.side_band);
        assert!(!config.upload_pack_options().allow_side_band);
        // Unset keys keep their defaults.
        assert_eq!(config.agent, DEFAULT_AGENT);
    }

    #[test]
    fn test_explicit_file_must_exist() {
        let dir = TempDir::new().unwrap();
        assert!(Config::load(Some(&dir.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn test_invalid_value_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "log_format = \"xml\"\n").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }
}
