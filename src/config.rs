//! Ledger configuration: file locations and the admission mode.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "ROUTE_LEDGER_CONFIG";
/// Environment override for [`LedgerConfig::registry_path`].
pub const REGISTRY_ENV: &str = "ROUTE_LEDGER_REGISTRY";
/// Environment override for [`LedgerConfig::topology_path`].
pub const TOPOLOGY_ENV: &str = "ROUTE_LEDGER_TOPOLOGY";
/// Environment override for [`LedgerConfig::ledger_path`].
pub const LEDGER_ENV: &str = "ROUTE_LEDGER_LOG";
/// Environment override for [`LedgerConfig::serialize_commits`].
pub const SERIALIZE_ENV: &str = "ROUTE_LEDGER_SERIALIZE";

/// Errors raised while loading configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Underlying filesystem failure.
    #[error("config I/O error: {0}")]
    Io(String),
    /// JSON decoding failure.
    #[error("config parse error: {0}")]
    Parse(String),
}

/// Paths and switches used by the CLI and [`LedgerState::from_config`](crate::LedgerState::from_config).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// JSON participant registry.
    pub registry_path: PathBuf,
    /// JSON topology store.
    pub topology_path: PathBuf,
    /// Append-only JSON-lines log of accepted records.
    pub ledger_path: PathBuf,
    /// Hold a per-prefix lock across validate and commit.
    pub serialize_commits: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            registry_path: PathBuf::from("route_ledger/registry.json"),
            topology_path: PathBuf::from("route_ledger/topology.json"),
            ledger_path: PathBuf::from("route_ledger/ledger.jsonl"),
            serialize_commits: true,
        }
    }
}

impl LedgerConfig {
    /// Loads the configuration from `path`, or from `$ROUTE_LEDGER_CONFIG`
    /// when `path` is `None`, then applies environment overrides.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parses a configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|err| ConfigError::Io(err.to_string()))?;
        serde_json::from_str(&contents).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Applies overrides looked up through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(REGISTRY_ENV).filter(|v| !v.is_empty()) {
            self.registry_path = PathBuf::from(value);
        }
        if let Some(value) = lookup(TOPOLOGY_ENV).filter(|v| !v.is_empty()) {
            self.topology_path = PathBuf::from(value);
        }
        if let Some(value) = lookup(LEDGER_ENV).filter(|v| !v.is_empty()) {
            self.ledger_path = PathBuf::from(value);
        }
        if let Some(value) = lookup(SERIALIZE_ENV) {
            self.serialize_commits = !matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "0" | "false" | "no" | "off"
            );
        }
    }
}
