//! Configuration management for Tollgate.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::error::{Result, TollgateError};
use crate::quota::{RulesConfig, StoreSettings, DEFAULT_MAX_ENTRIES};

/// Prefix for environment variable overrides, e.g. `TOLLGATE_STORE__MAX_ENTRIES`.
const ENV_PREFIX: &str = "TOLLGATE";

/// Main configuration for the Tollgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Rate limiting policies and routes
    #[serde(default)]
    pub rate_limiting: RulesConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Peers whose `X-Forwarded-For`/`X-Real-IP` headers are believed
    #[serde(default)]
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            trusted_proxies: Vec::new(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum number of tracked client keys
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Hard lifetime ceiling for an entry, in seconds
    #[serde(default = "default_max_entry_age")]
    pub max_entry_age_secs: u64,

    /// Interval between background sweeps, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            max_entry_age_secs: default_max_entry_age(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_max_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}

fn default_max_entry_age() -> u64 {
    2 * 60 * 60
}

fn default_sweep_interval() -> u64 {
    5 * 60
}

impl StoreConfig {
    /// Validated store limits.
    pub fn settings(&self) -> Result<StoreSettings> {
        StoreSettings::new(self.max_entries, Duration::from_secs(self.max_entry_age_secs))
    }

    /// Validated sweep interval.
    pub fn sweep_interval(&self) -> Result<Duration> {
        if self.sweep_interval_secs == 0 {
            return Err(TollgateError::InvalidConfig(
                "sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(Duration::from_secs(self.sweep_interval_secs))
    }
}

impl TollgateConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| TollgateError::Config(e.to_string()))
    }

    /// Load configuration from an optional YAML file, then apply
    /// `TOLLGATE_*` environment overrides (nested keys separated by `__`).
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::new(path, config::FileFormat::Yaml));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| TollgateError::Config(e.to_string()))
    }
}
