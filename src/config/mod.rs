//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "GAVEL_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "GAVEL";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "GAVEL_LOG";

use serde::Deserialize;

use crate::hub::HubConfig;
use crate::notify::NotifyConfig;
use crate::scheduler::SchedulerConfig;

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file path.
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "data/gavel.db".to_string(),
        }
    }
}

/// Marketplace business rules.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusinessConfig {
    /// Participation deposit as a percentage of the starting price.
    pub deposit_percent: i64,
    /// Seller's share of a forfeited deposit, in percent. The rest
    /// returns to the defaulting winner.
    pub forfeit_percent: i64,
    /// Hours the winner has to pay after the auction ends.
    pub payment_window_hours: i64,
    /// Reminder times, in hours after the auction ends.
    pub reminder_offsets_hours: Vec<i64>,
}

impl Default for BusinessConfig {
    fn default() -> Self {
        Self {
            deposit_percent: 10,
            forfeit_percent: 50,
            payment_window_hours: 48,
            reminder_offsets_hours: vec![6, 24, 36],
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Business rules.
    pub business: BusinessConfig,
    /// Task scheduler configuration.
    pub scheduler: SchedulerConfig,
    /// Event hub configuration.
    pub hub: HubConfig,
    /// Notification queue configuration.
    pub notify: NotifyConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }
}
