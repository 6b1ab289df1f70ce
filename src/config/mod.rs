//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod messaging;

pub use messaging::{AmqpConfig, NotificationsConfig, DEFAULT_TOKEN_LENGTH};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "MONEYGER_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "MONEYGER";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "MONEYGER_LOG";

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::currency::CurrencyCode;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Notification service (broker) configuration.
    pub notifications: NotificationsConfig,
    /// Currency conversion configuration.
    pub currency: CurrencyConfig,
}

/// Currency conversion configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CurrencyConfig {
    /// Official rate of one unit of each currency, expressed in BYN.
    pub rates: HashMap<CurrencyCode, Decimal>,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ::config::ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new("config", FileFormat::Yaml).required(false))
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        let mut config = Self::default();
        config.currency.rates = HashMap::from([
            (CurrencyCode::Usd, Decimal::new(32, 1)),
            (CurrencyCode::Eur, Decimal::new(35, 1)),
            (CurrencyCode::Rub, Decimal::new(35, 3)),
        ]);
        config
    }
}
