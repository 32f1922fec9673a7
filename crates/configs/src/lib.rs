//! # configs
//!
//! Runtime settings. Sources, later ones winning:
//!
//! 1. built-in defaults
//! 2. `config/wiki.toml`, or the file named by `WIKI_CONFIG` (optional)
//! 3. environment variables such as `WIKI__NODE__ID=7`
//!
//! A `.env` file is loaded into the environment first when present.
//! Validation runs at load time so a bad node id stops the process before
//! any identifier is minted.

use std::time::Duration;

use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config/wiki.toml";
pub const ENV_PREFIX: &str = "WIKI";

/// Largest node id that fits the 10-bit Snowflake field.
pub const MAX_NODE_ID: i64 = 1023;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("node.id must be within 0..=1023, got {0}")]
    InvalidNodeId(i64),

    #[error("invalid setting: {0}")]
    Invalid(String),
}

fn secret<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SecretString, D::Error> {
    String::deserialize(deserializer).map(SecretString::from)
}

#[derive(Debug, Deserialize)]
pub struct NodeSettings {
    pub id: i64,
    pub epoch_ms: i64,
}

#[derive(Debug, Deserialize)]
pub struct LockSettings {
    pub key_prefix: String,
    pub retry_interval_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct SchedulerSettings {
    pub enabled: bool,
    pub interval_secs: u64,
    pub lease_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct RedisSettings {
    #[serde(deserialize_with = "secret")]
    pub url: SecretString,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseSettings {
    #[serde(deserialize_with = "secret")]
    pub url: SecretString,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Deserialize)]
pub struct LogSettings {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub node: NodeSettings,
    pub lock: LockSettings,
    pub scheduler: SchedulerSettings,
    pub redis: RedisSettings,
    pub database: DatabaseSettings,
    pub log: LogSettings,
}

impl Settings {
    /// Loads `.env`, the optional config file and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        // A missing `.env` is fine.
        dotenvy::dotenv().ok();
        let path = std::env::var("WIKI_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let settings: Settings = Self::defaults()?
            .add_source(File::with_name(&path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validated()
    }

    /// Defaults overlaid with a TOML document.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let settings: Settings = Self::defaults()?
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.validated()
    }

    fn defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Ok(Config::builder()
            .set_default("node.id", 0_i64)?
            .set_default("node.epoch_ms", 1_704_067_200_000_i64)?
            .set_default("lock.key_prefix", "wiki:lock:")?
            .set_default("lock.retry_interval_ms", 50_i64)?
            .set_default("scheduler.enabled", true)?
            .set_default("scheduler.interval_secs", 60_i64)?
            .set_default("scheduler.lease_secs", 30_i64)?
            .set_default("redis.url", "redis://127.0.0.1:6379")?
            .set_default("database.url", "postgres://localhost/wiki")?
            .set_default("database.max_connections", 5_i64)?
            .set_default("log.level", "info")?
            .set_default("log.format", "pretty")?)
    }

    fn validated(self) -> Result<Self, ConfigError> {
        if !(0..=MAX_NODE_ID).contains(&self.node.id) {
            return Err(ConfigError::InvalidNodeId(self.node.id));
        }
        if self.lock.retry_interval_ms == 0 {
            return Err(ConfigError::Invalid("lock.retry_interval_ms must be positive".into()));
        }
        if self.scheduler.interval_secs == 0 {
            return Err(ConfigError::Invalid("scheduler.interval_secs must be positive".into()));
        }
        if self.scheduler.lease_secs == 0 {
            return Err(ConfigError::Invalid("scheduler.lease_secs must be positive".into()));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid("database.max_connections must be positive".into()));
        }
        Ok(self)
    }

    pub fn lock_retry_interval(&self) -> Duration {
        Duration::from_millis(self.lock.retry_interval_ms)
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.interval_secs)
    }

    pub fn scheduler_lease(&self) -> Duration {
        Duration::from_secs(self.scheduler.lease_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::from_toml_str("").unwrap();
        assert_eq!(settings.node.id, 0);
        assert_eq!(settings.scheduler_interval(), Duration::from_secs(60));
        assert_eq!(settings.scheduler_lease(), Duration::from_secs(30));
        assert_eq!(settings.lock_retry_interval(), Duration::from_millis(50));
        assert_eq!(settings.log.format, LogFormat::Pretty);
        assert_eq!(settings.redis.url.expose_secret(), "redis://127.0.0.1:6379");
    }

    #[test]
    fn file_values_override_defaults() {
        let settings = Settings::from_toml_str(
            r#"
            [node]
            id = 1023

            [log]
            format = "json"

            [database]
            url = "postgres://wiki:hunter2@db/wiki"
            "#,
        )
        .unwrap();
        assert_eq!(settings.node.id, 1023);
        assert_eq!(settings.log.format, LogFormat::Json);
        assert!(!format!("{:?}", settings.database).contains("hunter2"));
    }

    #[test]
    fn out_of_range_node_id_is_rejected_at_load() {
        for id in ["1024", "-1"] {
            let err = Settings::from_toml_str(&format!("[node]\nid = {id}")).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidNodeId(_)), "{err}");
        }
    }

    #[test]
    fn zero_durations_are_rejected() {
        assert!(matches!(
            Settings::from_toml_str("[scheduler]\ninterval_secs = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Settings::from_toml_str("[scheduler]\nlease_secs = 0"),
            Err(ConfigError::Invalid(_))
        ));
    }
}
