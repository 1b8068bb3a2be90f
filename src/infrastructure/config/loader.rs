//! Hierarchical configuration loading.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration validation failures. Fatal at startup; the worker
/// refuses to serve on a misconfigured backend.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid idempotency lock_timeout_ms: {0}. Must be positive")]
    InvalidLockTimeout(u64),

    #[error("Invalid idempotency max_attempts: {0}. Cannot be 0")]
    InvalidMaxAttempts(u32),

    #[error("failed_ttl_ms ({0}) must not exceed completed_ttl_ms ({1})")]
    InvalidTtlOrder(u64, u64),

    #[error("Invalid heartbeat configuration: stale_threshold_ms ({0}) must exceed interval_ms ({1})")]
    InvalidHeartbeat(u64, u64),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),
}

/// Configuration loader with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. `.gwi/config.yaml` (project config)
    /// 3. `.gwi/local.yaml` (local overrides, optional)
    /// 4. Environment variables (`GWI_*` prefix, `__` section separator)
    ///
    /// Configuration is always project-local so one machine can host
    /// several installations against different repositories.
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".gwi/config.yaml"))
            .merge(Yaml::file(".gwi/local.yaml"))
            .merge(Env::prefixed("GWI_").split("__"))
            .extract()
            .context("Failed to extract configuration")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, for tests and one-off
    /// tooling.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.store.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.store.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.store.max_connections,
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.idempotency.lock_timeout_ms == 0 {
            return Err(ConfigError::InvalidLockTimeout(
                config.idempotency.lock_timeout_ms,
            ));
        }
        if config.idempotency.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(
                config.idempotency.max_attempts,
            ));
        }
        if config.idempotency.failed_ttl_ms > config.idempotency.completed_ttl_ms {
            return Err(ConfigError::InvalidTtlOrder(
                config.idempotency.failed_ttl_ms,
                config.idempotency.completed_ttl_ms,
            ));
        }

        if config.heartbeat.stale_threshold_ms <= config.heartbeat.interval_ms {
            return Err(ConfigError::InvalidHeartbeat(
                config.heartbeat.stale_threshold_ms,
                config.heartbeat.interval_ms,
            ));
        }

        if config.retry.initial_backoff_ms >= config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }

        Ok(())
    }
}
