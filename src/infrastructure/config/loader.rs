//! Hierarchical configuration loading.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::Config;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Queue concurrency for {0} must be at least 1")]
    InvalidQueueConcurrency(&'static str),

    #[error(
        "Orchestrator queue concurrency must be exactly 1 (got {0}); \
         route decisions are serialised through it"
    )]
    OrchestratorNotSerial(usize),

    #[error("Agent heartbeat ({heartbeat_ms} ms) must be below the hard timeout ({timeout_ms} ms)")]
    HeartbeatAboveTimeout { heartbeat_ms: u64, timeout_ms: u64 },

    #[error("Polling interval must be at least 1 second")]
    InvalidPollInterval,
}

/// Loader with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. `.maestro/config.yaml`
    /// 3. `.maestro/local.yaml` (optional overrides)
    /// 4. Environment variables (`MAESTRO_` prefix)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".maestro/config.yaml"))
            .merge(Yaml::file(".maestro/local.yaml"))
            .merge(Env::prefixed("MAESTRO_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

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
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.queues.architect == 0 {
            return Err(ConfigError::InvalidQueueConcurrency("architect"));
        }
        if config.queues.code_writer == 0 {
            return Err(ConfigError::InvalidQueueConcurrency("code_writer"));
        }
        if config.queues.reviewer == 0 {
            return Err(ConfigError::InvalidQueueConcurrency("reviewer"));
        }
        if config.queues.orchestrator != 1 {
            return Err(ConfigError::OrchestratorNotSerial(config.queues.orchestrator));
        }

        if config.agent.heartbeat_ms >= config.agent.timeout_ms {
            return Err(ConfigError::HeartbeatAboveTimeout {
                heartbeat_ms: config.agent.heartbeat_ms,
                timeout_ms: config.agent.timeout_ms,
            });
        }

        if config.polling.interval_secs == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        ConfigLoader::validate(&Config::default()).unwrap();
    }

    #[test]
    fn orchestrator_concurrency_is_pinned_to_one() {
        let mut config = Config::default();
        config.queues.orchestrator = 2;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::OrchestratorNotSerial(2))
        ));
    }

    #[test]
    fn heartbeat_must_stay_below_timeout() {
        let mut config = Config::default();
        config.agent.heartbeat_ms = config.agent.timeout_ms;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::HeartbeatAboveTimeout { .. })
        ));
    }
}
