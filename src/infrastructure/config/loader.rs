use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid poll interval: {0}ms. Must be at least 100ms")]
    InvalidPollInterval(u64),

    #[error("Invalid channel capacity: {0}. Must be at least 16")]
    InvalidChannelCapacity(usize),

    #[error("Worker runtime cannot be empty")]
    EmptyWorkerRuntime,

    #[error("Data directory cannot be empty or absolute")]
    InvalidDataDir(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .autoclaude/config.yaml (project config)
    /// 3. .autoclaude/local.yaml (project local overrides, optional)
    /// 4. Environment variables (AUTOCLAUDE_* prefix, highest priority)
    ///
    /// Configuration is always project-local (pwd/.autoclaude/) so one
    /// machine can orchestrate several projects with different settings.
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".autoclaude/config.yaml"))
            .merge(Yaml::file(".autoclaude/local.yaml"))
            .merge(Env::prefixed("AUTOCLAUDE_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
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

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.worker.runtime.trim().is_empty() {
            return Err(ConfigError::EmptyWorkerRuntime);
        }

        if config.paths.data_dir.is_empty() || config.paths.data_dir.starts_with('/') {
            return Err(ConfigError::InvalidDataDir(config.paths.data_dir.clone()));
        }

        if config.watcher.poll_interval_ms < 100 {
            return Err(ConfigError::InvalidPollInterval(
                config.watcher.poll_interval_ms,
            ));
        }

        if config.events.channel_capacity < 16 {
            return Err(ConfigError::InvalidChannelCapacity(
                config.events.channel_capacity,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ConfigLoader::validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_rejects_short_poll_interval() {
        let mut config = Config::default();
        config.watcher.poll_interval_ms = 10;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidPollInterval(10))
        ));
    }

    #[test]
    fn test_rejects_bad_log_level() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogLevel(_))
        ));
    }

    #[test]
    fn test_rejects_empty_runtime() {
        let mut config = Config::default();
        config.worker.runtime = "  ".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::EmptyWorkerRuntime)
        ));
    }

    #[test]
    fn test_rejects_absolute_data_dir() {
        let mut config = Config::default();
        config.paths.data_dir = "/var/autoclaude".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidDataDir(_))
        ));
    }
}
