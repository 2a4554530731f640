use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::Config;

/// Configuration error types (§10.3).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("figment extraction failed: {0}")]
    Extraction(#[from] figment::Error),

    #[error("invalid log level: {0}. must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("invalid log format: {0}. must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("database path cannot be empty")]
    EmptyDatabasePath,

    #[error("invalid database max_connections: {0}. must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("invalid retry.max_attempts: {0}. must be at least 1")]
    InvalidMaxAttempts(u32),

    #[error("invalid retry backoff: base_ms ({0}) must be less than cap_ms ({1})")]
    InvalidBackoff(u64, u64),

    #[error("invalid circuit_breaker.failure_threshold: {0}. must be at least 1")]
    InvalidFailureThreshold(u32),

    #[error("invalid circuit_breaker.success_threshold: {0}. must be at least 1")]
    InvalidSuccessThreshold(u32),

    #[error("invalid svapna.surprise_threshold: {0}. must be in [0, 1]")]
    InvalidSurpriseThreshold(f64),

    #[error("invalid svapna.min_success_rate: {0}. must be in [0, 1]")]
    InvalidMinSuccessRate(f64),
}

/// Loads `Config` with hierarchical merging (§10.3).
///
/// Precedence (lowest to highest):
/// 1. Programmatic defaults (`Config::default`)
/// 2. `.nidra/config.yaml`, if present
/// 3. Environment variables prefixed `NIDRA_`, double-underscore nested
///    (e.g. `NIDRA_RETRY__MAX_ATTEMPTS=5`)
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load() -> Result<Config, ConfigError> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".nidra/config.yaml"))
            .merge(Env::prefixed("NIDRA_").split("__"))
            .extract()?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config, ConfigError> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }

        if config.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(config.retry.max_attempts));
        }
        if config.retry.base_ms >= config.retry.cap_ms {
            return Err(ConfigError::InvalidBackoff(config.retry.base_ms, config.retry.cap_ms));
        }

        if config.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::InvalidFailureThreshold(config.circuit_breaker.failure_threshold));
        }
        if config.circuit_breaker.success_threshold == 0 {
            return Err(ConfigError::InvalidSuccessThreshold(config.circuit_breaker.success_threshold));
        }

        if !(0.0..=1.0).contains(&config.svapna.surprise_threshold) {
            return Err(ConfigError::InvalidSurpriseThreshold(config.svapna.surprise_threshold));
        }
        if !(0.0..=1.0).contains(&config.svapna.min_success_rate) {
            return Err(ConfigError::InvalidMinSuccessRate(config.svapna.min_success_rate));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = Config::default();
        ConfigLoader::validate(&config).expect("default config should be valid");
    }

    #[test]
    fn rejects_unknown_log_level() {
        let mut config = Config::default();
        config.logging.level = "verbose".into();
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidLogLevel(_))));
    }

    #[test]
    fn rejects_backoff_where_base_exceeds_cap() {
        let mut config = Config::default();
        config.retry.base_ms = 40_000;
        config.retry.cap_ms = 30_000;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidBackoff(_, _))));
    }

    #[test]
    fn env_override_takes_precedence_over_default() {
        temp_env::with_var("NIDRA_RETRY__MAX_ATTEMPTS", Some("7"), || {
            let config: Config = Figment::new()
                .merge(Serialized::defaults(Config::default()))
                .merge(Env::prefixed("NIDRA_").split("__"))
                .extract()
                .expect("extract");
            assert_eq!(config.retry.max_attempts, 7);
        });
    }

    #[test]
    fn yaml_file_overrides_defaults_for_nested_fields() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "svapna:\n  surprise_threshold: 0.9\n  project: demo").unwrap();
        file.flush().unwrap();

        let config = ConfigLoader::load_from_file(file.path()).expect("load");
        assert_eq!(config.svapna.surprise_threshold, 0.9);
        assert_eq!(config.svapna.project.as_deref(), Some("demo"));
        assert_eq!(config.retry.max_attempts, 3, "unrelated defaults stay put");
    }
}
