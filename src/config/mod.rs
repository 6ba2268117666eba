//! Configuration management for crosswalk
//!
//! Layered configuration: struct defaults, then a TOML file, then
//! environment variables (highest priority).
//!
//! # Environment Variables
//!
//! Settings can be overridden with the pattern `CROSSWALK__<section>__<key>`:
//!
//! - `CROSSWALK__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `CROSSWALK__PIPELINE__MODEL_VERSION=v2`
//! - `CROSSWALK__SCIENCE__BASE_URL=http://science:8091`
//!
//! # Configuration File
//!
//! By default the configuration is loaded from `config/crosswalk.toml`;
//! override the path with the `CROSSWALK_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use models::{
    AgentConfig, Config, PipelineConfig, QueueConfig, RetentionConfig, ScienceConfig,
    ServerConfig, WorkerConfig,
};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[pipeline]
top_k = 5

[queue]
visibility_timeout_secs = 600
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.pipeline.top_k, 5);
        assert_eq!(config.queue.visibility_timeout_secs, 600);
    }

    #[test]
    fn test_validation_catches_bad_threshold() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[pipeline]
rerank_min = 2.0
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(ValidationError::RerankMinOutOfRange(_))
        ));
    }
}
