//! # Pipeline Configuration
//!
//! Configuration for the review pipeline, loaded from an optional TOML file
//! and `REVIEW_PIPELINE__*` environment overrides. The entry point builds one
//! [`PipelineConfig`] and passes it down by reference.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use error_handling::{BackoffConfig, LoggingConfig, RetryOptions};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::mode::{ModeOverrides, DEFAULT_SEQUENTIAL_THRESHOLD};
use crate::sequential::SequentialOptions;

/// Environment variable prefix for overrides, e.g.
/// `REVIEW_PIPELINE__PROCESSING__MAX_ERRORS=5`
pub const ENV_PREFIX: &str = "REVIEW_PIPELINE";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Validation hook for configuration sections
pub trait ConfigValidator {
    fn validate(&self) -> Result<(), ConfigError>;
}

/// Batch execution settings, as exposed on the command line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Always process files one at a time
    pub force_sequential: bool,
    /// Always process files concurrently, unless sequential is also forced
    pub force_parallel: bool,
    /// Batches up to this size run sequentially
    pub sequential_threshold: usize,
    /// Keep going after a file fails
    pub continue_on_error: bool,
    /// Stop starting new files once this many have failed
    pub max_errors: Option<usize>,
    /// Concurrent file limit in parallel mode; unset means the safety cap
    pub max_concurrency: Option<usize>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            force_sequential: false,
            force_parallel: false,
            sequential_threshold: DEFAULT_SEQUENTIAL_THRESHOLD,
            continue_on_error: true,
            max_errors: None,
            max_concurrency: None,
        }
    }
}

impl ProcessingConfig {
    pub fn mode_overrides(&self) -> ModeOverrides {
        ModeOverrides {
            force_sequential: self.force_sequential,
            force_parallel: self.force_parallel,
            threshold: Some(self.sequential_threshold),
        }
    }

    pub fn sequential_options(&self) -> SequentialOptions {
        SequentialOptions {
            continue_on_error: self.continue_on_error,
            max_errors: self.max_errors,
        }
    }
}

impl ConfigValidator for ProcessingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_errors == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_errors must be at least 1 when set".to_string(),
            ));
        }
        if self.max_concurrency == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_concurrency must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Retry, backoff and fallback settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub enable_retry: bool,
    pub max_attempts: u32,
    pub enable_fallback: bool,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub min_jitter: f64,
    pub max_jitter: f64,
    pub rate_limit_cap_ms: u64,
    pub recovery_cap_ms: u64,
    /// Per-attempt timeout; unset means attempts may run indefinitely
    pub attempt_timeout_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let backoff = BackoffConfig::default();
        Self {
            enable_retry: true,
            max_attempts: 3,
            enable_fallback: true,
            base_delay_ms: backoff.base_delay.as_millis() as u64,
            max_delay_ms: backoff.max_delay.as_millis() as u64,
            multiplier: backoff.multiplier,
            min_jitter: backoff.min_jitter,
            max_jitter: backoff.max_jitter,
            rate_limit_cap_ms: backoff.rate_limit_cap.as_millis() as u64,
            recovery_cap_ms: backoff.recovery_cap.as_millis() as u64,
            attempt_timeout_ms: None,
        }
    }
}

impl RetryConfig {
    pub fn backoff_config(&self) -> BackoffConfig {
        BackoffConfig {
            base_delay: Duration::from_millis(self.base_delay_ms),
            multiplier: self.multiplier,
            max_delay: Duration::from_millis(self.max_delay_ms),
            min_jitter: self.min_jitter,
            max_jitter: self.max_jitter,
            rate_limit_cap: Duration::from_millis(self.rate_limit_cap_ms),
            recovery_cap: Duration::from_millis(self.recovery_cap_ms),
        }
    }

    pub fn retry_options(&self) -> RetryOptions {
        RetryOptions {
            enable_retry: self.enable_retry,
            max_attempts: self.max_attempts,
            enable_fallback: self.enable_fallback,
            attempt_timeout: self.attempt_timeout_ms.map(Duration::from_millis),
        }
    }
}

impl ConfigValidator for RetryConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.attempt_timeout_ms == Some(0) {
            return Err(ConfigError::Validation(
                "retry.attempt_timeout_ms must be greater than zero when set".to_string(),
            ));
        }
        self.backoff_config()
            .validate()
            .map_err(|e| ConfigError::Validation(format!("retry: {}", e)))
    }
}

impl ConfigValidator for LoggingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.file_output && self.log_dir.is_none() {
            return Err(ConfigError::Validation(
                "logging.log_dir is required when logging.file_output is enabled".to_string(),
            ));
        }
        Ok(())
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub processing: ProcessingConfig,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
}

impl ConfigValidator for PipelineConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.processing.validate()?;
        self.retry.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

impl PipelineConfig {
    /// Loads `.env`, then the optional TOML file at `path`, then
    /// `REVIEW_PIPELINE__*` overrides, and validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let mut builder = Config::builder();
        if let Some(path) = path {
            debug!(path = %path.display(), "Loading pipeline configuration file");
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: PipelineConfig = settings.try_deserialize()?;
        config.validate()?;

        info!(
            sequential_threshold = config.processing.sequential_threshold,
            max_attempts = config.retry.max_attempts,
            "Pipeline configuration loaded"
        );

        Ok(config)
    }

    /// Parses and validates configuration from TOML text, without
    /// environment overrides.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = Config::builder()
            .add_source(File::from_str(contents, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::ProcessingMode;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.processing.sequential_threshold, DEFAULT_SEQUENTIAL_THRESHOLD);
        assert!(config.processing.continue_on_error);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [processing]
            force_sequential = true
            max_errors = 2

            [retry]
            max_attempts = 5
            attempt_timeout_ms = 1500
            "#,
        )
        .unwrap();

        assert!(config.processing.force_sequential);
        assert_eq!(config.processing.max_errors, Some(2));
        assert_eq!(config.processing.sequential_threshold, DEFAULT_SEQUENTIAL_THRESHOLD);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(
            config.retry.retry_options().attempt_timeout,
            Some(Duration::from_millis(1500))
        );
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn test_overrides_drive_mode_selection() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [processing]
            sequential_threshold = 5
            "#,
        )
        .unwrap();

        let overrides = config.processing.mode_overrides();
        assert_eq!(crate::mode::select(2, &overrides), ProcessingMode::Sequential);
        assert_eq!(crate::mode::select(50, &overrides), ProcessingMode::Parallel);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = PipelineConfig::from_toml_str("[retry]\nmax_attempts = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));

        let err = PipelineConfig::from_toml_str("[retry]\nmultiplier = 1.05\n").unwrap_err();
        assert!(err.to_string().contains("multiplier"));

        let err = PipelineConfig::from_toml_str("[processing]\nmax_concurrency = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));

        let err = PipelineConfig::from_toml_str("[logging]\nfile_output = true\n").unwrap_err();
        assert!(err.to_string().contains("log_dir"));
    }

    #[test]
    fn test_malformed_toml_is_load_error() {
        let err = PipelineConfig::from_toml_str("[processing\nbroken").unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }
}
