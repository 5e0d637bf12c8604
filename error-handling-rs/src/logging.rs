//! # Structured Logging
//!
//! Initialises `tracing` output for the pipeline and logs classified errors at
//! a level derived from their severity.

use std::sync::atomic::{AtomicBool, Ordering};

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::types::{ClassifiedError, Severity};

// Flag to track if logging has been initialized
static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

// Keeps the non-blocking file writer flushing for the life of the process
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log filter '{0}': {1}")]
    InvalidFilter(String, String),

    #[error("File output requested without a log directory")]
    MissingLogDir,

    #[error("Failed to set global subscriber: {0}")]
    Init(String),
}

/// Configuration for the logging system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// The log level or filter directive (trace, debug, info, warn, error)
    pub level: String,
    /// The service name for identification
    pub service_name: String,
    /// Whether to use JSON formatting on stderr
    pub json_format: bool,
    /// Whether to also write logs to a daily-rolling file
    pub file_output: bool,
    /// The directory to store log files in
    pub log_dir: Option<String>,
    /// Whether to include the event target
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            service_name: "review-pipeline".to_string(),
            json_format: false,
            file_output: false,
            log_dir: None,
            with_target: true,
        }
    }
}

/// Initializes the structured logging system.
///
/// `RUST_LOG` takes precedence over the configured level. Calling this more
/// than once is a no-op.
pub fn init_logging(config: Option<LoggingConfig>) -> Result<(), LoggingError> {
    if LOGGING_INITIALIZED.load(Ordering::SeqCst) {
        return Ok(());
    }

    let config = config.unwrap_or_default();

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| LoggingError::InvalidFilter(config.level.clone(), e.to_string()))?,
    };

    let json_layer = config.json_format.then(|| {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(config.with_target)
            .with_writer(std::io::stderr)
    });

    let text_layer = (!config.json_format).then(|| {
        fmt::layer()
            .with_target(config.with_target)
            .with_writer(std::io::stderr)
    });

    let file_layer = if config.file_output {
        let log_dir = config.log_dir.as_deref().ok_or(LoggingError::MissingLogDir)?;
        let appender = RollingFileAppender::new(
            Rotation::DAILY,
            log_dir,
            format!("{}.log", config.service_name),
        );
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);

        Some(fmt::layer().with_writer(non_blocking).with_ansi(false))
    } else {
        None
    };

    Registry::default()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))?;

    LOGGING_INITIALIZED.store(true, Ordering::SeqCst);

    tracing::info!(
        service = %config.service_name,
        level = %config.level,
        json = %config.json_format,
        "Structured logging initialized"
    );

    Ok(())
}

/// Logs a classified error at the level matching its severity
pub fn log_classified_error(error: &ClassifiedError) {
    use tracing::{error, info, warn};

    let operation = error.context().map(|c| c.operation()).unwrap_or("unknown");
    let file = error
        .context()
        .and_then(|c| c.file_path())
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    let attempt = error.context().map(|c| c.attempt_number()).unwrap_or(1);

    match error.severity() {
        Severity::Critical | Severity::High => {
            error!(
                error_id = %error.id(),
                error_kind = %error.kind(),
                severity = %error.severity(),
                retryable = error.is_retryable(),
                operation = %operation,
                file = %file,
                attempt = attempt,
                message = %error.message(),
                guidance = %error.user_guidance(),
                "Error occurred"
            );
        }
        Severity::Medium => {
            warn!(
                error_id = %error.id(),
                error_kind = %error.kind(),
                severity = %error.severity(),
                retryable = error.is_retryable(),
                operation = %operation,
                file = %file,
                attempt = attempt,
                message = %error.message(),
                "Error occurred"
            );
        }
        Severity::Low => {
            info!(
                error_id = %error.id(),
                error_kind = %error.kind(),
                operation = %operation,
                file = %file,
                message = %error.message(),
                "Minor error occurred"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ErrorContext;

    #[test]
    fn test_file_output_requires_dir() {
        let config = LoggingConfig {
            file_output: true,
            log_dir: None,
            ..Default::default()
        };
        assert!(matches!(init_logging(Some(config)), Err(LoggingError::MissingLogDir)));
    }

    #[test]
    fn test_log_classified_error_without_subscriber() {
        let err = ClassifiedError::network("reset")
            .with_context(ErrorContext::for_file("review_file", "a.rs"));
        log_classified_error(&err);
        log_classified_error(&ClassifiedError::authentication("401"));
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: LoggingConfig = serde_json::from_str(r#"{"level": "debug"}"#).unwrap();
        assert_eq!(config.level, "debug");
        assert_eq!(config.service_name, "review-pipeline");
        assert!(!config.file_output);
    }
}
