//! # Error Handling Framework
//!
//! Classified errors and recovery machinery for the review pipeline.
//!
//! ## Features
//!
//! - A closed taxonomy of classified errors with fixed severity and retryability
//! - Classification of arbitrary failures, including structured validation errors
//! - Exponential backoff honoring rate-limit and recovery hints
//! - Ordered resolution strategies (retry, fallback, fail, transform)
//! - Retry execution with fallback that never masks the primary error
//! - Recovery metrics with a bounded ring of recent error events
//! - Structured logging initialisation
//!

pub mod backoff;
pub mod classifier;
pub mod context;
pub mod logging;
pub mod metrics;
pub mod resolution;
pub mod retry;
pub mod types;

// Re-export commonly used types
pub use backoff::{should_retry, BackoffConfig, BackoffPolicy};
pub use classifier::{
    try_parse_structured_validation_error, try_parse_structured_validation_value, ErrorClassifier,
    FieldError, MessageRule,
};
pub use context::ErrorContext;
pub use crate::metrics::{recovery_rate, ErrorEvent, ErrorMetrics, MetricsCollector};
pub use logging::{init_logging, log_classified_error, LoggingConfig, LoggingError};
pub use resolution::{ErrorHandler, ErrorResolution, ErrorStrategy, ResolutionStrategy};
pub use retry::{RetryExecutor, RetryOptions};
pub use types::{ClassifiedError, ErrorDetails, ErrorKind, Result, Severity};
