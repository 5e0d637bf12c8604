//! # Error Resolution
//!
//! Decides what to do about one classified error: retry it, fall back to a
//! degraded operation, fail, or surface it in a transformed form. An
//! [`ErrorHandler`] holds an ordered list of strategies; the first strategy
//! that accepts an error produces its [`ErrorResolution`].

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backoff::BackoffPolicy;
use crate::context::ErrorContext;
use crate::logging::log_classified_error;
use crate::metrics::MetricsCollector;
use crate::types::{ClassifiedError, ErrorKind};

/// How an error is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStrategy {
    Retry,
    Fallback,
    Fail,
    Transform,
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionStrategy::Retry => write!(f, "retry"),
            ResolutionStrategy::Fallback => write!(f, "fallback"),
            ResolutionStrategy::Fail => write!(f, "fail"),
            ResolutionStrategy::Transform => write!(f, "transform"),
        }
    }
}

/// The decision taken for one error at one failure site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResolution {
    pub strategy: ResolutionStrategy,
    pub message: String,
    pub should_log: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    /// Replacement data; `None` on a fallback means no usable result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ErrorResolution {
    pub fn retry<S: Into<String>>(message: S, retry_after_ms: Option<u64>) -> Self {
        Self {
            strategy: ResolutionStrategy::Retry,
            message: message.into(),
            should_log: true,
            retry_after_ms,
            data: None,
        }
    }

    pub fn fallback<S: Into<String>>(message: S, data: Option<serde_json::Value>) -> Self {
        Self {
            strategy: ResolutionStrategy::Fallback,
            message: message.into(),
            should_log: true,
            retry_after_ms: None,
            data,
        }
    }

    pub fn fail<S: Into<String>>(message: S) -> Self {
        Self {
            strategy: ResolutionStrategy::Fail,
            message: message.into(),
            should_log: true,
            retry_after_ms: None,
            data: None,
        }
    }

    pub fn transform<S: Into<String>>(message: S) -> Self {
        Self {
            strategy: ResolutionStrategy::Transform,
            message: message.into(),
            should_log: false,
            retry_after_ms: None,
            data: None,
        }
    }

    pub fn quiet(mut self) -> Self {
        self.should_log = false;
        self
    }
}

/// Produces a resolution for the errors it accepts
pub trait ErrorStrategy: Send + Sync + fmt::Debug {
    /// Returns true if this strategy resolves `error`
    fn can_handle(&self, error: &ClassifiedError) -> bool;

    /// Resolves `error` raised in `context`
    fn resolve(&self, error: &ClassifiedError, context: &ErrorContext) -> ErrorResolution;
}

/// Rate limits are retried once the provider allows it
#[derive(Debug, Clone, Default)]
pub struct RateLimitStrategy {
    backoff: BackoffPolicy,
}

impl RateLimitStrategy {
    pub fn new(backoff: BackoffPolicy) -> Self {
        Self { backoff }
    }
}

impl ErrorStrategy for RateLimitStrategy {
    fn can_handle(&self, error: &ClassifiedError) -> bool {
        error.kind() == ErrorKind::RateLimit && error.is_retryable()
    }

    fn resolve(&self, error: &ClassifiedError, context: &ErrorContext) -> ErrorResolution {
        let delay = self.backoff.delay(error, context.attempt_number());
        ErrorResolution::retry(
            format!("Rate limited; waiting {}ms before retrying", delay.as_millis()),
            Some(delay.as_millis() as u64),
        )
    }
}

/// Unavailable services are retried after their estimated recovery
#[derive(Debug, Clone, Default)]
pub struct ServiceUnavailableStrategy {
    backoff: BackoffPolicy,
}

impl ServiceUnavailableStrategy {
    pub fn new(backoff: BackoffPolicy) -> Self {
        Self { backoff }
    }
}

impl ErrorStrategy for ServiceUnavailableStrategy {
    fn can_handle(&self, error: &ClassifiedError) -> bool {
        error.kind() == ErrorKind::ServiceUnavailable && error.is_retryable()
    }

    fn resolve(&self, error: &ClassifiedError, context: &ErrorContext) -> ErrorResolution {
        match error.estimated_recovery() {
            Some(_) => {
                let delay = self.backoff.delay(error, context.attempt_number());
                ErrorResolution::retry("Service unavailable; waiting for estimated recovery", Some(delay.as_millis() as u64))
            }
            None => ErrorResolution::retry("Service unavailable; retrying with backoff", None),
        }
    }
}

/// Invalid input cannot be fixed by retrying; a fallback may still produce
/// a degraded result. The resolution carries no data. A validation error
/// marked retryable by its caller is left to [`TransientStrategy`].
#[derive(Debug, Clone, Default)]
pub struct ValidationStrategy;

impl ErrorStrategy for ValidationStrategy {
    fn can_handle(&self, error: &ClassifiedError) -> bool {
        error.kind() == ErrorKind::Validation && !error.is_retryable()
    }

    fn resolve(&self, error: &ClassifiedError, _context: &ErrorContext) -> ErrorResolution {
        ErrorResolution::fallback(format!("Validation failed: {}", error.message()), None)
    }
}

/// Any other retryable error is retried with exponential backoff
#[derive(Debug, Clone, Default)]
pub struct TransientStrategy;

impl ErrorStrategy for TransientStrategy {
    fn can_handle(&self, error: &ClassifiedError) -> bool {
        error.is_retryable()
    }

    fn resolve(&self, error: &ClassifiedError, _context: &ErrorContext) -> ErrorResolution {
        ErrorResolution::retry(format!("{} is transient; retrying", error.kind()), None)
    }
}

/// Credential and configuration problems are surfaced with their guidance
#[derive(Debug, Clone, Default)]
pub struct GuidanceStrategy;

impl ErrorStrategy for GuidanceStrategy {
    fn can_handle(&self, error: &ClassifiedError) -> bool {
        matches!(
            error.kind(),
            ErrorKind::Authentication | ErrorKind::Permission | ErrorKind::Configuration
        )
    }

    fn resolve(&self, error: &ClassifiedError, _context: &ErrorContext) -> ErrorResolution {
        ErrorResolution::transform(error.user_guidance().to_string())
    }
}

/// Catch-all
#[derive(Debug, Clone, Default)]
pub struct FailStrategy;

impl ErrorStrategy for FailStrategy {
    fn can_handle(&self, _error: &ClassifiedError) -> bool {
        true
    }

    fn resolve(&self, error: &ClassifiedError, _context: &ErrorContext) -> ErrorResolution {
        ErrorResolution::fail(format!("{} is not recoverable", error.kind()))
    }
}

/// Picks the first matching strategy for each error and records the outcome
#[derive(Debug, Clone)]
pub struct ErrorHandler {
    strategies: Vec<Arc<dyn ErrorStrategy>>,
    metrics: Arc<MetricsCollector>,
}

impl ErrorHandler {
    /// The standard strategy chain
    pub fn new(backoff: BackoffPolicy, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            strategies: vec![
                Arc::new(RateLimitStrategy::new(backoff.clone())),
                Arc::new(ServiceUnavailableStrategy::new(backoff)),
                Arc::new(ValidationStrategy),
                Arc::new(TransientStrategy),
                Arc::new(GuidanceStrategy),
                Arc::new(FailStrategy),
            ],
            metrics,
        }
    }

    /// A handler with a custom ordered chain. An empty chain fails every error.
    pub fn with_strategies(strategies: Vec<Arc<dyn ErrorStrategy>>, metrics: Arc<MetricsCollector>) -> Self {
        Self { strategies, metrics }
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Records `error`, resolves it and records the resolution
    pub fn handle(&self, error: &ClassifiedError, context: &ErrorContext) -> ErrorResolution {
        self.metrics.record_error(error, context);

        let resolution = self
            .strategies
            .iter()
            .find(|strategy| strategy.can_handle(error))
            .map(|strategy| strategy.resolve(error, context))
            .unwrap_or_else(|| ErrorResolution::fail("no strategy accepted the error"));

        if resolution.should_log {
            log_classified_error(error);
        } else {
            debug!(
                error_kind = %error.kind(),
                strategy = %resolution.strategy,
                "Error resolved without logging"
            );
        }

        if resolution.strategy == ResolutionStrategy::Retry && !error.is_retryable() {
            warn!(error_kind = %error.kind(), "Strategy asked to retry a non-retryable error");
        }

        self.metrics.record_resolution(error, &resolution);
        resolution
    }
}
