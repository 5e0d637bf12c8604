//! # Retry Execution
//!
//! Runs an operation with classified retries, exponential backoff and an
//! optional fallback. Every failure is classified, resolved and recorded.
//! When retries and fallback are exhausted the caller receives the primary
//! operation's error, never the fallback's.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::backoff::{should_retry, BackoffPolicy};
use crate::classifier::ErrorClassifier;
use crate::context::ErrorContext;
use crate::metrics::MetricsCollector;
use crate::resolution::{ErrorHandler, ResolutionStrategy};
use crate::types::{ClassifiedError, Result};

/// Per-call retry and fallback switches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryOptions {
    /// Whether retryable failures are retried at all
    pub enable_retry: bool,
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Whether a configured fallback may be invoked
    pub enable_fallback: bool,
    /// Upper bound on a single attempt; an elapsed attempt is a Timeout
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            enable_retry: true,
            max_attempts: 3,
            enable_fallback: true,
            attempt_timeout: None,
        }
    }
}

impl RetryOptions {
    /// A single attempt, no fallback
    pub fn once() -> Self {
        Self {
            enable_retry: false,
            max_attempts: 1,
            enable_fallback: false,
            attempt_timeout: None,
        }
    }
}

/// Executes operations through classification, resolution and backoff
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    classifier: Arc<ErrorClassifier>,
    backoff: BackoffPolicy,
    handler: ErrorHandler,
    metrics: Arc<MetricsCollector>,
}

impl RetryExecutor {
    /// Creates an executor with the standard resolution strategies
    pub fn new(
        classifier: Arc<ErrorClassifier>,
        backoff: BackoffPolicy,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            handler: ErrorHandler::new(backoff.clone(), metrics.clone()),
            classifier,
            backoff,
            metrics,
        }
    }

    /// Replaces the resolution strategies. The handler should record into
    /// the same collector as this executor.
    pub fn with_handler(mut self, handler: ErrorHandler) -> Self {
        self.handler = handler;
        self
    }

    pub fn classifier(&self) -> &Arc<ErrorClassifier> {
        &self.classifier
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Runs `operation` with retries and no fallback
    pub async fn run<T, F, Fut>(&self, operation: F, context: ErrorContext, options: &RetryOptions) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.execute(
            operation,
            None::<fn() -> std::future::Ready<anyhow::Result<T>>>,
            context,
            options,
        )
        .await
    }

    /// Runs `operation` with retries, then `fallback` once retries are
    /// disabled or exhausted
    pub async fn run_with_fallback<T, F, Fut, G, GFut>(
        &self,
        operation: F,
        fallback: G,
        context: ErrorContext,
        options: &RetryOptions,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
        G: FnOnce() -> GFut,
        GFut: Future<Output = anyhow::Result<T>>,
    {
        self.execute(operation, Some(fallback), context, options).await
    }

    async fn execute<T, F, Fut, G, GFut>(
        &self,
        mut operation: F,
        fallback: Option<G>,
        context: ErrorContext,
        options: &RetryOptions,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
        G: FnOnce() -> GFut,
        GFut: Future<Output = anyhow::Result<T>>,
    {
        let start_time = Instant::now();
        let max_attempts = options.max_attempts.max(1);
        let mut context = context;
        let mut retried = false;

        let primary_error = loop {
            let outcome = match options.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, operation()).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(anyhow::Error::new(
                        ClassifiedError::timeout(
                            Some(limit.as_millis() as u64),
                            format!(
                                "Operation '{}' timed out after {}ms",
                                context.operation(),
                                limit.as_millis()
                            ),
                        )
                        .with_context(context.clone()),
                    )),
                },
                None => operation().await,
            };

            let raw = match outcome {
                Ok(value) => {
                    if retried {
                        self.metrics.record_successful_retry();
                        info!(
                            operation = %context.operation(),
                            attempt = context.attempt_number(),
                            duration_ms = %start_time.elapsed().as_millis(),
                            "Operation succeeded after retries"
                        );
                    }
                    return Ok(value);
                }
                Err(raw) => raw,
            };

            let error = self.classifier.classify_error(raw, Some(&context));
            let resolution = self.handler.handle(&error, &context);
            let attempt = context.attempt_number();

            if options.enable_retry
                && resolution.strategy == ResolutionStrategy::Retry
                && should_retry(&error, attempt, max_attempts)
            {
                let backoff = resolution
                    .retry_after_ms
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| self.backoff.delay(&error, attempt));

                debug!(
                    operation = %context.operation(),
                    attempt = attempt,
                    max_attempts = max_attempts,
                    backoff_ms = %backoff.as_millis(),
                    error = %error,
                    "Retrying after error"
                );

                self.metrics.record_retry_attempt(backoff);
                sleep(backoff).await;

                context = context.next_attempt();
                retried = true;
                continue;
            }

            if retried {
                self.metrics.record_failed_retry();
            }

            warn!(
                operation = %context.operation(),
                attempt = attempt,
                max_attempts = max_attempts,
                strategy = %resolution.strategy,
                duration_ms = %start_time.elapsed().as_millis(),
                error = %error,
                "Giving up on operation"
            );

            break match resolution.strategy {
                ResolutionStrategy::Transform => error.with_guidance(resolution.message),
                _ => error,
            };
        };

        let fallback = match fallback {
            Some(fallback) if options.enable_fallback => fallback,
            _ => return Err(primary_error),
        };

        match fallback().await {
            Ok(value) => {
                self.metrics.record_fallback_success();
                info!(
                    operation = %context.operation(),
                    primary_error = %primary_error,
                    "Fallback succeeded"
                );
                Ok(value)
            }
            Err(fallback_error) => {
                self.metrics.record_fallback_failure();
                warn!(
                    operation = %context.operation(),
                    primary_error = %primary_error,
                    fallback_error = %format!("{:#}", fallback_error),
                    "Fallback failed; surfacing primary error"
                );
                Err(primary_error)
            }
        }
    }
}
