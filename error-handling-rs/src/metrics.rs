//! # Error Metrics
//!
//! In-process counters for errors, retries and fallbacks, plus a bounded ring
//! of recent error events for diagnostics. Every recording method is safe to
//! call from concurrent pipelines; all updates happen under one lock so no
//! increment is lost. Counters are mirrored to the `metrics` facade.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use ::metrics::{counter, gauge, histogram};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::ErrorContext;
use crate::resolution::{ErrorResolution, ResolutionStrategy};
use crate::types::{ClassifiedError, ErrorKind, Severity};

/// Default number of error events retained
pub const DEFAULT_EVENT_CAPACITY: usize = 1000;

/// Snapshot of the aggregate counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub total_errors: u64,
    pub errors_by_type: HashMap<ErrorKind, u64>,
    pub errors_by_operation: HashMap<String, u64>,
    pub resolutions_by_strategy: HashMap<ResolutionStrategy, u64>,
    pub retry_attempts: u64,
    pub successful_retries: u64,
    pub failed_retries: u64,
    pub fallbacks_used: u64,
    pub fallback_successes: u64,
    pub fallback_failures: u64,
    pub average_retry_delay_ms: f64,
    /// Percentage of retried or fallen-back operations that recovered, 0..=100
    pub error_recovery_rate: f64,
    pub last_reset_time: DateTime<Utc>,
}

impl ErrorMetrics {
    fn empty() -> Self {
        Self {
            total_errors: 0,
            errors_by_type: HashMap::new(),
            errors_by_operation: HashMap::new(),
            resolutions_by_strategy: HashMap::new(),
            retry_attempts: 0,
            successful_retries: 0,
            failed_retries: 0,
            fallbacks_used: 0,
            fallback_successes: 0,
            fallback_failures: 0,
            average_retry_delay_ms: 0.0,
            error_recovery_rate: 0.0,
            last_reset_time: Utc::now(),
        }
    }

    /// The kind recorded most often; ties go to the kind declared first
    pub fn dominant_error_kind(&self) -> Option<ErrorKind> {
        ErrorKind::ALL
            .iter()
            .filter_map(|kind| self.errors_by_type.get(kind).map(|count| (*kind, *count)))
            .filter(|(_, count)| *count > 0)
            .fold(None, |best: Option<(ErrorKind, u64)>, (kind, count)| match best {
                Some((_, best_count)) if best_count >= count => best,
                _ => Some((kind, count)),
            })
            .map(|(kind, _)| kind)
    }
}

/// `(successes) / (all retry and fallback outcomes) * 100`, zero when nothing was recorded
pub fn recovery_rate(
    successful_retries: u64,
    failed_retries: u64,
    fallback_successes: u64,
    fallback_failures: u64,
) -> f64 {
    let total = successful_retries + failed_retries + fallback_successes + fallback_failures;
    if total == 0 {
        return 0.0;
    }
    (successful_retries + fallback_successes) as f64 / total as f64 * 100.0
}

/// One recorded error occurrence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub error_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: ErrorKind,
    pub severity: Severity,
    pub operation: String,
    pub file_path: Option<PathBuf>,
    pub attempt_number: u32,
    pub message: String,
}

#[derive(Debug)]
struct MetricsState {
    metrics: ErrorMetrics,
    total_retry_delay_ms: u128,
    events: VecDeque<ErrorEvent>,
}

/// Records error, retry and fallback outcomes
#[derive(Debug)]
pub struct MetricsCollector {
    state: Mutex<MetricsState>,
    event_capacity: usize,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_event_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// A collector retaining at most `capacity` recent events
    pub fn with_event_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(MetricsState {
                metrics: ErrorMetrics::empty(),
                total_retry_delay_ms: 0,
                events: VecDeque::with_capacity(capacity.min(DEFAULT_EVENT_CAPACITY)),
            }),
            event_capacity: capacity,
        }
    }

    fn state(&self) -> MutexGuard<'_, MetricsState> {
        // Counters stay meaningful even if a recorder panicked mid-update.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records one error occurrence
    pub fn record_error(&self, error: &ClassifiedError, context: &ErrorContext) {
        let event = ErrorEvent {
            error_id: error.id(),
            timestamp: Utc::now(),
            kind: error.kind(),
            severity: error.severity(),
            operation: context.operation().to_string(),
            file_path: context.file_path().map(|p| p.to_path_buf()),
            attempt_number: context.attempt_number(),
            message: error.message().to_string(),
        };

        {
            let mut state = self.state();
            state.metrics.total_errors += 1;
            *state.metrics.errors_by_type.entry(error.kind()).or_insert(0) += 1;
            *state
                .metrics
                .errors_by_operation
                .entry(context.operation().to_string())
                .or_insert(0) += 1;

            if self.event_capacity > 0 {
                while state.events.len() >= self.event_capacity {
                    state.events.pop_front();
                }
                state.events.push_back(event);
            }
        }

        counter!("pipeline.errors", 1, "kind" => error.kind().as_str());
    }

    /// Records the resolution chosen for an error
    pub fn record_resolution(&self, error: &ClassifiedError, resolution: &ErrorResolution) {
        {
            let mut state = self.state();
            *state
                .metrics
                .resolutions_by_strategy
                .entry(resolution.strategy)
                .or_insert(0) += 1;
        }

        let strategy = match resolution.strategy {
            ResolutionStrategy::Retry => "retry",
            ResolutionStrategy::Fallback => "fallback",
            ResolutionStrategy::Fail => "fail",
            ResolutionStrategy::Transform => "transform",
        };
        counter!("pipeline.resolutions", 1, "strategy" => strategy, "kind" => error.kind().as_str());
    }

    /// Records that a retry was scheduled after waiting `delay`
    pub fn record_retry_attempt(&self, delay: Duration) {
        {
            let mut state = self.state();
            state.metrics.retry_attempts += 1;
            state.total_retry_delay_ms += delay.as_millis();
            state.metrics.average_retry_delay_ms =
                state.total_retry_delay_ms as f64 / state.metrics.retry_attempts as f64;
        }

        counter!("pipeline.retries", 1);
        histogram!("pipeline.retry.delay_ms", delay.as_millis() as f64);
    }

    /// An operation succeeded after at least one retry
    pub fn record_successful_retry(&self) {
        self.state().metrics.successful_retries += 1;
        counter!("pipeline.retries.outcome", 1, "outcome" => "success");
    }

    /// An operation was retried and still failed
    pub fn record_failed_retry(&self) {
        self.state().metrics.failed_retries += 1;
        counter!("pipeline.retries.outcome", 1, "outcome" => "failure");
    }

    pub fn record_fallback_success(&self) {
        {
            let mut state = self.state();
            state.metrics.fallbacks_used += 1;
            state.metrics.fallback_successes += 1;
        }
        counter!("pipeline.fallbacks", 1, "outcome" => "success");
    }

    pub fn record_fallback_failure(&self) {
        {
            let mut state = self.state();
            state.metrics.fallbacks_used += 1;
            state.metrics.fallback_failures += 1;
        }
        counter!("pipeline.fallbacks", 1, "outcome" => "failure");
    }

    /// Returns a copy of the current counters
    pub fn get_metrics(&self) -> ErrorMetrics {
        let mut metrics = self.state().metrics.clone();
        metrics.error_recovery_rate = recovery_rate(
            metrics.successful_retries,
            metrics.failed_retries,
            metrics.fallback_successes,
            metrics.fallback_failures,
        );
        gauge!("pipeline.error_recovery_rate", metrics.error_recovery_rate);
        metrics
    }

    /// The most recent `limit` events, oldest first
    pub fn recent_events(&self, limit: usize) -> Vec<ErrorEvent> {
        let state = self.state();
        let skip = state.events.len().saturating_sub(limit);
        state.events.iter().skip(skip).cloned().collect()
    }

    pub fn event_count(&self) -> usize {
        self.state().events.len()
    }

    /// Clears every counter and event and stamps the reset time
    pub fn reset(&self) {
        let mut state = self.state();
        state.metrics = ErrorMetrics::empty();
        state.total_retry_delay_ms = 0;
        state.events.clear();
    }
}
