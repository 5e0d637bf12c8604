//! # Review Pipeline
//!
//! Drives per-file analysis over a batch of files. A batch runs either
//! sequentially, in input order with live progress, or in parallel with
//! bounded fan-out through a content-addressed single-flight cache. Every
//! file goes through classified retries, backoff and fallback, and every
//! input file appears in the result, in input order.
//!
//! ```no_run
//! use std::path::{Path, PathBuf};
//! use review_pipeline::{FileProcessor, PipelineConfig, PipelineOrchestrator};
//!
//! struct LineCounter;
//!
//! #[async_trait::async_trait]
//! impl FileProcessor for LineCounter {
//!     type Output = usize;
//!
//!     async fn process_file(&self, path: &Path, content: Option<&str>) -> anyhow::Result<usize> {
//!         let content = match content {
//!             Some(content) => content.to_string(),
//!             None => tokio::fs::read_to_string(path).await?,
//!         };
//!         Ok(content.lines().count())
//!     }
//! }
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = PipelineConfig::load(Some(Path::new("review-pipeline.toml")))?;
//! let orchestrator = PipelineOrchestrator::new(&config, LineCounter);
//! let report = orchestrator.run(&[PathBuf::from("src/lib.rs")]).await;
//! println!("{}", report.summary);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod mode;
pub mod notifier;
pub mod orchestrator;
pub mod parallel;
pub mod processor;
pub mod progress;
pub mod report;
pub mod result;
pub mod sequential;

// Re-export commonly used types
pub use cache::{fingerprint, AnalysisCache, CacheKey, CacheSource, CacheStats};
pub use crate::config::{ConfigError, ConfigValidator, PipelineConfig, ProcessingConfig, RetryConfig};
pub use mode::{select as select_mode, ModeOverrides, ProcessingMode, DEFAULT_SEQUENTIAL_THRESHOLD};
pub use notifier::{notify_quietly, Notification, NotificationKind, Notifier, TracingNotifier};
pub use orchestrator::{PipelineOrchestrator, PipelineReport};
pub use parallel::{ParallelProcessor, SAFETY_CAP};
pub use processor::{FileProcessor, FileReader, FsFileReader, TracedProcessor};
pub use progress::{LoggingObserver, NoopObserver, ProgressObserver};
pub use report::BatchSummary;
pub use result::{FileStatus, ProcessingResult};
pub use sequential::{SequentialOptions, SequentialProcessor};

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use error_handling::{
        BackoffConfig, BackoffPolicy, ClassifiedError, ErrorClassifier, MetricsCollector, RetryExecutor,
        RetryOptions,
    };

    use crate::processor::FileProcessor;

    /// Executor with millisecond backoff
    pub fn executor() -> Arc<RetryExecutor> {
        let backoff = BackoffPolicy::new(BackoffConfig {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            ..Default::default()
        });
        Arc::new(RetryExecutor::new(
            Arc::new(ErrorClassifier::new()),
            backoff,
            Arc::new(MetricsCollector::new()),
        ))
    }

    pub fn fast_options() -> RetryOptions {
        RetryOptions {
            max_attempts: 3,
            ..Default::default()
        }
    }

    #[derive(Debug, Clone)]
    enum Failure {
        Message(String),
        Validation { field: String, message: String },
    }

    impl Failure {
        fn to_error(&self) -> anyhow::Error {
            match self {
                Failure::Message(message) => anyhow::anyhow!("{}", message),
                Failure::Validation { field, message } => {
                    anyhow::Error::new(ClassifiedError::validation(Some(field.clone()), message.clone()))
                }
            }
        }
    }

    /// Processor whose behavior per path is scripted up front
    #[derive(Debug, Default)]
    pub struct ScriptedProcessor {
        failures: HashMap<String, (Option<u32>, Failure)>,
        fallbacks: HashMap<String, String>,
        delays: HashMap<String, Duration>,
        panics: HashMap<String, Option<u32>>,
        calls: Mutex<HashMap<String, u32>>,
        content_seen: Mutex<HashMap<String, bool>>,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedProcessor {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn fail_always(mut self, path: &str, message: &str) -> Self {
            self.failures
                .insert(path.to_string(), (None, Failure::Message(message.to_string())));
            self
        }

        /// Fails the first `times` calls, then succeeds
        pub fn fail_times(mut self, path: &str, times: u32, message: &str) -> Self {
            self.failures
                .insert(path.to_string(), (Some(times), Failure::Message(message.to_string())));
            self
        }

        pub fn fail_validation(mut self, path: &str, field: &str, message: &str) -> Self {
            self.failures.insert(
                path.to_string(),
                (
                    None,
                    Failure::Validation {
                        field: field.to_string(),
                        message: message.to_string(),
                    },
                ),
            );
            self
        }

        pub fn with_fallback(mut self, path: &str, value: &str) -> Self {
            self.fallbacks.insert(path.to_string(), value.to_string());
            self
        }

        pub fn delay(mut self, path: &str, delay: Duration) -> Self {
            self.delays.insert(path.to_string(), delay);
            self
        }

        pub fn panic_on(mut self, path: &str) -> Self {
            self.panics.insert(path.to_string(), None);
            self
        }

        /// Panics on the first `times` calls, then succeeds
        pub fn panic_times(mut self, path: &str, times: u32) -> Self {
            self.panics.insert(path.to_string(), Some(times));
            self
        }

        pub fn calls(&self, path: &str) -> u32 {
            self.calls.lock().unwrap().get(path).copied().unwrap_or(0)
        }

        /// Whether the last call for `path` received preloaded content
        pub fn saw_content(&self, path: &str) -> Option<bool> {
            self.content_seen.lock().unwrap().get(path).copied()
        }

        pub fn peak_concurrency(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FileProcessor for ScriptedProcessor {
        type Output = String;

        async fn process_file(&self, path: &Path, content: Option<&str>) -> anyhow::Result<String> {
            let key = path.to_string_lossy().to_string();
            let call = {
                let mut calls = self.calls.lock().unwrap();
                let count = calls.entry(key.clone()).or_insert(0);
                *count += 1;
                *count
            };
            self.content_seen.lock().unwrap().insert(key.clone(), content.is_some());

            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(active, Ordering::SeqCst);
            if let Some(delay) = self.delays.get(&key) {
                tokio::time::sleep(*delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            if let Some(limit) = self.panics.get(&key) {
                if limit.map_or(true, |limit| call <= limit) {
                    panic!("scripted panic for {}", key);
                }
            }

            if let Some((limit, failure)) = self.failures.get(&key) {
                if limit.map_or(true, |limit| call <= limit) {
                    return Err(failure.to_error());
                }
            }

            Ok(format!("reviewed {}", key))
        }

        async fn fallback(&self, path: &Path, _content: Option<&str>) -> anyhow::Result<Option<String>> {
            Ok(self.fallbacks.get(path.to_string_lossy().as_ref()).cloned())
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }
}
