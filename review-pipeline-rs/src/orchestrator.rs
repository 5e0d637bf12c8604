//! # Pipeline Orchestrator
//!
//! Runs one batch end to end: selects the processing mode, delegates to the
//! sequential or parallel processor, then aggregates the per-file results
//! with cache and error metric snapshots. Every run carries its own span
//! with a run id.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use error_handling::{BackoffPolicy, ErrorClassifier, ErrorMetrics, MetricsCollector, RetryExecutor, RetryOptions};
use metrics::{counter, histogram};
use serde::Serialize;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::cache::{AnalysisCache, CacheStats};
use crate::config::PipelineConfig;
use crate::mode::{self, ModeOverrides, ProcessingMode};
use crate::notifier::{notify_quietly, Notification, Notifier, TracingNotifier};
use crate::parallel::ParallelProcessor;
use crate::processor::{FileProcessor, FileReader, FsFileReader};
use crate::progress::{LoggingObserver, ProgressObserver};
use crate::report::BatchSummary;
use crate::result::ProcessingResult;
use crate::sequential::{SequentialOptions, SequentialProcessor};

/// Everything a finished run produced
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport<T> {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub mode: ProcessingMode,
    /// One entry per input file, in input order
    pub results: Vec<ProcessingResult<T>>,
    pub cache_stats: CacheStats,
    pub metrics: ErrorMetrics,
    pub summary: BatchSummary,
}

/// Composes mode selection, processing and aggregation
pub struct PipelineOrchestrator<P: FileProcessor> {
    processor: Arc<P>,
    cache: Arc<AnalysisCache<P::Output>>,
    executor: Arc<RetryExecutor>,
    reader: Arc<dyn FileReader>,
    notifier: Arc<dyn Notifier>,
    overrides: ModeOverrides,
    sequential_options: SequentialOptions,
    retry_options: RetryOptions,
    max_concurrency: Option<usize>,
}

impl<P: FileProcessor + 'static> PipelineOrchestrator<P> {
    /// Builds an orchestrator from a validated configuration, reading files
    /// from disk and notifying through tracing.
    pub fn new(config: &PipelineConfig, processor: P) -> Self {
        let executor = RetryExecutor::new(
            Arc::new(ErrorClassifier::new()),
            BackoffPolicy::new(config.retry.backoff_config()),
            Arc::new(MetricsCollector::new()),
        );

        Self {
            processor: Arc::new(processor),
            cache: Arc::new(AnalysisCache::new()),
            executor: Arc::new(executor),
            reader: Arc::new(FsFileReader),
            notifier: Arc::new(TracingNotifier),
            overrides: config.processing.mode_overrides(),
            sequential_options: config.processing.sequential_options(),
            retry_options: config.retry.retry_options(),
            max_concurrency: config.processing.max_concurrency,
        }
    }

    pub fn with_reader(mut self, reader: Arc<dyn FileReader>) -> Self {
        self.reader = reader;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Shares an executor, and with it the metrics collector
    pub fn with_executor(mut self, executor: Arc<RetryExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// Shares a cache between orchestrators
    pub fn with_cache(mut self, cache: Arc<AnalysisCache<P::Output>>) -> Self {
        self.cache = cache;
        self
    }

    pub fn processor(&self) -> &Arc<P> {
        &self.processor
    }

    pub fn cache(&self) -> &Arc<AnalysisCache<P::Output>> {
        &self.cache
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        self.executor.metrics()
    }

    /// Runs `files` with the configured mode overrides, logging progress
    pub async fn run(&self, files: &[PathBuf]) -> PipelineReport<P::Output> {
        self.run_with(files, &self.overrides, &LoggingObserver).await
    }

    /// Runs `files` with explicit overrides and observer
    pub async fn run_with(
        &self,
        files: &[PathBuf],
        overrides: &ModeOverrides,
        observer: &dyn ProgressObserver,
    ) -> PipelineReport<P::Output> {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline_run", run_id = %run_id, files = files.len());

        self.execute(run_id, files, overrides, observer)
            .instrument(span)
            .await
    }

    async fn execute(
        &self,
        run_id: Uuid,
        files: &[PathBuf],
        overrides: &ModeOverrides,
        observer: &dyn ProgressObserver,
    ) -> PipelineReport<P::Output> {
        let started = Instant::now();
        let started_at = Utc::now();
        let mode = mode::select(files.len(), overrides);

        info!(mode = %mode, files = files.len(), "Pipeline run started");
        counter!("pipeline.runs", 1, "mode" => mode_label(mode));
        notify_quietly(
            &*self.notifier,
            Notification::info(format!("Reviewing {} files ({} mode)", files.len(), mode)),
        )
        .await;

        let results = match mode {
            ProcessingMode::Sequential => {
                SequentialProcessor::new(self.executor.clone(), self.retry_options.clone())
                    .process_files(files, &*self.processor, &self.sequential_options, observer)
                    .await
            }
            ProcessingMode::Parallel => {
                ParallelProcessor::new(self.executor.clone(), self.reader.clone(), self.retry_options.clone())
                    .with_max_concurrency(self.max_concurrency)
                    .process_files(files, self.processor.clone(), self.cache.clone(), observer)
                    .await
            }
        };

        let elapsed = started.elapsed();
        let summary = BatchSummary::from_results(&results, elapsed);
        histogram!("pipeline.run.duration_ms", elapsed.as_millis() as f64);

        info!(
            mode = %mode,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            cached = summary.cached,
            duration_ms = summary.duration_ms,
            "Pipeline run finished"
        );

        let notification = if summary.is_clean() {
            Notification::success(summary.to_string())
        } else if summary.succeeded == 0 {
            Notification::error(summary.to_string())
        } else {
            Notification::warning(summary.to_string())
        };
        notify_quietly(&*self.notifier, notification).await;

        PipelineReport {
            run_id,
            started_at,
            mode,
            results,
            cache_stats: self.cache.stats(),
            metrics: self.executor.metrics().get_metrics(),
            summary,
        }
    }
}

fn mode_label(mode: ProcessingMode) -> &'static str {
    match mode {
        ProcessingMode::Sequential => "sequential",
        ProcessingMode::Parallel => "parallel",
    }
}
