//! # Parallel Processing
//!
//! Fans files out to spawned tasks with bounded concurrency. Each task reads
//! and fingerprints its file, then computes the analysis through the shared
//! [`AnalysisCache`] and the retry executor. A failing or panicking task
//! never affects its siblings. Completions are consumed by the task that
//! called [`ParallelProcessor::process_files`], which alone notifies the
//! observer, and the results are returned in input order.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use error_handling::{ClassifiedError, ErrorContext, RetryExecutor, RetryOptions};
use futures::stream::{self, StreamExt};
use metrics::{counter, gauge};
use tracing::{debug, error, info};

use crate::cache::{AnalysisCache, CacheKey};
use crate::mode::ProcessingMode;
use crate::processor::{FileProcessor, FileReader};
use crate::progress::ProgressObserver;
use crate::result::ProcessingResult;
use crate::sequential::{analyse_file, PROCESS_FILE_OPERATION};

/// Upper bound on files in flight, whatever the configured limit
pub const SAFETY_CAP: usize = 64;

/// Operation name for reading file content
pub const READ_FILE_OPERATION: &str = "read_file";

/// Processes files concurrently
#[derive(Clone)]
pub struct ParallelProcessor {
    executor: Arc<RetryExecutor>,
    reader: Arc<dyn FileReader>,
    retry_options: RetryOptions,
    max_concurrency: Option<usize>,
}

impl ParallelProcessor {
    pub fn new(executor: Arc<RetryExecutor>, reader: Arc<dyn FileReader>, retry_options: RetryOptions) -> Self {
        Self {
            executor,
            reader,
            retry_options,
            max_concurrency: None,
        }
    }

    /// Limits files in flight; `None` means [`SAFETY_CAP`]
    pub fn with_max_concurrency(mut self, max_concurrency: Option<usize>) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn concurrency_limit(&self) -> usize {
        self.max_concurrency.unwrap_or(SAFETY_CAP).clamp(1, SAFETY_CAP)
    }

    /// Processes `files` concurrently. The result has one entry per input
    /// file, in input order, regardless of completion order.
    pub async fn process_files<P>(
        &self,
        files: &[PathBuf],
        processor: Arc<P>,
        cache: Arc<AnalysisCache<P::Output>>,
        observer: &dyn ProgressObserver,
    ) -> Vec<ProcessingResult<P::Output>>
    where
        P: FileProcessor + 'static,
    {
        let total = files.len();
        let limit = self.concurrency_limit();
        let mut slots: Vec<Option<ProcessingResult<P::Output>>> = (0..total).map(|_| None).collect();
        let mut completed = 0usize;

        info!(total = total, concurrency = limit, "Processing files in parallel");

        let mut outcomes = stream::iter(files.iter().cloned().enumerate())
            .map(|(index, file)| {
                observer.on_file_start(&file, index, total);
                let task = tokio::spawn(process_one(
                    self.executor.clone(),
                    self.reader.clone(),
                    processor.clone(),
                    cache.clone(),
                    file.clone(),
                    self.retry_options.clone(),
                ));
                async move { (index, file, task.await) }
            })
            .buffer_unordered(limit);

        while let Some((index, file, joined)) = outcomes.next().await {
            let result = match joined {
                Ok(result) => result,
                Err(join_error) => {
                    let context = ErrorContext::for_file(PROCESS_FILE_OPERATION, &file)
                        .with_metadata("mode", ProcessingMode::Parallel.to_string());
                    let failure = ClassifiedError::unknown(format!(
                        "worker for {} did not complete: {}",
                        file.display(),
                        join_error
                    ))
                    .with_context(context.clone());

                    error!(file = %file.display(), error = %join_error, "File worker aborted");
                    self.executor.metrics().record_error(&failure, &context);
                    counter!("pipeline.files.failed", 1, "mode" => "parallel");
                    ProcessingResult::failed(file.clone(), failure, Duration::ZERO)
                }
            };

            completed += 1;
            match &result.error {
                Some(error) => observer.on_error(&file, index, error),
                None => observer.on_file_complete(&file, index, Duration::from_millis(result.duration_ms)),
            }
            observer.on_progress(completed, total);
            gauge!("pipeline.files.completed", completed as f64);

            slots[index] = Some(result);
        }

        debug!(total = total, completed = completed, "Parallel batch finished");

        slots
            .into_iter()
            .zip(files)
            .map(|(slot, file)| {
                slot.unwrap_or_else(|| {
                    ProcessingResult::failed(
                        file.clone(),
                        ClassifiedError::unknown(format!("no outcome recorded for {}", file.display())),
                        Duration::ZERO,
                    )
                })
            })
            .collect()
    }
}

async fn process_one<P>(
    executor: Arc<RetryExecutor>,
    reader: Arc<dyn FileReader>,
    processor: Arc<P>,
    cache: Arc<AnalysisCache<P::Output>>,
    file: PathBuf,
    retry_options: RetryOptions,
) -> ProcessingResult<P::Output>
where
    P: FileProcessor + 'static,
{
    let start = Instant::now();

    let read_context = ErrorContext::for_file(READ_FILE_OPERATION, &file);
    let content = match executor
        .run(|| reader.read_to_string(&file), read_context, &retry_options)
        .await
    {
        Ok(content) => content,
        Err(error) => {
            counter!("pipeline.files.failed", 1, "mode" => "parallel");
            return ProcessingResult::failed(file, error, start.elapsed());
        }
    };

    let key = CacheKey::from_content(file.clone(), &content);
    let compute = {
        let executor = executor.clone();
        let path = file.clone();
        move || async move {
            analyse_file(
                &executor,
                &*processor,
                &path,
                Some(&content),
                &retry_options,
                ProcessingMode::Parallel,
            )
            .await
        }
    };

    match cache.get_or_compute_with_source(key, compute).await {
        Ok((output, source)) => {
            counter!("pipeline.files.succeeded", 1, "mode" => "parallel");
            ProcessingResult::succeeded(file, output, start.elapsed()).from_cache(source.is_hit())
        }
        Err(error) => {
            counter!("pipeline.files.failed", 1, "mode" => "parallel");
            ProcessingResult::failed(file, error, start.elapsed())
        }
    }
}
