//! # Sequential Processing
//!
//! Processes files one at a time in input order. Each file, including all of
//! its retries, finishes before the next one starts. When the batch halts
//! (on the first failure without continue-on-error, or once the error limit
//! is reached) every file not yet started is reported as skipped.

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use error_handling::{ClassifiedError, ErrorContext, RetryExecutor, RetryOptions};
use futures::FutureExt;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::mode::ProcessingMode;
use crate::processor::{panic_message, FileProcessor};
use crate::progress::ProgressObserver;
use crate::result::ProcessingResult;

/// Operation name recorded in error contexts and metrics
pub const PROCESS_FILE_OPERATION: &str = "process_file";

/// Halting policy for a sequential batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequentialOptions {
    pub continue_on_error: bool,
    /// Halt once this many files have failed; `None` never halts on count
    pub max_errors: Option<usize>,
}

impl Default for SequentialOptions {
    fn default() -> Self {
        Self {
            continue_on_error: true,
            max_errors: None,
        }
    }
}

impl SequentialOptions {
    fn should_halt(&self, failures: usize) -> bool {
        !self.continue_on_error || self.max_errors.map_or(false, |max| failures >= max)
    }
}

/// Runs one file through the executor, with the processor's fallback. A
/// panicking processor fails the file as `Unknown` instead of unwinding into
/// the batch.
pub(crate) async fn analyse_file<P: FileProcessor>(
    executor: &RetryExecutor,
    processor: &P,
    path: &Path,
    content: Option<&str>,
    retry_options: &RetryOptions,
    mode: ProcessingMode,
) -> Result<P::Output, ClassifiedError> {
    let context = ErrorContext::for_file(PROCESS_FILE_OPERATION, path)
        .with_metadata("mode", mode.to_string())
        .with_metadata("processor", processor.name());

    let execution = executor.run_with_fallback(
        || processor.process_file(path, content),
        || async move {
            processor
                .fallback(path, content)
                .await?
                .ok_or_else(|| anyhow!("fallback produced no usable result for {}", path.display()))
        },
        context.clone(),
        retry_options,
    );

    match AssertUnwindSafe(execution).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = panic_message(&*payload);
            error!(file = %path.display(), panic = %message, "Processor panicked");
            let failure = ClassifiedError::unknown(format!(
                "{} panicked while processing {}: {}",
                processor.name(),
                path.display(),
                message
            ))
            .with_context(context.clone());
            executor.metrics().record_error(&failure, &context);
            Err(failure)
        }
    }
}

/// Processes files strictly in input order
#[derive(Debug, Clone)]
pub struct SequentialProcessor {
    executor: Arc<RetryExecutor>,
    retry_options: RetryOptions,
}

impl SequentialProcessor {
    pub fn new(executor: Arc<RetryExecutor>, retry_options: RetryOptions) -> Self {
        Self {
            executor,
            retry_options,
        }
    }

    /// Processes `files` in order. The result has one entry per input file,
    /// in input order.
    pub async fn process_files<P: FileProcessor>(
        &self,
        files: &[PathBuf],
        processor: &P,
        options: &SequentialOptions,
        observer: &dyn ProgressObserver,
    ) -> Vec<ProcessingResult<P::Output>> {
        let total = files.len();
        let mut results = Vec::with_capacity(total);
        let mut failures = 0usize;

        info!(total = total, "Processing files sequentially");

        for (index, file) in files.iter().enumerate() {
            observer.on_file_start(file, index, total);
            let start = Instant::now();

            let outcome = analyse_file(
                &self.executor,
                processor,
                file,
                None,
                &self.retry_options,
                ProcessingMode::Sequential,
            )
            .await;
            let duration = start.elapsed();

            match outcome {
                Ok(output) => {
                    counter!("pipeline.files.succeeded", 1, "mode" => "sequential");
                    observer.on_file_complete(file, index, duration);
                    results.push(ProcessingResult::succeeded(file.clone(), output, duration));
                }
                Err(error) => {
                    failures += 1;
                    counter!("pipeline.files.failed", 1, "mode" => "sequential");
                    observer.on_error(file, index, &error);
                    results.push(ProcessingResult::failed(file.clone(), error, duration));
                }
            }
            observer.on_progress(index + 1, total);

            if failures > 0 && options.should_halt(failures) && index + 1 < total {
                warn!(
                    failures = failures,
                    max_errors = ?options.max_errors,
                    continue_on_error = options.continue_on_error,
                    skipped = total - index - 1,
                    "Halting batch; remaining files skipped"
                );
                break;
            }
        }

        let started = results.len();
        let skipped = total - started;
        if skipped > 0 {
            counter!("pipeline.files.skipped", skipped as u64, "mode" => "sequential");
            results.extend(files[started..].iter().cloned().map(ProcessingResult::skipped));
        }

        debug!(total = total, failures = failures, skipped = skipped, "Sequential batch finished");
        results
    }
}
