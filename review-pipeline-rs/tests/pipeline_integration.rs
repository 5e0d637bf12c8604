use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{bail, Result};
use async_trait::async_trait;
use error_handling::ErrorKind;
use review_pipeline::{
    FileProcessor, FileStatus, ModeOverrides, NoopObserver, PipelineConfig, PipelineOrchestrator,
    ProcessingMode, TracedProcessor,
};
use tempfile::TempDir;

/// Counts non-empty lines; rejects files containing `FORBIDDEN`
#[derive(Default)]
struct LineReviewer {
    invocations: AtomicUsize,
}

#[async_trait]
impl FileProcessor for LineReviewer {
    type Output = usize;

    async fn process_file(&self, path: &Path, content: Option<&str>) -> Result<usize> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let content = match content {
            Some(content) => content.to_string(),
            None => tokio::fs::read_to_string(path).await?,
        };
        if content.contains("FORBIDDEN") {
            bail!("permission denied reviewing {}", path.display());
        }
        Ok(content.lines().filter(|line| !line.trim().is_empty()).count())
    }

    fn name(&self) -> &str {
        "line_reviewer"
    }
}

fn write_files(dir: &TempDir, files: &[(&str, &str)]) -> Result<Vec<PathBuf>> {
    files
        .iter()
        .map(|(name, content)| -> Result<PathBuf> {
            let path = dir.path().join(name);
            std::fs::write(&path, content)?;
            Ok(path)
        })
        .collect()
}

fn fast_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 4;
    config
}

#[tokio::test]
async fn sequential_batch_reads_files_itself() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let files = write_files(&dir, &[("a.rs", "fn a() {}\n\n"), ("b.rs", "fn b() {}\nfn c() {}\n")])?;

    let orchestrator = PipelineOrchestrator::new(&fast_config(), TracedProcessor::new(LineReviewer::default()));
    let report = orchestrator.run(&files).await;

    assert_eq!(report.mode, ProcessingMode::Sequential);
    assert_eq!(report.results[0].result, Some(1));
    assert_eq!(report.results[1].result, Some(2));
    assert!(report.summary.is_clean());
    Ok(())
}

#[tokio::test]
async fn parallel_batch_keeps_order_and_reports_missing_files() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut files = write_files(
        &dir,
        &[
            ("one.rs", "1\n"),
            ("two.rs", "1\n2\n"),
            ("bad.rs", "FORBIDDEN\n"),
            ("four.rs", "1\n2\n3\n4\n"),
        ],
    )?;
    files.insert(1, dir.path().join("missing.rs"));

    let orchestrator = PipelineOrchestrator::new(&fast_config(), LineReviewer::default());
    let overrides = ModeOverrides {
        force_parallel: true,
        ..Default::default()
    };
    let report = orchestrator.run_with(&files, &overrides, &NoopObserver).await;

    assert_eq!(report.mode, ProcessingMode::Parallel);
    let names: Vec<_> = report.results.iter().map(|r| r.file.clone()).collect();
    assert_eq!(names, files);

    assert_eq!(report.results[0].result, Some(1));
    assert_eq!(report.results[1].status, FileStatus::Failed);
    assert_eq!(report.results[1].error.as_ref().map(|e| e.kind()), Some(ErrorKind::FileAccess));
    assert_eq!(report.results[2].result, Some(2));
    assert_eq!(report.results[3].error.as_ref().map(|e| e.kind()), Some(ErrorKind::Permission));
    assert_eq!(report.results[4].result, Some(4));

    assert_eq!(report.summary.succeeded, 3);
    assert_eq!(report.summary.failed, 2);
    assert_eq!(orchestrator.processor().invocations.load(Ordering::SeqCst), 4);
    Ok(())
}

#[tokio::test]
async fn content_change_invalidates_cache() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let files = write_files(&dir, &[("a.rs", "1\n"), ("b.rs", "1\n"), ("c.rs", "1\n"), ("d.rs", "1\n")])?;

    let orchestrator = PipelineOrchestrator::new(&fast_config(), LineReviewer::default());
    let first = orchestrator.run(&files).await;
    assert_eq!(first.mode, ProcessingMode::Parallel);
    assert_eq!(first.summary.cached, 0);

    std::fs::write(&files[0], "1\n2\n3\n")?;
    let second = orchestrator.run(&files).await;

    assert_eq!(second.results[0].result, Some(3));
    assert!(!second.results[0].cached);
    assert_eq!(second.summary.cached, 3);
    assert_eq!(orchestrator.processor().invocations.load(Ordering::SeqCst), 5);
    Ok(())
}

#[tokio::test]
async fn abort_on_first_error_skips_the_rest() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let files = write_files(&dir, &[("a.rs", "FORBIDDEN"), ("b.rs", "1"), ("c.rs", "1")])?;

    let mut config = fast_config();
    config.processing.continue_on_error = false;

    let orchestrator = PipelineOrchestrator::new(&config, LineReviewer::default());
    let report = orchestrator.run(&files).await;

    let statuses: Vec<_> = report.results.iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![FileStatus::Failed, FileStatus::Skipped, FileStatus::Skipped]);
    assert_eq!(report.summary.skipped, 2);
    assert_eq!(report.summary.dominant_error, Some(ErrorKind::Permission));
    assert_eq!(orchestrator.processor().invocations.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn config_file_and_environment_overrides() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("review-pipeline.toml");
    std::fs::write(
        &path,
        r#"
        [processing]
        sequential_threshold = 10
        max_concurrency = 4

        [retry]
        max_attempts = 2
        "#,
    )?;

    std::env::set_var("REVIEW_PIPELINE__PROCESSING__MAX_ERRORS", "7");
    let loaded = PipelineConfig::load(Some(&path));
    std::env::remove_var("REVIEW_PIPELINE__PROCESSING__MAX_ERRORS");
    let config = loaded?;

    assert_eq!(config.processing.sequential_threshold, 10);
    assert_eq!(config.processing.max_concurrency, Some(4));
    assert_eq!(config.processing.max_errors, Some(7));
    assert_eq!(config.retry.max_attempts, 2);

    let missing = PipelineConfig::load(Some(&dir.path().join("absent.toml")))?;
    assert_eq!(missing.retry.max_attempts, PipelineConfig::default().retry.max_attempts);
    Ok(())
}

#[tokio::test]
async fn shared_metrics_accumulate_across_runs() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let files = write_files(&dir, &[("bad.rs", "FORBIDDEN")])?;

    let orchestrator = PipelineOrchestrator::new(&fast_config(), LineReviewer::default());
    orchestrator.run(&files).await;
    let report = orchestrator.run(&files).await;

    assert_eq!(report.metrics.total_errors, 2);
    assert_eq!(report.metrics.errors_by_type.get(&ErrorKind::Permission), Some(&2));
    assert_eq!(orchestrator.metrics().recent_events(10).len(), 2);
    Ok(())
}
