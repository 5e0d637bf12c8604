//! Per-file outcomes.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use error_handling::ClassifiedError;
use serde::{Deserialize, Serialize};

/// Terminal state of one file in a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Succeeded,
    Failed,
    /// Never started because the batch halted first
    Skipped,
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileStatus::Succeeded => write!(f, "succeeded"),
            FileStatus::Failed => write!(f, "failed"),
            FileStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Outcome for one input file
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingResult<T> {
    pub file: PathBuf,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ClassifiedError>,
    pub duration_ms: u64,
    /// Served from the analysis cache instead of a fresh computation
    pub cached: bool,
}

impl<T> ProcessingResult<T> {
    pub fn succeeded(file: PathBuf, result: T, duration: Duration) -> Self {
        Self {
            file,
            status: FileStatus::Succeeded,
            result: Some(result),
            error: None,
            duration_ms: duration.as_millis() as u64,
            cached: false,
        }
    }

    pub fn failed(file: PathBuf, error: ClassifiedError, duration: Duration) -> Self {
        Self {
            file,
            status: FileStatus::Failed,
            result: None,
            error: Some(error),
            duration_ms: duration.as_millis() as u64,
            cached: false,
        }
    }

    pub fn skipped(file: PathBuf) -> Self {
        Self {
            file,
            status: FileStatus::Skipped,
            result: None,
            error: None,
            duration_ms: 0,
            cached: false,
        }
    }

    pub fn from_cache(mut self, cached: bool) -> Self {
        self.cached = cached;
        self
    }

    pub fn success(&self) -> bool {
        self.status == FileStatus::Succeeded
    }

    pub fn file(&self) -> &Path {
        &self.file
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let ok = ProcessingResult::succeeded("a.rs".into(), 1, Duration::from_millis(12));
        assert!(ok.success());
        assert_eq!(ok.duration_ms, 12);
        assert!(!ok.cached);

        let failed: ProcessingResult<u32> =
            ProcessingResult::failed("b.rs".into(), ClassifiedError::network("reset"), Duration::ZERO);
        assert!(!failed.success());
        assert!(failed.error.is_some());

        let skipped: ProcessingResult<u32> = ProcessingResult::skipped("c.rs".into());
        assert_eq!(skipped.status, FileStatus::Skipped);
        assert!(skipped.result.is_none() && skipped.error.is_none());
    }

    #[test]
    fn test_serialization_omits_empty_fields() {
        let ok = ProcessingResult::succeeded("a.rs".into(), "fine", Duration::ZERO).from_cache(true);
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["status"], "succeeded");
        assert_eq!(json["cached"], true);
        assert!(json.get("error").is_none());
    }
}
