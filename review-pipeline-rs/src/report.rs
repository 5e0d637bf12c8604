//! Aggregate reporting for a finished batch.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use error_handling::ErrorKind;
use serde::{Deserialize, Serialize};

use crate::result::{FileStatus, ProcessingResult};

/// Counts and guidance for one batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Successful results served from the analysis cache
    pub cached: usize,
    pub duration_ms: u64,
    /// Most frequent error kind among failed files
    pub dominant_error: Option<ErrorKind>,
    /// Guidance carried by the first failure of the dominant kind
    pub guidance: Option<String>,
}

impl BatchSummary {
    pub fn from_results<T>(results: &[ProcessingResult<T>], duration: Duration) -> Self {
        let mut succeeded = 0;
        let mut failed = 0;
        let mut skipped = 0;
        let mut cached = 0;
        let mut kinds: HashMap<ErrorKind, usize> = HashMap::new();

        for result in results {
            match result.status {
                FileStatus::Succeeded => {
                    succeeded += 1;
                    if result.cached {
                        cached += 1;
                    }
                }
                FileStatus::Failed => {
                    failed += 1;
                    if let Some(error) = &result.error {
                        *kinds.entry(error.kind()).or_insert(0) += 1;
                    }
                }
                FileStatus::Skipped => skipped += 1,
            }
        }

        // Ties go to the kind declared first.
        let dominant_error = ErrorKind::ALL
            .iter()
            .filter_map(|kind| kinds.get(kind).map(|count| (*kind, *count)))
            .fold(None, |best: Option<(ErrorKind, usize)>, (kind, count)| match best {
                Some((_, best_count)) if best_count >= count => best,
                _ => Some((kind, count)),
            })
            .map(|(kind, _)| kind);

        Self {
            total: results.len(),
            succeeded,
            failed,
            skipped,
            cached,
            duration_ms: duration.as_millis() as u64,
            dominant_error,
            guidance: dominant_error.and_then(|kind| guidance_for(results, kind)),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }
}

fn guidance_for<T>(results: &[ProcessingResult<T>], kind: ErrorKind) -> Option<String> {
    results
        .iter()
        .filter_map(|result| result.error.as_ref())
        .find(|error| error.kind() == kind)
        .map(|error| error.user_guidance().to_string())
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} files: {} passed, {} failed, {} skipped",
            self.total, self.succeeded, self.failed, self.skipped
        )?;
        if self.cached > 0 {
            write!(f, " ({} from cache)", self.cached)?;
        }
        write!(f, " in {}ms", self.duration_ms)?;
        if let (Some(kind), Some(guidance)) = (self.dominant_error, &self.guidance) {
            write!(f, ". Most failures: {}. {}", kind, guidance)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use error_handling::ClassifiedError;

    #[test]
    fn test_counts_and_dominant_error() {
        let results = vec![
            ProcessingResult::succeeded("a".into(), 1, Duration::ZERO),
            ProcessingResult::succeeded("b".into(), 1, Duration::ZERO).from_cache(true),
            ProcessingResult::failed("c".into(), ClassifiedError::network("reset"), Duration::ZERO),
            ProcessingResult::failed("d".into(), ClassifiedError::authentication("401"), Duration::ZERO),
            ProcessingResult::failed("e".into(), ClassifiedError::authentication("401"), Duration::ZERO),
            ProcessingResult::skipped("f".into()),
        ];

        let summary = BatchSummary::from_results(&results, Duration::from_millis(1500));
        assert_eq!(summary.total, 6);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.cached, 1);
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.dominant_error, Some(ErrorKind::Authentication));
        assert_eq!(
            summary.guidance.as_deref(),
            Some(ErrorKind::Authentication.user_guidance())
        );
        assert!(!summary.is_clean());

        let text = summary.to_string();
        assert!(text.starts_with("6 files: 2 passed, 3 failed, 1 skipped (1 from cache) in 1500ms"));
        assert!(text.contains(ErrorKind::Authentication.user_guidance()));
    }

    #[test]
    fn test_guidance_comes_from_the_failure_itself() {
        let custom = ClassifiedError::authentication("401").with_guidance("Rotate the review bot token");
        let results: Vec<ProcessingResult<()>> = vec![
            ProcessingResult::failed("a".into(), custom, Duration::ZERO),
            ProcessingResult::failed("b".into(), ClassifiedError::authentication("401"), Duration::ZERO),
        ];

        let summary = BatchSummary::from_results(&results, Duration::ZERO);
        assert_eq!(summary.dominant_error, Some(ErrorKind::Authentication));
        assert_eq!(summary.guidance.as_deref(), Some("Rotate the review bot token"));
        assert!(summary.to_string().ends_with("Rotate the review bot token"));
    }

    #[test]
    fn test_clean_batch_has_no_guidance() {
        let results = vec![ProcessingResult::succeeded("a".into(), (), Duration::ZERO)];
        let summary = BatchSummary::from_results(&results, Duration::ZERO);
        assert!(summary.is_clean());
        assert_eq!(summary.dominant_error, None);
        assert_eq!(summary.to_string(), "1 files: 1 passed, 0 failed, 0 skipped in 0ms");
    }
}
