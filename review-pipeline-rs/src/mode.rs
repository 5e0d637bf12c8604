//! Processing mode selection for a batch.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Batches up to this many files run sequentially unless overridden
pub const DEFAULT_SEQUENTIAL_THRESHOLD: usize = 3;

/// How a batch is executed; decided once per batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    Sequential,
    Parallel,
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingMode::Sequential => write!(f, "sequential"),
            ProcessingMode::Parallel => write!(f, "parallel"),
        }
    }
}

/// Caller overrides for mode selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeOverrides {
    pub force_sequential: bool,
    pub force_parallel: bool,
    pub threshold: Option<usize>,
}

/// Chooses the mode for a batch of `file_count` files.
///
/// `force_sequential` wins over `force_parallel`; otherwise batches no larger
/// than the threshold run sequentially.
pub fn select(file_count: usize, overrides: &ModeOverrides) -> ProcessingMode {
    if overrides.force_sequential {
        return ProcessingMode::Sequential;
    }
    if overrides.force_parallel {
        return ProcessingMode::Parallel;
    }

    let threshold = overrides.threshold.unwrap_or(DEFAULT_SEQUENTIAL_THRESHOLD);
    if file_count <= threshold {
        ProcessingMode::Sequential
    } else {
        ProcessingMode::Parallel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn threshold(n: usize) -> ModeOverrides {
        ModeOverrides {
            threshold: Some(n),
            ..Default::default()
        }
    }

    #[test]
    fn test_threshold_selection() {
        assert_eq!(select(2, &threshold(5)), ProcessingMode::Sequential);
        assert_eq!(select(5, &threshold(5)), ProcessingMode::Sequential);
        assert_eq!(select(6, &threshold(5)), ProcessingMode::Parallel);
        assert_eq!(select(50, &threshold(5)), ProcessingMode::Parallel);
    }

    #[test]
    fn test_force_sequential_wins() {
        let overrides = ModeOverrides {
            force_sequential: true,
            force_parallel: true,
            threshold: Some(5),
        };
        assert_eq!(select(50, &overrides), ProcessingMode::Sequential);
    }

    #[test]
    fn test_force_parallel() {
        let overrides = ModeOverrides {
            force_parallel: true,
            ..threshold(5)
        };
        assert_eq!(select(1, &overrides), ProcessingMode::Parallel);
    }

    #[test]
    fn test_default_threshold() {
        let overrides = ModeOverrides::default();
        assert_eq!(select(0, &overrides), ProcessingMode::Sequential);
        assert_eq!(select(DEFAULT_SEQUENTIAL_THRESHOLD, &overrides), ProcessingMode::Sequential);
        assert_eq!(select(DEFAULT_SEQUENTIAL_THRESHOLD + 1, &overrides), ProcessingMode::Parallel);
    }
}
