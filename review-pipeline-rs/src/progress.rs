//! Progress observation.
//!
//! Both processors deliver every callback from the single task driving the
//! batch, so implementations see events one at a time.

use std::path::Path;
use std::time::Duration;

use error_handling::ClassifiedError;
use tracing::{debug, info, warn};

/// Receives per-file progress events. All methods default to no-ops.
pub trait ProgressObserver: Send + Sync {
    /// A file is about to start; `index` is its position in the input
    fn on_file_start(&self, _file: &Path, _index: usize, _total: usize) {}

    /// A file finished successfully
    fn on_file_complete(&self, _file: &Path, _index: usize, _duration: Duration) {}

    /// A file finished with an error
    fn on_error(&self, _file: &Path, _index: usize, _error: &ClassifiedError) {}

    /// `completed` of `total` files have finished, in completion order
    fn on_progress(&self, _completed: usize, _total: usize) {}
}

/// Ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {}

/// Reports progress through tracing
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingObserver;

impl ProgressObserver for LoggingObserver {
    fn on_file_start(&self, file: &Path, index: usize, total: usize) {
        debug!(file = %file.display(), position = index + 1, total = total, "Starting file");
    }

    fn on_file_complete(&self, file: &Path, _index: usize, duration: Duration) {
        debug!(file = %file.display(), duration_ms = %duration.as_millis(), "File complete");
    }

    fn on_error(&self, file: &Path, _index: usize, error: &ClassifiedError) {
        warn!(file = %file.display(), error_kind = %error.kind(), "File failed: {}", error.message());
    }

    fn on_progress(&self, completed: usize, total: usize) {
        info!(completed = completed, total = total, "Progress");
    }
}
