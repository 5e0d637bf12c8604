//! # Processing Capabilities
//!
//! The pipeline drives analysis through narrow capabilities supplied by the
//! caller: a [`FileProcessor`] that analyses one file and a [`FileReader`]
//! that loads file content. Behavior is layered by wrapping a processor
//! rather than by subtyping it; [`TracedProcessor`] is such a wrapper.

use std::any::Any;
use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use metrics::histogram;
use tracing::{debug, info_span, Instrument};

/// Analyses a single file
#[async_trait]
pub trait FileProcessor: Send + Sync {
    /// Analysis result for one file
    type Output: Clone + Send + Sync + 'static;

    /// Analyses `path`. When `content` is `None` the processor loads the file
    /// itself.
    async fn process_file(&self, path: &Path, content: Option<&str>) -> anyhow::Result<Self::Output>;

    /// Degraded analysis used once the primary call is exhausted.
    /// `Ok(None)` means no usable result could be produced.
    async fn fallback(&self, _path: &Path, _content: Option<&str>) -> anyhow::Result<Option<Self::Output>> {
        Ok(None)
    }

    /// Name used in spans and logs
    fn name(&self) -> &str {
        "file_processor"
    }
}

/// Loads file content
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FileReader: Send + Sync {
    async fn read_to_string(&self, path: &Path) -> anyhow::Result<String>;
}

/// Reads files from the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsFileReader;

#[async_trait]
impl FileReader for FsFileReader {
    async fn read_to_string(&self, path: &Path) -> anyhow::Result<String> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(content)
    }
}

/// Wraps a processor with a span per file and duration reporting
#[derive(Debug, Clone)]
pub struct TracedProcessor<P> {
    inner: P,
}

impl<P> TracedProcessor<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn into_inner(self) -> P {
        self.inner
    }
}

#[async_trait]
impl<P: FileProcessor> FileProcessor for TracedProcessor<P> {
    type Output = P::Output;

    async fn process_file(&self, path: &Path, content: Option<&str>) -> anyhow::Result<Self::Output> {
        let span = info_span!(
            "process_file",
            processor = %self.inner.name(),
            file = %path.display(),
            preloaded = content.is_some()
        );

        async {
            let start = Instant::now();
            let outcome = self.inner.process_file(path, content).await;
            let elapsed = start.elapsed();

            histogram!("pipeline.files.duration_ms", elapsed.as_millis() as f64);
            debug!(
                duration_ms = %elapsed.as_millis(),
                success = outcome.is_ok(),
                "File processed"
            );
            outcome
        }
        .instrument(span)
        .await
    }

    async fn fallback(&self, path: &Path, content: Option<&str>) -> anyhow::Result<Option<Self::Output>> {
        let span = info_span!(
            "fallback_file",
            processor = %self.inner.name(),
            file = %path.display()
        );

        async {
            let outcome = self.inner.fallback(path, content).await;
            debug!(
                produced = matches!(outcome, Ok(Some(_))),
                "Fallback finished"
            );
            outcome
        }
        .instrument(span)
        .await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// Readable text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio_test::assert_ok;

    struct Upper;

    #[async_trait]
    impl FileProcessor for Upper {
        type Output = String;

        async fn process_file(&self, path: &Path, content: Option<&str>) -> anyhow::Result<String> {
            match content {
                Some(content) => Ok(content.to_uppercase()),
                None => anyhow::bail!("no content for {}", path.display()),
            }
        }

        fn name(&self) -> &str {
            "upper"
        }
    }

    #[tokio::test]
    async fn test_fs_reader_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "fn main() {{}}").unwrap();

        let content = assert_ok!(FsFileReader.read_to_string(file.path()).await);
        assert_eq!(content, "fn main() {}");
    }

    #[tokio::test]
    async fn test_fs_reader_missing_file_is_io_error() {
        let err = FsFileReader
            .read_to_string(Path::new("/definitely/not/here.rs"))
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<std::io::Error>().is_some());
    }

    #[tokio::test]
    async fn test_traced_processor_delegates() {
        let traced = TracedProcessor::new(Upper);
        assert_eq!(traced.name(), "upper");

        let out = traced.process_file(Path::new("a.rs"), Some("abc")).await.unwrap();
        assert_eq!(out, "ABC");
        assert!(traced.process_file(Path::new("a.rs"), None).await.is_err());
        assert_eq!(traced.fallback(Path::new("a.rs"), None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_mock_reader() {
        let mut reader = MockFileReader::new();
        reader
            .expect_read_to_string()
            .withf(|path| path.to_str() == Some("src/lib.rs"))
            .times(1)
            .returning(|_| Ok("pub mod a;".to_string()));

        let content = reader.read_to_string(Path::new("src/lib.rs")).await.unwrap();
        assert_eq!(content, "pub mod a;");
    }

    #[test]
    fn test_panic_message_reads_common_payloads() {
        let from_str = std::panic::catch_unwind(|| panic!("analyser crashed")).unwrap_err();
        assert_eq!(panic_message(&*from_str), "analyser crashed");

        let from_string = std::panic::catch_unwind(|| panic!("{} crashed", "analyser")).unwrap_err();
        assert_eq!(panic_message(&*from_string), "analyser crashed");

        let other = std::panic::catch_unwind(|| std::panic::panic_any(7u8)).unwrap_err();
        assert_eq!(panic_message(&*other), "non-string panic payload");
    }
}
