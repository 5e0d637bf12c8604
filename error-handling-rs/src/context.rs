//! # Error Context
//!
//! The immutable record of where a failure happened. A context is created at
//! each failure site and carried through retries; every retry gets a fresh
//! context with the attempt number incremented.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Context information attached to a classified error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    /// The operation being performed when the error occurred
    operation: String,
    /// The file being processed, if any
    file_path: Option<PathBuf>,
    /// 1-based attempt number
    attempt_number: u32,
    /// When this context was created
    timestamp: DateTime<Utc>,
    /// Additional context keys and values
    metadata: serde_json::Map<String, serde_json::Value>,
}

impl ErrorContext {
    /// Creates a first-attempt context for the specified operation
    pub fn new<S: Into<String>>(operation: S) -> Self {
        Self {
            operation: operation.into(),
            file_path: None,
            attempt_number: 1,
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Creates a first-attempt context for an operation on one file
    pub fn for_file<S, P>(operation: S, path: P) -> Self
    where
        S: Into<String>,
        P: AsRef<Path>,
    {
        let mut context = Self::new(operation);
        context.file_path = Some(path.as_ref().to_path_buf());
        context
    }

    /// Adds a key-value pair to the metadata
    pub fn with_metadata<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Serialize,
    {
        if let Ok(value) = serde_json::to_value(value) {
            self.metadata.insert(key.into(), value);
        }
        self
    }

    /// Returns the context for the following attempt
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt_number: self.attempt_number.saturating_add(1),
            timestamp: Utc::now(),
            ..self.clone()
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    pub fn attempt_number(&self) -> u32 {
        self.attempt_number
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn metadata(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.metadata
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "during operation: {}", self.operation)?;

        if let Some(path) = &self.file_path {
            write!(f, " on {}", path.display())?;
        }

        write!(f, ", attempt {}", self.attempt_number)?;

        if !self.metadata.is_empty() {
            write!(f, " [")?;
            let mut first = true;
            for (k, v) in &self.metadata {
                if !first {
                    write!(f, ", ")?;
                }
                write!(f, "{}: {}", k, v)?;
                first = false;
            }
            write!(f, "]")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_creation() {
        let ctx = ErrorContext::for_file("review_file", "src/lib.rs")
            .with_metadata("model", "gpt-4o")
            .with_metadata("chunk", 3);

        assert_eq!(ctx.operation(), "review_file");
        assert_eq!(ctx.file_path(), Some(Path::new("src/lib.rs")));
        assert_eq!(ctx.attempt_number(), 1);
        assert_eq!(ctx.metadata().len(), 2);
    }

    #[test]
    fn test_next_attempt_leaves_original_untouched() {
        let first = ErrorContext::new("review_file").with_metadata("k", "v");
        let second = first.next_attempt();
        let third = second.next_attempt();

        assert_eq!(first.attempt_number(), 1);
        assert_eq!(second.attempt_number(), 2);
        assert_eq!(third.attempt_number(), 3);
        assert_eq!(third.operation(), "review_file");
        assert_eq!(third.metadata(), first.metadata());
    }

    #[test]
    fn test_display() {
        let ctx = ErrorContext::for_file("read", "a.rs").with_metadata("size", 10);
        let text = ctx.to_string();

        assert!(text.contains("during operation: read"));
        assert!(text.contains("a.rs"));
        assert!(text.contains("attempt 1"));
        assert!(text.contains("size: 10"));
    }
}
