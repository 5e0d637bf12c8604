//! # Error Classification
//!
//! Maps an arbitrary failure into exactly one [`ClassifiedError`]. The
//! classifier is total: it never fails and never panics, whatever it is given.
//!
//! Classification first looks for concrete error types anywhere in the
//! `anyhow` chain (an already classified error, structured validation errors,
//! I/O errors, HTTP client errors, elapsed timeouts, JSON errors). Untyped
//! failures fall through to an ordered list of message rules where the first
//! match wins. Anything left over is `Unknown`, which is retryable.

use std::cmp::Ordering;

use chrono::{Duration as ChronoDuration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::ErrorContext;
use crate::types::{ClassifiedError, ErrorDetails, ErrorKind};

/// One offending field of a structured validation failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Dotted path of the field
    pub path: String,
    /// Human-readable message
    pub message: String,
    /// Validation rule or code that failed, if known
    pub code: Option<String>,
}

impl FieldError {
    fn into_classified(self, context: Option<&ErrorContext>) -> ClassifiedError {
        let message = format!("{}: {}", self.path, self.message);
        attach(
            ClassifiedError::new(
                ErrorDetails::Validation {
                    field: Some(self.path),
                    rule: self.code,
                },
                message,
            ),
            context,
        )
    }
}

/// Extracts per-field errors from a structured validation failure.
///
/// Recognises `validator::ValidationErrors` anywhere in the error chain and
/// JSON payloads shaped like `{"issues": [{"path": [...], "message": "..."}]}`.
/// Returns `None` for anything else. Fields are ordered by path.
pub fn try_parse_structured_validation_error(raw: &anyhow::Error) -> Option<Vec<FieldError>> {
    for cause in raw.chain() {
        if let Some(errors) = cause.downcast_ref::<validator::ValidationErrors>() {
            return Some(field_errors_from_validator(errors));
        }
    }

    None
}

/// JSON flavour of [`try_parse_structured_validation_error`]
pub fn try_parse_structured_validation_value(value: &Value) -> Option<Vec<FieldError>> {
    let issues = value.get("issues")?.as_array()?;
    if issues.is_empty() {
        return None;
    }

    let mut fields: Vec<FieldError> = issues
        .iter()
        .map(|issue| {
            let path = match issue.get("path") {
                Some(Value::Array(segments)) => segments
                    .iter()
                    .map(|segment| match segment {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join("."),
                Some(Value::String(path)) => path.clone(),
                _ => String::new(),
            };
            let path = if path.is_empty() { "<root>".to_string() } else { path };

            FieldError {
                path,
                message: issue
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("invalid value")
                    .to_string(),
                code: issue.get("code").and_then(Value::as_str).map(str::to_string),
            }
        })
        .collect();

    fields.sort_by(|a, b| a.path.cmp(&b.path));
    Some(fields)
}

fn field_errors_from_validator(errors: &validator::ValidationErrors) -> Vec<FieldError> {
    let mut fields = Vec::new();

    for (field, field_errors) in errors.field_errors() {
        for err in field_errors.iter() {
            let message = err
                .message
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_else(|| format!("failed '{}' validation", err.code));

            fields.push(FieldError {
                path: field.to_string(),
                message,
                code: Some(err.code.to_string()),
            });
        }
    }

    fields.sort_by(|a, b| match a.path.cmp(&b.path) {
        Ordering::Equal => a.code.cmp(&b.code),
        other => other,
    });
    fields
}

/// A message heuristic: when `pattern` matches the lower-cased message text,
/// the failure is classified as `kind`.
#[derive(Debug, Clone)]
pub struct MessageRule {
    pub kind: ErrorKind,
    pub pattern: Regex,
}

impl MessageRule {
    pub fn new(kind: ErrorKind, pattern: Regex) -> Self {
        Self { kind, pattern }
    }
}

// Order matters: timeout must win over the network terms, since messages such
// as "connection timeout" are timeouts.
static STANDARD_RULES: Lazy<Vec<MessageRule>> = Lazy::new(|| {
    let rules: [(ErrorKind, &str); 9] = [
        (ErrorKind::Timeout, r"timed? ?out|timeout|etimedout|deadline exceeded"),
        (
            ErrorKind::Network,
            r"network|connection|econnrefused|econnreset|enotfound|socket hang up|\bdns\b|unreachable",
        ),
        (
            ErrorKind::Authentication,
            r"\bauth(?:entication|enticate|orization|orize)?\b|unauthori[sz]ed|unauthenticated|forbidden|invalid api key|\b401\b|\b403\b",
        ),
        (ErrorKind::Permission, r"permission|access denied|not permitted|\beperm\b"),
        (ErrorKind::RateLimit, r"rate.?limit|too many requests|\b429\b|quota exceeded"),
        (
            ErrorKind::FileAccess,
            r"\bfile\b|enoent|eacces|eisdir|no such file|directory",
        ),
        (
            ErrorKind::ServiceUnavailable,
            r"service unavailable|server error|bad gateway|overloaded|\b50[234]\b",
        ),
        (ErrorKind::GitOperation, r"\bgit\b"),
        (ErrorKind::Configuration, r"config"),
    ];

    rules
        .iter()
        .filter_map(|(kind, pattern)| Regex::new(pattern).ok().map(|re| MessageRule::new(*kind, re)))
        .collect()
});

static RETRY_AFTER: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"retry[- ]after[:= ]+(\d+)").ok());

/// Maps failures into the classified error taxonomy
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    rules: Vec<MessageRule>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self {
            rules: STANDARD_RULES.clone(),
        }
    }
}

impl ErrorClassifier {
    /// Creates a classifier with the standard message rules
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a classifier with a custom ordered rule list
    pub fn with_rules(rules: Vec<MessageRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[MessageRule] {
        &self.rules
    }

    /// Classifies a borrowed failure.
    ///
    /// An error that is already classified is returned unchanged. A structured
    /// validation failure yields the error of its first field.
    pub fn classify(&self, raw: &anyhow::Error, context: Option<&ErrorContext>) -> ClassifiedError {
        if let Some(classified) = raw.downcast_ref::<ClassifiedError>() {
            return classified.clone();
        }

        if let Some(fields) = try_parse_structured_validation_error(raw) {
            if let Some(first) = fields.into_iter().next() {
                return first.into_classified(context);
            }
        }

        for cause in raw.chain() {
            if let Some(classified) = cause.downcast_ref::<ClassifiedError>() {
                return classified.clone();
            }
            if let Some(err) = cause.downcast_ref::<std::io::Error>() {
                return self.classify_io(err, &format!("{:#}", raw), context);
            }
            if let Some(err) = cause.downcast_ref::<reqwest::Error>() {
                if let Some(classified) = self.classify_http(err, &format!("{:#}", raw), context) {
                    return classified;
                }
            }
            if cause.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
                return attach(
                    ClassifiedError::timeout(None, format!("{:#}", raw)),
                    context,
                );
            }
            if let Some(err) = cause.downcast_ref::<serde_json::Error>() {
                if err.is_data() || err.is_syntax() || err.is_eof() {
                    return attach(
                        ClassifiedError::validation(None, format!("{:#}", raw)),
                        context,
                    );
                }
            }
        }

        self.classify_message(&format!("{:#}", raw), context)
    }

    /// Classifies an owned failure, keeping it as the source of the result
    pub fn classify_error(&self, raw: anyhow::Error, context: Option<&ErrorContext>) -> ClassifiedError {
        match raw.downcast::<ClassifiedError>() {
            Ok(classified) => classified,
            Err(raw) => self.classify(&raw, context).with_source(raw),
        }
    }

    /// Classifies a failure into every error it describes.
    ///
    /// Structured validation failures produce one error per offending field;
    /// everything else produces a single error.
    pub fn classify_all(&self, raw: &anyhow::Error, context: Option<&ErrorContext>) -> Vec<ClassifiedError> {
        if raw.downcast_ref::<ClassifiedError>().is_none() {
            if let Some(fields) = try_parse_structured_validation_error(raw) {
                if !fields.is_empty() {
                    return fields.into_iter().map(|f| f.into_classified(context)).collect();
                }
            }
        }

        vec![self.classify(raw, context)]
    }

    /// Classifies a possibly missing failure; `None` is `Unknown`
    pub fn classify_optional(
        &self,
        raw: Option<&anyhow::Error>,
        context: Option<&ErrorContext>,
    ) -> ClassifiedError {
        match raw {
            Some(raw) => self.classify(raw, context),
            None => attach(ClassifiedError::unknown("no error information available"), context),
        }
    }

    /// Classifies an arbitrary JSON value, as returned by remote APIs or
    /// untyped collaborators.
    pub fn classify_value(&self, value: &Value, context: Option<&ErrorContext>) -> ClassifiedError {
        match value {
            Value::Null => attach(ClassifiedError::unknown("no error information available"), context),
            Value::String(message) => self.classify_message(message, context),
            Value::Object(map) => {
                if let Some(first) = try_parse_structured_validation_value(value)
                    .and_then(|fields| fields.into_iter().next())
                {
                    return first.into_classified(context);
                }

                let message = map
                    .get("message")
                    .or_else(|| map.get("error"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| value.to_string());

                let status = map
                    .get("status")
                    .or_else(|| map.get("statusCode"))
                    .and_then(Value::as_u64)
                    .and_then(|s| u16::try_from(s).ok());

                match status {
                    Some(status) => {
                        let endpoint = map.get("url").and_then(Value::as_str).map(str::to_string);
                        classify_status(status, endpoint, &message, context)
                    }
                    None => self.classify_message(&message, context),
                }
            }
            other => self.classify_message(&other.to_string(), context),
        }
    }

    /// Applies the message rules to free text
    pub fn classify_message(&self, message: &str, context: Option<&ErrorContext>) -> ClassifiedError {
        let lowered = message.to_lowercase();
        let kind = self
            .rules
            .iter()
            .find(|rule| rule.pattern.is_match(&lowered))
            .map(|rule| rule.kind)
            .unwrap_or(ErrorKind::Unknown);

        attach(
            ClassifiedError::new(details_for(kind, &lowered, context), message),
            context,
        )
    }

    fn classify_io(
        &self,
        err: &std::io::Error,
        message: &str,
        context: Option<&ErrorContext>,
    ) -> ClassifiedError {
        use std::io::ErrorKind as Io;

        let path = context.and_then(|c| c.file_path()).map(|p| p.to_path_buf());
        let classified = match err.kind() {
            Io::TimedOut => ClassifiedError::timeout(None, message),
            Io::ConnectionRefused
            | Io::ConnectionReset
            | Io::ConnectionAborted
            | Io::NotConnected
            | Io::AddrInUse
            | Io::AddrNotAvailable
            | Io::BrokenPipe => ClassifiedError::network(message),
            Io::InvalidData | Io::InvalidInput => ClassifiedError::new(
                ErrorDetails::Validation {
                    field: None,
                    rule: Some("encoding".to_string()),
                },
                message,
            ),
            _ => ClassifiedError::file_access(path, message),
        };

        attach(classified, context)
    }

    fn classify_http(
        &self,
        err: &reqwest::Error,
        message: &str,
        context: Option<&ErrorContext>,
    ) -> Option<ClassifiedError> {
        let endpoint = err.url().map(|u| u.to_string());

        if err.is_timeout() {
            return Some(attach(ClassifiedError::timeout(None, message), context));
        }
        if err.is_connect() {
            return Some(attach(ClassifiedError::network(message), context));
        }

        err.status()
            .map(|status| classify_status(status.as_u16(), endpoint, message, context))
    }
}

/// Maps an HTTP status code into the taxonomy
fn classify_status(
    status: u16,
    endpoint: Option<String>,
    message: &str,
    context: Option<&ErrorContext>,
) -> ClassifiedError {
    let classified = match status {
        401 => ClassifiedError::authentication(message),
        403 => ClassifiedError::new(ErrorDetails::Permission { resource: endpoint }, message),
        408 => ClassifiedError::timeout(None, message),
        429 => ClassifiedError::new(
            ErrorDetails::RateLimit {
                reset_time: retry_after_hint(&message.to_lowercase()),
                limit: None,
                remaining: None,
            },
            message,
        ),
        503 => ClassifiedError::service_unavailable(None, message),
        _ => ClassifiedError::new(
            ErrorDetails::ApiRequest {
                status: Some(status),
                endpoint,
            },
            message,
        ),
    };

    attach(classified, context)
}

fn details_for(kind: ErrorKind, lowered: &str, context: Option<&ErrorContext>) -> ErrorDetails {
    match kind {
        ErrorKind::Validation => ErrorDetails::Validation { field: None, rule: None },
        ErrorKind::LlmProvider => ErrorDetails::LlmProvider { provider: None, model: None },
        ErrorKind::ApiRequest => ErrorDetails::ApiRequest { status: None, endpoint: None },
        ErrorKind::Network => ErrorDetails::Network,
        ErrorKind::Authentication => ErrorDetails::Authentication,
        ErrorKind::Permission => ErrorDetails::Permission { resource: None },
        ErrorKind::RateLimit => ErrorDetails::RateLimit {
            reset_time: retry_after_hint(lowered),
            limit: None,
            remaining: None,
        },
        ErrorKind::FileAccess => ErrorDetails::FileAccess {
            path: context.and_then(|c| c.file_path()).map(|p| p.to_path_buf()),
        },
        ErrorKind::Timeout => ErrorDetails::Timeout { timeout_ms: None },
        ErrorKind::ServiceUnavailable => ErrorDetails::ServiceUnavailable {
            estimated_recovery: retry_after_hint(lowered),
        },
        ErrorKind::GitOperation => ErrorDetails::GitOperation { command: None },
        ErrorKind::Configuration => ErrorDetails::Configuration { key: None },
        ErrorKind::Unknown => ErrorDetails::Unknown,
    }
}

/// Turns "retry after N" (seconds) into an absolute time
fn retry_after_hint(lowered: &str) -> Option<chrono::DateTime<Utc>> {
    let re = RETRY_AFTER.as_ref()?;
    let seconds: i64 = re.captures(lowered)?.get(1)?.as_str().parse().ok()?;
    Some(Utc::now() + ChronoDuration::seconds(seconds))
}

fn attach(error: ClassifiedError, context: Option<&ErrorContext>) -> ClassifiedError {
    match context {
        Some(context) => error.with_context(context.clone()),
        None => error,
    }
}
