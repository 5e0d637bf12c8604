//! # Classified Error Types
//!
//! The closed taxonomy every pipeline failure is mapped into. A
//! [`ClassifiedError`] carries its kind-specific details together with a
//! severity, a retryability flag and user-facing guidance, all of which are
//! fixed when the error is constructed.

use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::ErrorContext;

/// A type alias for Result with the error type defaulting to [`ClassifiedError`]
pub type Result<T, E = ClassifiedError> = std::result::Result<T, E>;

/// The severity level of a classified error
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Degrades a single result, nothing else
    Low,
    /// A failure of one operation
    Medium,
    /// A failure likely to affect many operations
    High,
    /// The pipeline cannot do useful work until this is fixed
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// The thirteen error kinds, without their details
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    LlmProvider,
    ApiRequest,
    Network,
    Authentication,
    Permission,
    RateLimit,
    FileAccess,
    Timeout,
    ServiceUnavailable,
    GitOperation,
    Configuration,
    Unknown,
}

impl ErrorKind {
    /// Every kind, in declaration order
    pub const ALL: [ErrorKind; 13] = [
        ErrorKind::Validation,
        ErrorKind::LlmProvider,
        ErrorKind::ApiRequest,
        ErrorKind::Network,
        ErrorKind::Authentication,
        ErrorKind::Permission,
        ErrorKind::RateLimit,
        ErrorKind::FileAccess,
        ErrorKind::Timeout,
        ErrorKind::ServiceUnavailable,
        ErrorKind::GitOperation,
        ErrorKind::Configuration,
        ErrorKind::Unknown,
    ];

    /// Stable identifier used for metric labels and map keys
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::LlmProvider => "llm_provider",
            ErrorKind::ApiRequest => "api_request",
            ErrorKind::Network => "network",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Permission => "permission",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::FileAccess => "file_access",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::GitOperation => "git_operation",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Whether errors of this kind are retried unless the details say otherwise.
    ///
    /// Validation, credential, permission and configuration failures are caused
    /// by the input rather than the environment, so they are never retried.
    /// Unknown errors are retried so transient issues are not masked.
    pub fn default_retryable(&self) -> bool {
        match self {
            ErrorKind::Validation
            | ErrorKind::Authentication
            | ErrorKind::Permission
            | ErrorKind::FileAccess
            | ErrorKind::GitOperation
            | ErrorKind::Configuration => false,
            ErrorKind::LlmProvider
            | ErrorKind::ApiRequest
            | ErrorKind::Network
            | ErrorKind::RateLimit
            | ErrorKind::Timeout
            | ErrorKind::ServiceUnavailable
            | ErrorKind::Unknown => true,
        }
    }

    /// Severity of this kind unless the details say otherwise
    pub fn default_severity(&self) -> Severity {
        match self {
            ErrorKind::Configuration => Severity::Critical,
            ErrorKind::LlmProvider
            | ErrorKind::Authentication
            | ErrorKind::Permission
            | ErrorKind::ServiceUnavailable => Severity::High,
            _ => Severity::Medium,
        }
    }

    /// Text shown to the user next to a failure of this kind
    pub fn user_guidance(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "Check the input data; it does not match the expected format.",
            ErrorKind::LlmProvider => "The language model provider failed. Check the provider status or switch model.",
            ErrorKind::ApiRequest => "A remote API request failed. Check the endpoint and request parameters.",
            ErrorKind::Network => "Check your network connection and proxy settings, then try again.",
            ErrorKind::Authentication => "Check that your API token or credentials are valid and not expired.",
            ErrorKind::Permission => "Your account lacks permission for this resource. Request access or use another token.",
            ErrorKind::RateLimit => "The provider rate limit was reached. Wait for the limit to reset or reduce concurrency.",
            ErrorKind::FileAccess => "Check that the file exists and is readable.",
            ErrorKind::Timeout => "The operation timed out. Try again later or increase the timeout.",
            ErrorKind::ServiceUnavailable => "The service is temporarily unavailable. Try again later.",
            ErrorKind::GitOperation => "A git operation failed. Check that the repository is in a clean state.",
            ErrorKind::Configuration => "Fix the configuration value reported in the error and rerun.",
            ErrorKind::Unknown => "An unexpected error occurred. Rerun with debug logging for details.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "Validation Error"),
            ErrorKind::LlmProvider => write!(f, "LLM Provider Error"),
            ErrorKind::ApiRequest => write!(f, "API Request Error"),
            ErrorKind::Network => write!(f, "Network Error"),
            ErrorKind::Authentication => write!(f, "Authentication Error"),
            ErrorKind::Permission => write!(f, "Permission Error"),
            ErrorKind::RateLimit => write!(f, "Rate Limit Error"),
            ErrorKind::FileAccess => write!(f, "File Access Error"),
            ErrorKind::Timeout => write!(f, "Timeout Error"),
            ErrorKind::ServiceUnavailable => write!(f, "Service Unavailable Error"),
            ErrorKind::GitOperation => write!(f, "Git Operation Error"),
            ErrorKind::Configuration => write!(f, "Configuration Error"),
            ErrorKind::Unknown => write!(f, "Unknown Error"),
        }
    }
}

/// Kind-specific payload of a classified error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ErrorDetails {
    Validation {
        field: Option<String>,
        rule: Option<String>,
    },
    LlmProvider {
        provider: Option<String>,
        model: Option<String>,
    },
    ApiRequest {
        status: Option<u16>,
        endpoint: Option<String>,
    },
    Network,
    Authentication,
    Permission {
        resource: Option<String>,
    },
    RateLimit {
        reset_time: Option<DateTime<Utc>>,
        limit: Option<u32>,
        remaining: Option<u32>,
    },
    FileAccess {
        path: Option<PathBuf>,
    },
    Timeout {
        timeout_ms: Option<u64>,
    },
    ServiceUnavailable {
        estimated_recovery: Option<DateTime<Utc>>,
    },
    GitOperation {
        command: Option<String>,
    },
    Configuration {
        key: Option<String>,
    },
    Unknown,
}

impl ErrorDetails {
    /// The detail-free kind of this payload
    pub fn kind(&self) -> ErrorKind {
        match self {
            ErrorDetails::Validation { .. } => ErrorKind::Validation,
            ErrorDetails::LlmProvider { .. } => ErrorKind::LlmProvider,
            ErrorDetails::ApiRequest { .. } => ErrorKind::ApiRequest,
            ErrorDetails::Network => ErrorKind::Network,
            ErrorDetails::Authentication => ErrorKind::Authentication,
            ErrorDetails::Permission { .. } => ErrorKind::Permission,
            ErrorDetails::RateLimit { .. } => ErrorKind::RateLimit,
            ErrorDetails::FileAccess { .. } => ErrorKind::FileAccess,
            ErrorDetails::Timeout { .. } => ErrorKind::Timeout,
            ErrorDetails::ServiceUnavailable { .. } => ErrorKind::ServiceUnavailable,
            ErrorDetails::GitOperation { .. } => ErrorKind::GitOperation,
            ErrorDetails::Configuration { .. } => ErrorKind::Configuration,
            ErrorDetails::Unknown => ErrorKind::Unknown,
        }
    }

    /// Severity derived from the kind and, for API requests, the status code
    pub fn severity(&self) -> Severity {
        match self {
            ErrorDetails::ApiRequest { status: Some(status), .. } if *status >= 500 => Severity::High,
            other => other.kind().default_severity(),
        }
    }

    /// Retryability derived from the kind and, for API requests, the status code
    pub fn retryable(&self) -> bool {
        match self {
            ErrorDetails::ApiRequest { status: Some(status), .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            other => other.kind().default_retryable(),
        }
    }
}

/// A failure mapped into the pipeline's taxonomy.
///
/// Severity and retryability are computed from the details when the error is
/// built; the builder methods consume `self`, so a constructed error is never
/// changed afterwards. Cloning shares the opaque source behind an `Arc`.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifiedError {
    id: Uuid,
    details: ErrorDetails,
    message: String,
    severity: Severity,
    retryable: bool,
    user_guidance: String,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<ErrorContext>,
    #[serde(skip)]
    source: Option<Arc<anyhow::Error>>,
}

impl ClassifiedError {
    /// Creates a new error from its details and message
    pub fn new<S: Into<String>>(details: ErrorDetails, message: S) -> Self {
        let kind = details.kind();
        Self {
            id: Uuid::new_v4(),
            severity: details.severity(),
            retryable: details.retryable(),
            user_guidance: kind.user_guidance().to_string(),
            details,
            message: message.into(),
            timestamp: Utc::now(),
            context: None,
            source: None,
        }
    }

    pub fn validation<S: Into<String>>(field: Option<String>, message: S) -> Self {
        Self::new(ErrorDetails::Validation { field, rule: None }, message)
    }

    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorDetails::Network, message)
    }

    pub fn timeout<S: Into<String>>(timeout_ms: Option<u64>, message: S) -> Self {
        Self::new(ErrorDetails::Timeout { timeout_ms }, message)
    }

    pub fn authentication<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorDetails::Authentication, message)
    }

    pub fn rate_limited<S: Into<String>>(reset_time: Option<DateTime<Utc>>, message: S) -> Self {
        Self::new(
            ErrorDetails::RateLimit {
                reset_time,
                limit: None,
                remaining: None,
            },
            message,
        )
    }

    pub fn service_unavailable<S: Into<String>>(
        estimated_recovery: Option<DateTime<Utc>>,
        message: S,
    ) -> Self {
        Self::new(ErrorDetails::ServiceUnavailable { estimated_recovery }, message)
    }

    pub fn file_access<S: Into<String>>(path: Option<PathBuf>, message: S) -> Self {
        Self::new(ErrorDetails::FileAccess { path }, message)
    }

    pub fn unknown<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorDetails::Unknown, message)
    }

    /// Attaches the context of the failure site
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Overrides the kind's default retryability for one operation
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Replaces the default guidance text
    pub fn with_guidance<S: Into<String>>(mut self, guidance: S) -> Self {
        self.user_guidance = guidance.into();
        self
    }

    /// Chains the original failure
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> ErrorKind {
        self.details.kind()
    }

    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn user_guidance(&self) -> &str {
        &self.user_guidance
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        self.context.as_ref()
    }

    /// Rate-limit reset time, if the provider supplied one
    pub fn reset_time(&self) -> Option<DateTime<Utc>> {
        match &self.details {
            ErrorDetails::RateLimit { reset_time, .. } => *reset_time,
            _ => None,
        }
    }

    /// Estimated recovery time of an unavailable service, if known
    pub fn estimated_recovery(&self) -> Option<DateTime<Utc>> {
        match &self.details {
            ErrorDetails::ServiceUnavailable { estimated_recovery } => *estimated_recovery,
            _ => None,
        }
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.kind(), self.message)?;

        if let Some(context) = &self.context {
            write!(f, " ({})", context)?;
        }

        Ok(())
    }
}

impl StdError for ClassifiedError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_deref().map(|err| {
            let err: &(dyn StdError + Send + Sync + 'static) = err.as_ref();
            err as &(dyn StdError + 'static)
        })
    }
}
