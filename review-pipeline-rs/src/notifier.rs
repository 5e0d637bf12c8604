//! User-facing notifications. Delivery is fire-and-forget: a failing notifier
//! is logged and never affects the pipeline.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Info,
    Warning,
    Error,
    Success,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationKind::Info => write!(f, "info"),
            NotificationKind::Warning => write!(f, "warning"),
            NotificationKind::Error => write!(f, "error"),
            NotificationKind::Success => write!(f, "success"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
}

impl Notification {
    pub fn new<S: Into<String>>(kind: NotificationKind, message: S) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    pub fn info<S: Into<String>>(message: S) -> Self {
        Self::new(NotificationKind::Info, message)
    }

    pub fn warning<S: Into<String>>(message: S) -> Self {
        Self::new(NotificationKind::Warning, message)
    }

    pub fn error<S: Into<String>>(message: S) -> Self {
        Self::new(NotificationKind::Error, message)
    }

    pub fn success<S: Into<String>>(message: S) -> Self {
        Self::new(NotificationKind::Success, message)
    }
}

/// Notification sink
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Writes notifications to the tracing subscriber
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        match notification.kind {
            NotificationKind::Info | NotificationKind::Success => {
                info!(kind = %notification.kind, "{}", notification.message)
            }
            NotificationKind::Warning => warn!(kind = %notification.kind, "{}", notification.message),
            NotificationKind::Error => error!(kind = %notification.kind, "{}", notification.message),
        }
        Ok(())
    }
}

/// Delivers `notification`, swallowing any failure
pub async fn notify_quietly(notifier: &dyn Notifier, notification: Notification) {
    if let Err(e) = notifier.notify(&notification).await {
        warn!(
            kind = %notification.kind,
            error = %format!("{:#}", e),
            "Notifier failed; continuing"
        );
    }
}
