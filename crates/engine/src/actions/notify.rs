//! Notification delivery seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::EngineResult;

/// Message handed to a [`Notifier`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub message: String,
    /// Delivery channel hint, e.g. "email" or "sms".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

/// Delivers notifications. Hosts plug in mail, chat or queue backends.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> EngineResult<()>;
}

/// Notifier that only writes a log line.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> EngineResult<()> {
        info!(
            recipient = %notification.recipient,
            channel = notification.channel.as_deref().unwrap_or("default"),
            subject = notification.subject.as_deref().unwrap_or(""),
            "Notification: {}",
            notification.message
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_notifier_accepts() {
        let notification = Notification {
            recipient: "mesa@example.org".to_string(),
            subject: None,
            message: "Nuevo expediente".to_string(),
            channel: Some("email".to_string()),
        };
        assert!(LogNotifier::new().send(&notification).await.is_ok());
    }
}
