//! `send_notification` handler.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::actions::notify::{Notification, Notifier};
use crate::actions::registry::{ActionHandler, ActionSpec};
use crate::actions::template::MessageTemplate;
use crate::entity::Entity;
use crate::error::EngineResult;

#[derive(Debug, Deserialize)]
struct SendNotificationParams {
    recipient: String,
    #[serde(default)]
    subject: Option<String>,
    message: String,
    #[serde(default)]
    channel: Option<String>,
}

/// `send_notification {recipient, subject?, message, channel?}`
///
/// Recipient, subject and message are rendered as templates over the
/// entity context before delivery.
pub struct SendNotificationHandler {
    notifier: Arc<dyn Notifier>,
    templates: MessageTemplate,
}

impl SendNotificationHandler {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            templates: MessageTemplate::new(),
        }
    }
}

#[async_trait]
impl ActionHandler for SendNotificationHandler {
    fn name(&self) -> &'static str {
        "send_notification"
    }

    async fn handle(&self, action: &ActionSpec, entity: &dyn Entity) -> EngineResult<Value> {
        let params: SendNotificationParams = action.decode()?;
        let context = entity.context();

        let notification = Notification {
            recipient: self.templates.render(&params.recipient, &context)?,
            subject: params
                .subject
                .as_deref()
                .map(|s| self.templates.render(s, &context))
                .transpose()?,
            message: self.templates.render(&params.message, &context)?,
            channel: params.channel,
        };

        self.notifier.send(&notification).await?;
        debug!(entity = %entity.label(), recipient = %notification.recipient, "Notification sent");

        Ok(json!({
            "recipient": notification.recipient,
            "channel": notification.channel,
            "message": notification.message,
        }))
    }
}

impl std::fmt::Debug for SendNotificationHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendNotificationHandler").finish()
    }
}
