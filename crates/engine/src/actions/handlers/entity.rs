//! Handlers that change the entity itself.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::actions::notify::{Notification, Notifier};
use crate::actions::registry::{ActionHandler, ActionSpec};
use crate::entity::{Assignable, Entity, Updatable};
use crate::error::{EngineError, EngineResult};
use crate::rules::compare::loose_eq;
use crate::workflow::types::Assignee;

fn updatable(entity: &dyn Entity) -> EngineResult<&dyn Updatable> {
    entity
        .as_updatable()
        .ok_or_else(|| EngineError::MissingCapability(format!("{} is not updatable", entity.label())))
}

fn assignable(entity: &dyn Entity) -> EngineResult<&dyn Assignable> {
    entity.as_assignable().ok_or_else(|| {
        EngineError::MissingCapability(format!("{} is not assignable", entity.label()))
    })
}

/// Accept string or numeric identifiers.
fn identifier(value: &Value, field: &str) -> EngineResult<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(EngineError::InvalidPayload(format!(
            "'{}' must be a non-empty string or number",
            field
        ))),
    }
}

async fn set_fields(entity: &dyn Entity, fields: Map<String, Value>) -> EngineResult<bool> {
    updatable(entity)?.update(fields).await
}

#[derive(Debug, Deserialize)]
struct UpdateFieldParams {
    field: String,
    #[serde(default)]
    value: Value,
}

/// `update_field {field, value}`
#[derive(Debug, Clone, Default)]
pub struct UpdateFieldHandler;

#[async_trait]
impl ActionHandler for UpdateFieldHandler {
    fn name(&self) -> &'static str {
        "update_field"
    }

    async fn handle(&self, action: &ActionSpec, entity: &dyn Entity) -> EngineResult<Value> {
        let params: UpdateFieldParams = action.decode()?;
        if params.field.trim().is_empty() {
            return Err(EngineError::InvalidPayload("'field' must not be empty".to_string()));
        }

        let mut fields = Map::new();
        fields.insert(params.field.clone(), params.value.clone());
        let changed = set_fields(entity, fields).await?;

        debug!(entity = %entity.label(), field = %params.field, changed, "Field updated");
        Ok(json!({"field": params.field, "value": params.value, "changed": changed}))
    }
}

#[derive(Debug, Deserialize)]
struct AssignToUserParams {
    user_id: Value,
}

/// `assign_to_user {user_id}`
#[derive(Debug, Clone, Default)]
pub struct AssignToUserHandler;

#[async_trait]
impl ActionHandler for AssignToUserHandler {
    fn name(&self) -> &'static str {
        "assign_to_user"
    }

    async fn handle(&self, action: &ActionSpec, entity: &dyn Entity) -> EngineResult<Value> {
        let params: AssignToUserParams = action.decode()?;
        let assignee = Assignee::user(identifier(&params.user_id, "user_id")?);
        assignable(entity)?.assign(&assignee).await?;

        info!(entity = %entity.label(), user_id = %assignee.id, "Assigned to user");
        Ok(json!({"assignee_type": "user", "assignee_id": assignee.id}))
    }
}

#[derive(Debug, Deserialize)]
struct AssignToRoleParams {
    role: String,
}

/// `assign_to_role {role}`
#[derive(Debug, Clone, Default)]
pub struct AssignToRoleHandler;

#[async_trait]
impl ActionHandler for AssignToRoleHandler {
    fn name(&self) -> &'static str {
        "assign_to_role"
    }

    async fn handle(&self, action: &ActionSpec, entity: &dyn Entity) -> EngineResult<Value> {
        let params: AssignToRoleParams = action.decode()?;
        let assignee = Assignee::role(identifier(&Value::String(params.role), "role")?);
        assignable(entity)?.assign(&assignee).await?;

        info!(entity = %entity.label(), role = %assignee.id, "Assigned to role");
        Ok(json!({"assignee_type": "role", "assignee_id": assignee.id}))
    }
}

#[derive(Debug, Deserialize)]
struct AddTagParams {
    tag: String,
}

/// `add_tag {tag}`: appends to the entity's `tags` list if absent.
#[derive(Debug, Clone, Default)]
pub struct AddTagHandler;

#[async_trait]
impl ActionHandler for AddTagHandler {
    fn name(&self) -> &'static str {
        "add_tag"
    }

    async fn handle(&self, action: &ActionSpec, entity: &dyn Entity) -> EngineResult<Value> {
        let params: AddTagParams = action.decode()?;
        let tag = Value::String(params.tag.clone());

        let mut tags = match entity.field("tags") {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![other],
        };
        let added = !tags.iter().any(|existing| loose_eq(existing, &tag));
        if added {
            tags.push(tag);
            let mut fields = Map::new();
            fields.insert("tags".to_string(), Value::Array(tags));
            set_fields(entity, fields).await?;
        } else {
            // Capability is required even when nothing changes.
            updatable(entity)?;
        }

        Ok(json!({"tag": params.tag, "added": added}))
    }
}

#[derive(Debug, Deserialize)]
struct SetPriorityParams {
    priority: Value,
}

/// `set_priority {priority}`
#[derive(Debug, Clone, Default)]
pub struct SetPriorityHandler;

#[async_trait]
impl ActionHandler for SetPriorityHandler {
    fn name(&self) -> &'static str {
        "set_priority"
    }

    async fn handle(&self, action: &ActionSpec, entity: &dyn Entity) -> EngineResult<Value> {
        let params: SetPriorityParams = action.decode()?;
        if params.priority.is_null() {
            return Err(EngineError::InvalidPayload("'priority' is required".to_string()));
        }

        let mut fields = Map::new();
        fields.insert("priority".to_string(), params.priority.clone());
        let changed = set_fields(entity, fields).await?;
        Ok(json!({"priority": params.priority, "changed": changed}))
    }
}

#[derive(Debug, Deserialize)]
struct EscalateParams {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    user_id: Option<Value>,
    #[serde(default)]
    reason: Option<String>,
    /// Recipient to notify about the escalation.
    #[serde(default)]
    notify: Option<String>,
}

/// `escalate {role | user_id, reason?, notify?}`
///
/// Reassigns the entity, flags it as escalated when it is updatable and
/// optionally notifies a recipient.
#[derive(Clone, Default)]
pub struct EscalateHandler {
    notifier: Option<Arc<dyn Notifier>>,
}

impl EscalateHandler {
    pub fn new(notifier: Option<Arc<dyn Notifier>>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl ActionHandler for EscalateHandler {
    fn name(&self) -> &'static str {
        "escalate"
    }

    async fn handle(&self, action: &ActionSpec, entity: &dyn Entity) -> EngineResult<Value> {
        let params: EscalateParams = action.decode()?;
        let assignee = match (&params.role, &params.user_id) {
            (Some(role), None) => Assignee::role(role.clone()),
            (None, Some(user)) => Assignee::user(identifier(user, "user_id")?),
            _ => {
                return Err(EngineError::InvalidPayload(
                    "escalate needs exactly one of 'role' or 'user_id'".to_string(),
                ))
            }
        };

        assignable(entity)?.assign(&assignee).await?;

        if let Some(target) = entity.as_updatable() {
            let mut fields = Map::new();
            fields.insert("escalated".to_string(), Value::Bool(true));
            if let Some(reason) = &params.reason {
                fields.insert("escalation_reason".to_string(), Value::String(reason.clone()));
            }
            target.update(fields).await?;
        }

        let notified = match (&params.notify, &self.notifier) {
            (Some(recipient), Some(notifier)) => {
                let message = match &params.reason {
                    Some(reason) => format!("{} escalated to {}: {}", entity.label(), assignee.id, reason),
                    None => format!("{} escalated to {}", entity.label(), assignee.id),
                };
                notifier
                    .send(&Notification {
                        recipient: recipient.clone(),
                        subject: Some("Escalation".to_string()),
                        message,
                        channel: None,
                    })
                    .await?;
                true
            }
            _ => false,
        };

        info!(
            entity = %entity.label(),
            assignee_type = %assignee.kind,
            assignee_id = %assignee.id,
            "Entity escalated"
        );
        Ok(json!({
            "assignee_type": assignee.kind.to_string(),
            "assignee_id": assignee.id,
            "notified": notified,
        }))
    }
}

impl std::fmt::Debug for EscalateHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EscalateHandler")
            .field("notifier", &self.notifier.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::JsonEntity;
    use std::sync::Mutex;

    fn entity(value: Value) -> JsonEntity {
        JsonEntity::from_value("expediente", value)
    }

    #[derive(Default)]
    struct Outbox(Mutex<Vec<Notification>>);

    #[async_trait]
    impl Notifier for Outbox {
        async fn send(&self, notification: &Notification) -> EngineResult<()> {
            self.0.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_update_field() {
        let e = entity(json!({"estado": "nuevo"}));
        let out = UpdateFieldHandler
            .handle(&ActionSpec::new("update_field", json!({"field": "estado", "value": "revisado"})), &e)
            .await
            .unwrap();
        assert_eq!(out["changed"], true);
        assert_eq!(e.field("estado"), Some(json!("revisado")));
    }

    #[tokio::test]
    async fn test_update_field_requires_capability() {
        let e = JsonEntity::read_only("doc", Map::new());
        let err = UpdateFieldHandler
            .handle(&ActionSpec::new("update_field", json!({"field": "x", "value": 1})), &e)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingCapability(_)));
    }

    #[tokio::test]
    async fn test_assign_to_user_accepts_numeric_id() {
        let e = entity(json!({}));
        AssignToUserHandler
            .handle(&ActionSpec::new("assign_to_user", json!({"user_id": 42})), &e)
            .await
            .unwrap();
        assert_eq!(e.field("assignee_type"), Some(json!("user")));
        assert_eq!(e.field("assignee_id"), Some(json!("42")));
    }

    #[tokio::test]
    async fn test_assign_to_user_missing_payload() {
        let e = entity(json!({}));
        let err = AssignToUserHandler
            .handle(&ActionSpec::new("assign_to_user", json!({})), &e)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn test_assign_to_role_without_capability() {
        let e = entity(json!({})).without_assignment();
        let err = AssignToRoleHandler
            .handle(&ActionSpec::new("assign_to_role", json!({"role": "legal"})), &e)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingCapability(_)));
    }

    #[tokio::test]
    async fn test_add_tag_is_idempotent() {
        let e = entity(json!({"tags": ["urgente"]}));
        let spec = ActionSpec::new("add_tag", json!({"tag": "vip"}));

        let first = AddTagHandler.handle(&spec, &e).await.unwrap();
        assert_eq!(first["added"], true);
        let second = AddTagHandler.handle(&spec, &e).await.unwrap();
        assert_eq!(second["added"], false);
        assert_eq!(e.field("tags"), Some(json!(["urgente", "vip"])));
    }

    #[tokio::test]
    async fn test_set_priority() {
        let e = entity(json!({"priority": "normal"}));
        SetPriorityHandler
            .handle(&ActionSpec::new("set_priority", json!({"priority": "alta"})), &e)
            .await
            .unwrap();
        assert_eq!(e.field("priority"), Some(json!("alta")));

        let err = SetPriorityHandler
            .handle(&ActionSpec::new("set_priority", json!({})), &e)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn test_escalate_assigns_flags_and_notifies() {
        let outbox = Arc::new(Outbox::default());
        let handler = EscalateHandler::new(Some(outbox.clone()));
        let e = entity(json!({}));

        let out = handler
            .handle(
                &ActionSpec::new(
                    "escalate",
                    json!({"role": "supervisor", "reason": "vencido", "notify": "jefe@example.org"}),
                ),
                &e,
            )
            .await
            .unwrap();

        assert_eq!(out["notified"], true);
        assert_eq!(e.field("assignee_type"), Some(json!("role")));
        assert_eq!(e.field("assignee_id"), Some(json!("supervisor")));
        assert_eq!(e.field("escalated"), Some(json!(true)));
        assert_eq!(e.field("escalation_reason"), Some(json!("vencido")));

        let sent = outbox.0.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, "jefe@example.org");
        assert!(sent[0].message.contains("vencido"));
    }

    #[tokio::test]
    async fn test_escalate_needs_single_target() {
        let e = entity(json!({}));
        for payload in [json!({}), json!({"role": "a", "user_id": "b"})] {
            let err = EscalateHandler::default()
                .handle(&ActionSpec::new("escalate", payload), &e)
                .await
                .unwrap_err();
            assert!(matches!(err, EngineError::InvalidPayload(_)));
        }
    }
}
