//! Action handler registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entity::Entity;
use crate::error::{EngineError, EngineResult};

/// An action declared on a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    /// Handler name (e.g., "update_field", "send_notification").
    #[serde(rename = "type")]
    pub action_type: String,

    /// Optional guard expression evaluated against the entity context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,

    /// Handler-specific payload.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl ActionSpec {
    pub fn new(action_type: impl Into<String>, payload: Value) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            action_type: action_type.into(),
            when: None,
            payload,
        }
    }

    pub fn when(mut self, expression: impl Into<String>) -> Self {
        self.when = Some(expression.into());
        self
    }

    /// Decode the payload into a handler's parameter struct.
    pub fn decode<T: DeserializeOwned>(&self) -> EngineResult<T> {
        serde_json::from_value(Value::Object(self.payload.clone()))
            .map_err(|e| EngineError::InvalidPayload(format!("{}: {}", self.action_type, e)))
    }
}

/// A handler for one action type.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// The action type this handler serves.
    fn name(&self) -> &'static str;

    /// Execute the action against `entity`.
    async fn handle(&self, action: &ActionSpec, entity: &dyn Entity) -> EngineResult<Value>;
}

/// Registry of available action handlers.
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler, replacing any previous one of the same name.
    pub fn register<H: ActionHandler + 'static>(&mut self, handler: H) {
        let name = handler.name().to_string();
        self.handlers.insert(name, Arc::new(handler));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered action types, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Route `action` to its handler.
    ///
    /// Fails with `UnsupportedAction` when no handler is registered.
    pub async fn dispatch(&self, action: &ActionSpec, entity: &dyn Entity) -> EngineResult<Value> {
        let handler = self
            .get(&action.action_type)
            .ok_or_else(|| EngineError::UnsupportedAction(action.action_type.clone()))?;
        handler.handle(action, entity).await
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("handlers", &self.list())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::JsonEntity;
    use serde_json::json;

    struct EchoHandler;

    #[async_trait]
    impl ActionHandler for EchoHandler {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn handle(&self, action: &ActionSpec, _entity: &dyn Entity) -> EngineResult<Value> {
            Ok(Value::Object(action.payload.clone()))
        }
    }

    #[test]
    fn test_registry_register() {
        let mut registry = ActionRegistry::new();
        assert!(registry.list().is_empty());
        registry.register(EchoHandler);

        assert!(registry.has("echo"));
        assert!(!registry.has("unknown"));
        assert_eq!(registry.list(), vec!["echo"]);
    }

    #[tokio::test]
    async fn test_dispatch() {
        let mut registry = ActionRegistry::new();
        registry.register(EchoHandler);
        let entity = JsonEntity::from_value("e", json!({}));

        let out = registry
            .dispatch(&ActionSpec::new("echo", json!({"a": 1})), &entity)
            .await
            .unwrap();
        assert_eq!(out, json!({"a": 1}));

        let err = registry
            .dispatch(&ActionSpec::new("frobnicate", json!({})), &entity)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedAction(ref t) if t == "frobnicate"));
    }

    #[test]
    fn test_action_spec_flattened_payload() {
        let yaml = "type: update_field\nwhen: \"monto > 10\"\nfield: estado\nvalue: revisado\n";
        let spec: ActionSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.action_type, "update_field");
        assert_eq!(spec.when.as_deref(), Some("monto > 10"));
        assert_eq!(spec.payload.get("field"), Some(&json!("estado")));
        assert!(!spec.payload.contains_key("type"));
    }

    #[test]
    fn test_decode_reports_action_type() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Params {
            user_id: String,
        }

        let err = ActionSpec::new("assign_to_user", json!({}))
            .decode::<Params>()
            .unwrap_err();
        match err {
            EngineError::InvalidPayload(msg) => assert!(msg.starts_with("assign_to_user")),
            other => panic!("unexpected error {:?}", other),
        }
    }
}
