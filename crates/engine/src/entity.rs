//! Entity capabilities.
//!
//! Rules evaluate against anything implementing [`Entity`]. Mutating
//! actions look up optional capabilities ([`Updatable`], [`Assignable`])
//! through the entity itself rather than inspecting concrete types.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::EngineResult;
use crate::workflow::types::Assignee;

/// A domain object rules can read.
pub trait Entity: Send + Sync {
    /// Top-level field lookup. Nested paths are handled by the field resolver.
    fn field(&self, name: &str) -> Option<Value>;

    /// Variables exposed to conditional action expressions.
    fn context(&self) -> HashMap<String, Value> {
        HashMap::new()
    }

    /// Short label used in log output.
    fn label(&self) -> String {
        "entity".to_string()
    }

    fn as_updatable(&self) -> Option<&dyn Updatable> {
        None
    }

    fn as_assignable(&self) -> Option<&dyn Assignable> {
        None
    }
}

/// Capability: persist field changes on the entity.
#[async_trait]
pub trait Updatable: Send + Sync {
    /// Apply `fields`; returns whether anything was written.
    async fn update(&self, fields: Map<String, Value>) -> EngineResult<bool>;
}

/// Capability: the entity can carry an assignee.
#[async_trait]
pub trait Assignable: Send + Sync {
    async fn assign(&self, assignee: &Assignee) -> EngineResult<()>;
}

/// Entity backed by a JSON object held in memory.
///
/// Capabilities are opt-out so tests and the CLI can model read-only or
/// non-assignable entities.
#[derive(Debug)]
pub struct JsonEntity {
    label: String,
    fields: RwLock<Map<String, Value>>,
    updatable: bool,
    assignable: bool,
}

impl JsonEntity {
    /// Create an entity with every capability enabled.
    pub fn new(label: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            label: label.into(),
            fields: RwLock::new(fields),
            updatable: true,
            assignable: true,
        }
    }

    /// Create an entity from a JSON value; non-objects yield an empty field set.
    pub fn from_value(label: impl Into<String>, value: Value) -> Self {
        let fields = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(label, fields)
    }

    /// Entity without update or assignment capabilities.
    pub fn read_only(label: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            updatable: false,
            assignable: false,
            ..Self::new(label, fields)
        }
    }

    /// Disable the assignment capability.
    pub fn without_assignment(mut self) -> Self {
        self.assignable = false;
        self
    }

    /// Copy of the current field set.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.fields
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn write_fields(&self, fields: Map<String, Value>) -> bool {
        let mut guard = self
            .fields
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut changed = false;
        for (key, value) in fields {
            if guard.get(&key) != Some(&value) {
                guard.insert(key, value);
                changed = true;
            }
        }
        changed
    }
}

impl Entity for JsonEntity {
    fn field(&self, name: &str) -> Option<Value> {
        self.fields
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    fn context(&self) -> HashMap<String, Value> {
        self.snapshot().into_iter().collect()
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    fn as_updatable(&self) -> Option<&dyn Updatable> {
        if self.updatable {
            Some(self)
        } else {
            None
        }
    }

    fn as_assignable(&self) -> Option<&dyn Assignable> {
        if self.assignable {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl Updatable for JsonEntity {
    async fn update(&self, fields: Map<String, Value>) -> EngineResult<bool> {
        Ok(self.write_fields(fields))
    }
}

#[async_trait]
impl Assignable for JsonEntity {
    async fn assign(&self, assignee: &Assignee) -> EngineResult<()> {
        let mut fields = Map::new();
        fields.insert(
            "assignee_type".to_string(),
            Value::String(assignee.kind.to_string()),
        );
        fields.insert("assignee_id".to_string(), Value::String(assignee.id.clone()));
        self.write_fields(fields);
        Ok(())
    }
}
