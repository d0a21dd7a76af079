//! Handlers that reach into workflow coordination.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::info;
use uuid::Uuid;

use crate::actions::registry::{ActionHandler, ActionSpec};
use crate::entity::Entity;
use crate::error::{EngineError, EngineResult};
use crate::workflow::coordinator::WorkflowCoordinator;
use crate::workflow::store::WorkflowTrigger;
use crate::workflow::types::{Assignee, NewTask};

/// Entity field consulted when the payload names no instance.
pub const INSTANCE_FIELD: &str = "workflow_instance_id";

#[derive(Debug, Deserialize)]
struct CreateTaskParams {
    name: String,
    #[serde(default)]
    assignee: Option<Assignee>,
    #[serde(default)]
    parallel_group: Option<String>,
    #[serde(default)]
    is_race: bool,
    #[serde(default)]
    workflow_instance_id: Option<Uuid>,
}

/// `create_task {name, assignee?, parallel_group?, is_race?, workflow_instance_id?}`
#[derive(Debug, Clone)]
pub struct CreateTaskHandler {
    coordinator: Arc<WorkflowCoordinator>,
}

impl CreateTaskHandler {
    pub fn new(coordinator: Arc<WorkflowCoordinator>) -> Self {
        Self { coordinator }
    }
}

fn instance_from_entity(entity: &dyn Entity) -> EngineResult<Uuid> {
    let raw = entity.field(INSTANCE_FIELD).ok_or_else(|| {
        EngineError::InvalidPayload(format!(
            "create_task needs 'workflow_instance_id' in the payload or on {}",
            entity.label()
        ))
    })?;
    raw.as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| {
            EngineError::InvalidPayload(format!("'{}' is not a valid instance id", raw))
        })
}

#[async_trait]
impl ActionHandler for CreateTaskHandler {
    fn name(&self) -> &'static str {
        "create_task"
    }

    async fn handle(&self, action: &ActionSpec, entity: &dyn Entity) -> EngineResult<Value> {
        let params: CreateTaskParams = action.decode()?;
        let instance_id = match params.workflow_instance_id {
            Some(id) => id,
            None => instance_from_entity(entity)?,
        };

        let task = self
            .coordinator
            .create_task(NewTask {
                workflow_instance_id: instance_id,
                name: params.name,
                assignee: params.assignee,
                parallel_group: params.parallel_group,
                is_race: params.is_race,
            })
            .await?;

        Ok(serde_json::to_value(task)?)
    }
}

#[derive(Debug, Deserialize)]
struct TriggerWorkflowParams {
    workflow_id: String,
    #[serde(default)]
    context: Map<String, Value>,
}

/// `trigger_workflow {workflow_id, context?}`
#[derive(Clone)]
pub struct TriggerWorkflowHandler {
    trigger: Arc<dyn WorkflowTrigger>,
}

impl TriggerWorkflowHandler {
    pub fn new(trigger: Arc<dyn WorkflowTrigger>) -> Self {
        Self { trigger }
    }
}

#[async_trait]
impl ActionHandler for TriggerWorkflowHandler {
    fn name(&self) -> &'static str {
        "trigger_workflow"
    }

    async fn handle(&self, action: &ActionSpec, entity: &dyn Entity) -> EngineResult<Value> {
        let params: TriggerWorkflowParams = action.decode()?;
        let instance_id = self
            .trigger
            .trigger(&params.workflow_id, params.context)
            .await?;

        info!(
            entity = %entity.label(),
            workflow_id = %params.workflow_id,
            instance_id = %instance_id,
            "Workflow triggered"
        );
        Ok(json!({"workflow_id": params.workflow_id, "instance_id": instance_id}))
    }
}

impl std::fmt::Debug for TriggerWorkflowHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerWorkflowHandler").finish()
    }
}
