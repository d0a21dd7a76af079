//! Child workflow launch, join and result merge.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};

use super::coordinator::WorkflowCoordinator;
use super::types::{InstanceState, NewInstance, WorkflowInstance};

/// Extra attributes for a child launch.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    /// Merged over the parent's data to form the child's initial data.
    pub context: Map<String, Value>,
    /// Defaults to the parent's entity type.
    pub entity_type: Option<String>,
    /// Defaults to the parent's entity id.
    pub entity_id: Option<String>,
    /// Defaults to the parent's initiator.
    pub initiated_by: Option<String>,
}

impl LaunchOptions {
    pub fn with_context(context: Map<String, Value>) -> Self {
        Self {
            context,
            ..Default::default()
        }
    }
}

/// Launches child instances and joins on their completion.
#[derive(Debug, Clone)]
pub struct SubWorkflowOrchestrator {
    coordinator: Arc<WorkflowCoordinator>,
    wait_timeout: Option<Duration>,
}

impl SubWorkflowOrchestrator {
    pub fn new(coordinator: Arc<WorkflowCoordinator>, config: &EngineConfig) -> Self {
        Self {
            coordinator,
            wait_timeout: config.sub_workflow_wait_timeout(),
        }
    }

    /// Launch `workflow_id` as a child of `parent_id`.
    pub async fn launch(
        &self,
        parent_id: Uuid,
        workflow_id: &str,
        context: Map<String, Value>,
    ) -> EngineResult<WorkflowInstance> {
        self.launch_with(parent_id, workflow_id, LaunchOptions::with_context(context))
            .await
    }

    /// Launch with explicit options.
    ///
    /// The child is created pending. A pending parent moves to
    /// in_progress in the same store operation; if that fails neither
    /// record changes.
    pub async fn launch_with(
        &self,
        parent_id: Uuid,
        workflow_id: &str,
        options: LaunchOptions,
    ) -> EngineResult<WorkflowInstance> {
        if !self.coordinator.knows_workflow(workflow_id) {
            return Err(EngineError::NotFound(format!("workflow '{}'", workflow_id)));
        }

        let parent = self.coordinator.find_instance(parent_id).await?;
        if parent.state.is_terminal() {
            return Err(EngineError::InvalidTransition(format!(
                "instance {} is {} and cannot launch children",
                parent_id, parent.state
            )));
        }

        let new = NewInstance {
            workflow_id: workflow_id.to_string(),
            parent_instance_id: Some(parent_id),
            data: merge_context(&parent.data, &options.context),
            entity_type: options.entity_type.or_else(|| parent.entity_type.clone()),
            entity_id: options.entity_id.or_else(|| parent.entity_id.clone()),
            initiated_by: options.initiated_by.or_else(|| parent.initiated_by.clone()),
        };
        // The store re-checks the parent state it was read in, so a cancel
        // landing after the read makes the launch fail.
        let next = match parent.state {
            InstanceState::Pending => InstanceState::InProgress,
            state => state,
        };
        let parent_transition = Some((parent.state, next));

        let child = match self
            .coordinator
            .instance_store()
            .create_child(WorkflowInstance::from_new(new), parent_transition)
            .await
        {
            Ok(child) => child,
            Err(EngineError::Conflict(_)) => {
                let latest = self.coordinator.find_instance(parent_id).await?;
                return Err(EngineError::InvalidTransition(format!(
                    "instance {} changed to {} during launch",
                    parent_id, latest.state
                )));
            }
            Err(e) => return Err(e),
        };

        info!(
            parent_id = %parent_id,
            child_id = %child.id,
            workflow_id = %workflow_id,
            "Sub-workflow launched"
        );
        self.coordinator.publish(&child);
        if next != parent.state {
            let parent = self.coordinator.find_instance(parent_id).await?;
            self.coordinator.publish(&parent);
        }
        Ok(child)
    }

    pub async fn children(&self, parent_id: Uuid) -> EngineResult<Vec<WorkflowInstance>> {
        self.coordinator.children(parent_id).await
    }

    pub async fn all_completed(&self, parent_id: Uuid) -> EngineResult<bool> {
        self.coordinator.are_all_sub_workflows_completed(parent_id).await
    }

    /// Wait until no child of `parent_id` is active and return the children.
    ///
    /// Fails with `Cancelled` if the parent is cancelled while waiting and
    /// with `Timeout` when the configured deadline passes.
    pub async fn wait_for_completion(&self, parent_id: Uuid) -> EngineResult<Vec<WorkflowInstance>> {
        match self.wait_timeout {
            Some(limit) => tokio::time::timeout(limit, self.wait_inner(parent_id))
                .await
                .map_err(|_| EngineError::Timeout(limit.as_secs()))?,
            None => self.wait_inner(parent_id).await,
        }
    }

    async fn wait_inner(&self, parent_id: Uuid) -> EngineResult<Vec<WorkflowInstance>> {
        // Subscribe before the first check so no completion slips between them.
        let mut events = self.coordinator.subscribe();

        loop {
            let parent = self.coordinator.find_instance(parent_id).await?;
            if parent.state == InstanceState::Cancelled {
                return Err(EngineError::Cancelled(format!(
                    "instance {} was cancelled",
                    parent_id
                )));
            }

            let children = self.coordinator.children(parent_id).await?;
            if children.iter().all(|child| child.state.is_terminal()) {
                return Ok(children);
            }

            loop {
                match events.recv().await {
                    Ok(event)
                        if event.instance_id == parent_id
                            || event.parent_instance_id == Some(parent_id) =>
                    {
                        break
                    }
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(parent_id = %parent_id, skipped, "Event stream lagged, rechecking");
                        break;
                    }
                    Err(RecvError::Closed) => {
                        return Err(EngineError::Cancelled(
                            "instance event stream closed".to_string(),
                        ))
                    }
                }
            }
        }
    }

    /// Merge a completed child's data into its parent.
    ///
    /// With `key`, the child data is nested under that key; otherwise its
    /// entries overwrite the parent's at the top level.
    pub async fn merge_child_results(
        &self,
        parent_id: Uuid,
        child_id: Uuid,
        key: Option<&str>,
    ) -> EngineResult<WorkflowInstance> {
        let child = self.coordinator.find_instance(child_id).await?;
        if child.parent_instance_id != Some(parent_id) {
            return Err(EngineError::Validation(format!(
                "instance {} is not a child of {}",
                child_id, parent_id
            )));
        }
        if child.state != InstanceState::Completed {
            return Err(EngineError::InvalidTransition(format!(
                "child {} is {}, results are merged only after completion",
                child_id, child.state
            )));
        }

        let patch = match key {
            Some(key) => {
                let mut nested = Map::new();
                nested.insert(key.to_string(), Value::Object(child.data));
                nested
            }
            None => child.data,
        };
        self.coordinator.update_instance_data(parent_id, patch).await
    }
}

/// Child context: the parent's data with `extra` entries taking precedence.
pub fn merge_context(parent: &Map<String, Value>, extra: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = parent.clone();
    for (key, value) in extra {
        merged.insert(key.clone(), value.clone());
    }
    merged
}
