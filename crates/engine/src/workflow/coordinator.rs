//! Task and instance coordination.
//!
//! All state changes to grouped tasks happen while holding the group's
//! lock, so a race group can never end up with two completed members and
//! an AND group's status is never observed half-updated.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};

use super::branch::{self, ConditionalBranch};
use super::memory::MemoryStore;
use super::store::{
    GroupLock, InstanceStore, StaticCatalog, TaskStore, WorkflowCatalog, WorkflowTrigger,
};
use super::types::{
    GroupStatus, InstanceEvent, InstanceState, NewInstance, NewTask, Task, TaskSpec, TaskState,
    WorkflowInstance,
};

/// Result of completing a task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskCompletion {
    pub task: Task,
    /// Group view after the completion, for grouped tasks.
    pub group: Option<GroupStatus>,
    /// Race siblings cancelled by this completion.
    pub cancelled: Vec<Task>,
}

/// Coordinates tasks, parallel groups and instance lifecycles.
pub struct WorkflowCoordinator {
    tasks: Arc<dyn TaskStore>,
    instances: Arc<dyn InstanceStore>,
    catalog: Arc<dyn WorkflowCatalog>,
    events: broadcast::Sender<InstanceEvent>,
    lock_timeout: Duration,
    race_cancel_reason: String,
}

impl WorkflowCoordinator {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        instances: Arc<dyn InstanceStore>,
        config: &EngineConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            tasks,
            instances,
            catalog: Arc::new(StaticCatalog::open()),
            events,
            lock_timeout: config.group_lock_timeout(),
            race_cancel_reason: config.race_cancel_reason.clone(),
        }
    }

    /// Coordinator over a fresh [`MemoryStore`].
    pub fn in_memory(config: &EngineConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::new(store.clone(), store, config)
    }

    /// Restrict instance creation to workflows known to `catalog`.
    pub fn with_catalog(mut self, catalog: Arc<dyn WorkflowCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    /// Subscribe to instance state changes.
    pub fn subscribe(&self) -> broadcast::Receiver<InstanceEvent> {
        self.events.subscribe()
    }

    pub(crate) fn instance_store(&self) -> &Arc<dyn InstanceStore> {
        &self.instances
    }

    pub(crate) fn knows_workflow(&self, workflow_id: &str) -> bool {
        self.catalog.contains(workflow_id)
    }

    pub(crate) fn publish(&self, instance: &WorkflowInstance) {
        // No subscribers is not an error.
        if self.events.send(InstanceEvent::from(instance)).is_err() {
            debug!(instance_id = %instance.id, "No event subscribers");
        }
    }

    // ---- instances ----

    /// Create a top-level instance in the pending state.
    pub async fn start_instance(&self, new: NewInstance) -> EngineResult<WorkflowInstance> {
        if new.parent_instance_id.is_some() {
            return Err(EngineError::Validation(
                "child instances must be launched through the sub-workflow orchestrator"
                    .to_string(),
            ));
        }
        if !self.knows_workflow(&new.workflow_id) {
            return Err(EngineError::NotFound(format!("workflow '{}'", new.workflow_id)));
        }

        let instance = self
            .instances
            .create_instance(WorkflowInstance::from_new(new))
            .await?;
        info!(
            instance_id = %instance.id,
            workflow_id = %instance.workflow_id,
            "Workflow instance created"
        );
        self.publish(&instance);
        Ok(instance)
    }

    pub async fn find_instance(&self, id: Uuid) -> EngineResult<WorkflowInstance> {
        self.instances
            .find_instance(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("instance {}", id)))
    }

    /// pending -> in_progress
    pub async fn begin_instance(&self, id: Uuid) -> EngineResult<WorkflowInstance> {
        self.transition_instance(id, InstanceState::InProgress).await
    }

    pub async fn complete_instance(&self, id: Uuid) -> EngineResult<WorkflowInstance> {
        self.transition_instance(id, InstanceState::Completed).await
    }

    /// Cancel the instance and every task of it still pending.
    ///
    /// Completions of ungrouped tasks wait for the sweep to finish; grouped
    /// completions re-check the instance under their group lock.
    pub async fn cancel_instance(
        &self,
        id: Uuid,
        reason: impl Into<String>,
    ) -> EngineResult<WorkflowInstance> {
        let reason = reason.into();
        let _lock = self.acquire(&instance_lock_key(id)).await?;
        let instance = self.transition_instance(id, InstanceState::Cancelled).await?;

        for task in self.tasks.list_by_instance(id).await? {
            if task.state != TaskState::Pending {
                continue;
            }
            match self.cancel_task(task.id, reason.clone()).await {
                Ok(_) => {}
                // Finished or cancelled concurrently.
                Err(EngineError::InvalidTransition(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(instance)
    }

    /// Shallow-merge `patch` into a non-terminal instance's data.
    pub async fn update_instance_data(
        &self,
        id: Uuid,
        patch: Map<String, Value>,
    ) -> EngineResult<WorkflowInstance> {
        let instance = self.find_instance(id).await?;
        if instance.state.is_terminal() {
            return Err(EngineError::InvalidTransition(format!(
                "instance {} is {} and its data is frozen",
                id, instance.state
            )));
        }
        self.instances.update_instance_data(id, patch).await
    }

    pub async fn children(&self, parent_id: Uuid) -> EngineResult<Vec<WorkflowInstance>> {
        self.instances.list_children(parent_id).await
    }

    /// True when no child of `parent_id` is pending or in progress.
    pub async fn are_all_sub_workflows_completed(&self, parent_id: Uuid) -> EngineResult<bool> {
        let children = self.instances.list_children(parent_id).await?;
        Ok(children.iter().all(|child| child.state.is_terminal()))
    }

    /// Pick the branch to follow from the instance's current data.
    pub async fn select_branch(
        &self,
        instance_id: Uuid,
        branches: &[ConditionalBranch],
    ) -> EngineResult<Option<ConditionalBranch>> {
        let instance = self.find_instance(instance_id).await?;
        let selected = branch::select_branch(branches, &instance.context()).cloned();
        debug!(
            instance_id = %instance_id,
            branch = selected.as_ref().map(|b| b.name.as_str()),
            "Branch selected"
        );
        Ok(selected)
    }

    async fn transition_instance(
        &self,
        id: Uuid,
        next: InstanceState,
    ) -> EngineResult<WorkflowInstance> {
        let current = self.find_instance(id).await?;
        if !current.state.can_transition_to(next) {
            return Err(EngineError::InvalidTransition(format!(
                "instance {} is {} and cannot become {}",
                id, current.state, next
            )));
        }

        let updated = match self
            .instances
            .update_instance_state(id, current.state, next)
            .await
        {
            Ok(instance) => instance,
            Err(EngineError::Conflict(_)) => {
                let latest = self.find_instance(id).await?;
                return Err(EngineError::InvalidTransition(format!(
                    "instance {} is {} and cannot become {}",
                    id, latest.state, next
                )));
            }
            Err(e) => return Err(e),
        };

        info!(instance_id = %id, from = %current.state, to = %next, "Instance state changed");
        self.publish(&updated);
        Ok(updated)
    }

    // ---- tasks ----

    /// Create a pending task, joining its group if one is named.
    pub async fn create_task(&self, new: NewTask) -> EngineResult<Task> {
        self.require_open_instance(new.workflow_instance_id, "accepts no new tasks")
            .await?;

        let Some(key) = new.parallel_group.clone() else {
            if new.is_race {
                return Err(EngineError::Validation(
                    "race tasks require a parallel_group".to_string(),
                ));
            }
            let task = self.tasks.create_task(Task::from_new(new)).await?;
            info!(task_id = %task.id, name = %task.name, "Task created");
            return Ok(task);
        };

        let _lock = self.acquire(&key).await?;
        let members = self.tasks.list_by_group(&key).await?;
        check_joinable(&key, &members, new.is_race)?;

        let task = self.tasks.create_task(Task::from_new(new)).await?;
        info!(
            task_id = %task.id,
            name = %task.name,
            group = %key,
            is_race = task.is_race,
            "Task joined group"
        );
        Ok(task)
    }

    /// Create every member of a group under one lock acquisition.
    ///
    /// A random key is generated when `key` is `None`.
    pub async fn open_group(
        &self,
        instance_id: Uuid,
        key: Option<String>,
        is_race: bool,
        members: Vec<TaskSpec>,
    ) -> EngineResult<Vec<Task>> {
        if members.is_empty() {
            return Err(EngineError::Validation(
                "a group needs at least one member".to_string(),
            ));
        }
        self.require_open_instance(instance_id, "accepts no new tasks").await?;

        let key = key.unwrap_or_else(|| Uuid::new_v4().to_string());
        let _lock = self.acquire(&key).await?;
        let existing = self.tasks.list_by_group(&key).await?;
        check_joinable(&key, &existing, is_race)?;

        let mut created = Vec::with_capacity(members.len());
        for spec in members {
            let new = NewTask {
                workflow_instance_id: instance_id,
                name: spec.name,
                assignee: spec.assignee,
                parallel_group: Some(key.clone()),
                is_race,
            };
            created.push(self.tasks.create_task(Task::from_new(new)).await?);
        }
        info!(group = %key, is_race, members = created.len(), "Group opened");
        Ok(created)
    }

    pub async fn find_task(&self, id: Uuid) -> EngineResult<Task> {
        self.tasks
            .find_task(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("task {}", id)))
    }

    pub async fn tasks_for_instance(&self, instance_id: Uuid) -> EngineResult<Vec<Task>> {
        self.tasks.list_by_instance(instance_id).await
    }

    /// Complete a pending task.
    ///
    /// In a race group the first completion wins and every pending sibling
    /// is cancelled before the lock is released; later completions fail
    /// with `InvalidTransition`. Tasks of a completed or cancelled instance
    /// cannot be completed.
    pub async fn complete_task(&self, id: Uuid) -> EngineResult<TaskCompletion> {
        let task = self.find_task(id).await?;

        let Some(key) = task.parallel_group.clone() else {
            let _lock = self.acquire(&instance_lock_key(task.workflow_instance_id)).await?;
            self.require_open_instance(task.workflow_instance_id, "accepts no completions")
                .await?;
            let task = self.find_task(id).await?;
            let completed = self.transition_task(&task, TaskState::Completed, None).await?;
            info!(task_id = %id, "Task completed");
            return Ok(TaskCompletion {
                task: completed,
                group: None,
                cancelled: Vec::new(),
            });
        };

        let _lock = self.acquire(&key).await?;
        self.require_open_instance(task.workflow_instance_id, "accepts no completions")
            .await?;
        let task = self.find_task(id).await?;
        let members = self.tasks.list_by_group(&key).await?;

        if task.is_race {
            if let Some(winner) = members
                .iter()
                .find(|m| m.id != id && m.state == TaskState::Completed)
            {
                return Err(EngineError::InvalidTransition(format!(
                    "race group '{}' was already won by task {}",
                    key, winner.id
                )));
            }
        }

        let completed = self.transition_task(&task, TaskState::Completed, None).await?;

        let mut cancelled = Vec::new();
        if task.is_race {
            for sibling in members
                .iter()
                .filter(|m| m.id != id && m.state == TaskState::Pending)
            {
                let loser = self
                    .transition_task(
                        sibling,
                        TaskState::Cancelled,
                        Some(self.race_cancel_reason.clone()),
                    )
                    .await?;
                cancelled.push(loser);
            }
            info!(group = %key, winner = %id, cancelled = cancelled.len(), "Race group resolved");
        }

        let status = GroupStatus::from_members(&key, &self.tasks.list_by_group(&key).await?);
        if !status.is_race && status.is_satisfied() {
            info!(group = %key, members = status.total, "Parallel group satisfied");
        } else {
            debug!(task_id = %id, group = %key, pending = status.pending, "Task completed");
        }

        Ok(TaskCompletion {
            task: completed,
            group: Some(status),
            cancelled,
        })
    }

    /// Cancel a pending task.
    pub async fn cancel_task(&self, id: Uuid, reason: impl Into<String>) -> EngineResult<Task> {
        let reason = reason.into();
        let task = self.find_task(id).await?;

        let cancelled = match task.parallel_group.clone() {
            Some(key) => {
                let _lock = self.acquire(&key).await?;
                let task = self.find_task(id).await?;
                self.transition_task(&task, TaskState::Cancelled, Some(reason.clone()))
                    .await?
            }
            None => {
                self.transition_task(&task, TaskState::Cancelled, Some(reason.clone()))
                    .await?
            }
        };

        info!(task_id = %id, reason = %reason, "Task cancelled");
        Ok(cancelled)
    }

    /// Current view of a group. Fails with `NotFound` for unknown keys.
    pub async fn group_status(&self, key: &str) -> EngineResult<GroupStatus> {
        let _lock = self.acquire(key).await?;
        let members = self.tasks.list_by_group(key).await?;
        if members.is_empty() {
            return Err(EngineError::NotFound(format!("group '{}'", key)));
        }
        Ok(GroupStatus::from_members(key, &members))
    }

    pub async fn is_group_satisfied(&self, key: &str) -> EngineResult<bool> {
        Ok(self.group_status(key).await?.is_satisfied())
    }

    /// The completed member of a race group, if any.
    pub async fn race_winner(&self, key: &str) -> EngineResult<Option<Task>> {
        let _lock = self.acquire(key).await?;
        let members = self.tasks.list_by_group(key).await?;
        if members.is_empty() {
            return Err(EngineError::NotFound(format!("group '{}'", key)));
        }
        if !members.iter().any(|t| t.is_race) {
            return Err(EngineError::Validation(format!(
                "group '{}' is not a race group",
                key
            )));
        }
        Ok(members
            .into_iter()
            .find(|t| t.state == TaskState::Completed))
    }

    async fn require_open_instance(
        &self,
        instance_id: Uuid,
        refusal: &str,
    ) -> EngineResult<WorkflowInstance> {
        let instance = self.find_instance(instance_id).await?;
        if instance.state.is_terminal() {
            return Err(EngineError::InvalidTransition(format!(
                "instance {} is {} and {}",
                instance_id, instance.state, refusal
            )));
        }
        Ok(instance)
    }

    async fn acquire(&self, key: &str) -> EngineResult<GroupLock> {
        match tokio::time::timeout(self.lock_timeout, self.tasks.lock_group(key)).await {
            Ok(lock) => lock,
            Err(_) => {
                warn!(
                    group = %key,
                    timeout_ms = self.lock_timeout.as_millis() as u64,
                    "Timed out waiting for group lock"
                );
                Err(EngineError::LockContention(key.to_string()))
            }
        }
    }

    async fn transition_task(
        &self,
        task: &Task,
        next: TaskState,
        reason: Option<String>,
    ) -> EngineResult<Task> {
        if !task.state.can_transition_to(next) {
            return Err(EngineError::InvalidTransition(format!(
                "task {} is {} and cannot become {}",
                task.id, task.state, next
            )));
        }

        match self
            .tasks
            .update_task_state(task.id, task.state, next, reason)
            .await
        {
            Ok(updated) => Ok(updated),
            Err(EngineError::Conflict(_)) => {
                let latest = self.find_task(task.id).await?;
                Err(EngineError::InvalidTransition(format!(
                    "task {} is {} and cannot become {}",
                    task.id, latest.state, next
                )))
            }
            Err(e) => Err(e),
        }
    }
}

/// Lock key serialising instance cancellation with ungrouped completions.
fn instance_lock_key(id: Uuid) -> String {
    format!("instance/{}", id)
}

fn check_joinable(key: &str, members: &[Task], is_race: bool) -> EngineResult<()> {
    if let Some(first) = members.first() {
        if first.is_race != is_race {
            let kind = if first.is_race { "race" } else { "parallel" };
            return Err(EngineError::Validation(format!(
                "group '{}' is a {} group",
                key, kind
            )));
        }
    }
    if is_race && members.iter().any(|t| t.state == TaskState::Completed) {
        return Err(EngineError::Conflict(format!(
            "race group '{}' already has a winner",
            key
        )));
    }
    Ok(())
}

#[async_trait]
impl WorkflowTrigger for WorkflowCoordinator {
    async fn trigger(&self, workflow_id: &str, context: Map<String, Value>) -> EngineResult<Uuid> {
        let instance = self
            .start_instance(NewInstance::new(workflow_id).with_data(context))
            .await?;
        let instance = self.begin_instance(instance.id).await?;
        Ok(instance.id)
    }
}

impl std::fmt::Debug for WorkflowCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowCoordinator")
            .field("lock_timeout", &self.lock_timeout)
            .field("race_cancel_reason", &self.race_cancel_reason)
            .finish()
    }
}
