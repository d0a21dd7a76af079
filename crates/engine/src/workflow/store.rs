//! Persistence seams used by the coordinator.
//!
//! The engine never talks to a database directly. Hosts provide these
//! traits; [`super::memory::MemoryStore`] is the reference implementation.

use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::EngineResult;

use super::types::{InstanceState, Task, TaskState, WorkflowInstance};

/// Exclusive hold on a parallel group. Released on drop.
pub struct GroupLock {
    key: String,
    _guard: Box<dyn Send>,
}

impl GroupLock {
    pub fn new(key: impl Into<String>, guard: impl Send + 'static) -> Self {
        Self {
            key: key.into(),
            _guard: Box::new(guard),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Debug for GroupLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupLock").field("key", &self.key).finish()
    }
}

/// Task persistence.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, task: Task) -> EngineResult<Task>;

    async fn find_task(&self, id: Uuid) -> EngineResult<Option<Task>>;

    /// Compare-and-set the task state.
    ///
    /// Fails with `Conflict` when the stored state is not `expected`.
    /// Implementations stamp `completed_at` when moving to completed.
    async fn update_task_state(
        &self,
        id: Uuid,
        expected: TaskState,
        next: TaskState,
        reason: Option<String>,
    ) -> EngineResult<Task>;

    /// Members of a parallel group, in creation order.
    async fn list_by_group(&self, group: &str) -> EngineResult<Vec<Task>>;

    async fn list_by_instance(&self, instance_id: Uuid) -> EngineResult<Vec<Task>>;

    /// Acquire the group's lock, waiting if another holder has it.
    async fn lock_group(&self, group: &str) -> EngineResult<GroupLock>;
}

/// Workflow instance persistence.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn create_instance(&self, instance: WorkflowInstance) -> EngineResult<WorkflowInstance>;

    async fn find_instance(&self, id: Uuid) -> EngineResult<Option<WorkflowInstance>>;

    /// Compare-and-set the instance state. Fails with `Conflict` on mismatch.
    async fn update_instance_state(
        &self,
        id: Uuid,
        expected: InstanceState,
        next: InstanceState,
    ) -> EngineResult<WorkflowInstance>;

    /// Shallow-merge `patch` into the instance data.
    async fn update_instance_data(
        &self,
        id: Uuid,
        patch: Map<String, Value>,
    ) -> EngineResult<WorkflowInstance>;

    async fn list_children(&self, parent_id: Uuid) -> EngineResult<Vec<WorkflowInstance>>;

    /// Insert `child` and, when given, move its parent from the first
    /// state to the second. Either both happen or neither does.
    async fn create_child(
        &self,
        child: WorkflowInstance,
        parent_transition: Option<(InstanceState, InstanceState)>,
    ) -> EngineResult<WorkflowInstance>;
}

/// Known workflow definitions.
pub trait WorkflowCatalog: Send + Sync {
    fn contains(&self, workflow_id: &str) -> bool;
}

/// Catalog backed by a fixed set of ids, or accepting every id.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    ids: HashSet<String>,
    open: bool,
}

impl StaticCatalog {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
            open: false,
        }
    }

    /// Catalog that accepts any workflow id.
    pub fn open() -> Self {
        Self {
            ids: HashSet::new(),
            open: true,
        }
    }

    pub fn insert(&mut self, workflow_id: impl Into<String>) {
        self.ids.insert(workflow_id.into());
    }
}

impl WorkflowCatalog for StaticCatalog {
    fn contains(&self, workflow_id: &str) -> bool {
        self.open || self.ids.contains(workflow_id)
    }
}

/// Starts workflows on behalf of the `trigger_workflow` action.
#[async_trait]
pub trait WorkflowTrigger: Send + Sync {
    /// Start `workflow_id` with `context` as its initial data; returns the instance id.
    async fn trigger(&self, workflow_id: &str, context: Map<String, Value>) -> EngineResult<Uuid>;
}
