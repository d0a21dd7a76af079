//! In-memory store, used by the CLI and tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

use super::store::{GroupLock, InstanceStore, TaskStore};
use super::types::{InstanceState, Task, TaskState, WorkflowInstance};

/// Tasks and instances kept in insertion order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tasks: RwLock<Vec<Task>>,
    instances: RwLock<Vec<WorkflowInstance>>,
    group_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn group_mutex(&self, group: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .group_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // An entry only this map references is neither held nor awaited.
        locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        locks
            .entry(group.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    #[cfg(test)]
    fn tracked_groups(&self) -> usize {
        self.group_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn create_task(&self, task: Task) -> EngineResult<Task> {
        let mut tasks = self.tasks.write().await;
        if tasks.iter().any(|t| t.id == task.id) {
            return Err(EngineError::Conflict(format!("task {} already exists", task.id)));
        }
        tasks.push(task.clone());
        Ok(task)
    }

    async fn find_task(&self, id: Uuid) -> EngineResult<Option<Task>> {
        Ok(self.tasks.read().await.iter().find(|t| t.id == id).cloned())
    }

    async fn update_task_state(
        &self,
        id: Uuid,
        expected: TaskState,
        next: TaskState,
        reason: Option<String>,
    ) -> EngineResult<Task> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| EngineError::NotFound(format!("task {}", id)))?;

        if task.state != expected {
            return Err(EngineError::Conflict(format!(
                "task {} is {}, expected {}",
                id, task.state, expected
            )));
        }

        task.state = next;
        match next {
            TaskState::Completed => task.completed_at = Some(Utc::now()),
            TaskState::Cancelled => task.cancelled_reason = reason,
            TaskState::Pending => {}
        }
        Ok(task.clone())
    }

    async fn list_by_group(&self, group: &str) -> EngineResult<Vec<Task>> {
        Ok(self
            .tasks
            .read()
            .await
            .iter()
            .filter(|t| t.parallel_group.as_deref() == Some(group))
            .cloned()
            .collect())
    }

    async fn list_by_instance(&self, instance_id: Uuid) -> EngineResult<Vec<Task>> {
        Ok(self
            .tasks
            .read()
            .await
            .iter()
            .filter(|t| t.workflow_instance_id == instance_id)
            .cloned()
            .collect())
    }

    async fn lock_group(&self, group: &str) -> EngineResult<GroupLock> {
        let guard = self.group_mutex(group).lock_owned().await;
        Ok(GroupLock::new(group, guard))
    }
}

#[async_trait]
impl InstanceStore for MemoryStore {
    async fn create_instance(&self, instance: WorkflowInstance) -> EngineResult<WorkflowInstance> {
        let mut instances = self.instances.write().await;
        if instances.iter().any(|i| i.id == instance.id) {
            return Err(EngineError::Conflict(format!(
                "instance {} already exists",
                instance.id
            )));
        }
        instances.push(instance.clone());
        Ok(instance)
    }

    async fn find_instance(&self, id: Uuid) -> EngineResult<Option<WorkflowInstance>> {
        Ok(self.instances.read().await.iter().find(|i| i.id == id).cloned())
    }

    async fn update_instance_state(
        &self,
        id: Uuid,
        expected: InstanceState,
        next: InstanceState,
    ) -> EngineResult<WorkflowInstance> {
        let mut instances = self.instances.write().await;
        let instance = instances
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| EngineError::NotFound(format!("instance {}", id)))?;

        if instance.state != expected {
            return Err(EngineError::Conflict(format!(
                "instance {} is {}, expected {}",
                id, instance.state, expected
            )));
        }
        instance.state = next;
        instance.updated_at = Utc::now();
        Ok(instance.clone())
    }

    async fn update_instance_data(
        &self,
        id: Uuid,
        patch: Map<String, Value>,
    ) -> EngineResult<WorkflowInstance> {
        let mut instances = self.instances.write().await;
        let instance = instances
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| EngineError::NotFound(format!("instance {}", id)))?;

        instance.data.extend(patch);
        instance.updated_at = Utc::now();
        Ok(instance.clone())
    }

    async fn list_children(&self, parent_id: Uuid) -> EngineResult<Vec<WorkflowInstance>> {
        Ok(self
            .instances
            .read()
            .await
            .iter()
            .filter(|i| i.parent_instance_id == Some(parent_id))
            .cloned()
            .collect())
    }

    async fn create_child(
        &self,
        child: WorkflowInstance,
        parent_transition: Option<(InstanceState, InstanceState)>,
    ) -> EngineResult<WorkflowInstance> {
        let mut instances = self.instances.write().await;

        if instances.iter().any(|i| i.id == child.id) {
            return Err(EngineError::Conflict(format!("instance {} already exists", child.id)));
        }
        let parent_id = child
            .parent_instance_id
            .ok_or_else(|| EngineError::Validation("child instance has no parent".to_string()))?;
        let parent_index = instances
            .iter()
            .position(|i| i.id == parent_id)
            .ok_or_else(|| EngineError::NotFound(format!("instance {}", parent_id)))?;

        // All checks happen before any write so a failure leaves both records untouched.
        let current = instances[parent_index].state;
        if current.is_terminal() {
            return Err(EngineError::Conflict(format!(
                "instance {} is {} and accepts no children",
                parent_id, current
            )));
        }
        if let Some((expected, _)) = parent_transition {
            if current != expected {
                return Err(EngineError::Conflict(format!(
                    "instance {} is {}, expected {}",
                    parent_id, current, expected
                )));
            }
        }

        if let Some((_, next)) = parent_transition {
            if next != current {
                let parent = &mut instances[parent_index];
                parent.state = next;
                parent.updated_at = Utc::now();
            }
        }
        instances.push(child.clone());
        Ok(child)
    }
}
