//! Workflow records: tasks, instances and derived group views.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Whether a task is assigned to a person or to a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssigneeKind {
    User,
    Role,
}

impl std::fmt::Display for AssigneeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Role => write!(f, "role"),
        }
    }
}

/// Task or entity assignee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignee {
    pub kind: AssigneeKind,
    pub id: String,
}

impl Assignee {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            kind: AssigneeKind::User,
            id: id.into(),
        }
    }

    pub fn role(id: impl Into<String>) -> Self {
        Self {
            kind: AssigneeKind::Role,
            id: id.into(),
        }
    }
}

/// Task lifecycle state. Only `pending` has outgoing transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Completed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn can_transition_to(self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Completed) | (Self::Pending, Self::Cancelled)
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A unit of work inside a workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub workflow_instance_id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<Assignee>,
    pub state: TaskState,
    /// Opaque coordination key shared by members of an AND or race group.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_group: Option<String>,
    #[serde(default)]
    pub is_race: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_reason: Option<String>,
}

impl Task {
    /// Materialise a pending task from a creation request.
    pub fn from_new(new: NewTask) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_instance_id: new.workflow_instance_id,
            name: new.name,
            assignee: new.assignee,
            state: TaskState::Pending,
            parallel_group: new.parallel_group,
            is_race: new.is_race,
            created_at: Utc::now(),
            completed_at: None,
            cancelled_reason: None,
        }
    }
}

/// Task creation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub workflow_instance_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub assignee: Option<Assignee>,
    #[serde(default)]
    pub parallel_group: Option<String>,
    #[serde(default)]
    pub is_race: bool,
}

impl NewTask {
    pub fn new(workflow_instance_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            workflow_instance_id,
            name: name.into(),
            assignee: None,
            parallel_group: None,
            is_race: false,
        }
    }

    pub fn assigned_to(mut self, assignee: Assignee) -> Self {
        self.assignee = Some(assignee);
        self
    }

    /// Place the task in an AND group.
    pub fn in_group(mut self, key: impl Into<String>) -> Self {
        self.parallel_group = Some(key.into());
        self.is_race = false;
        self
    }

    /// Place the task in a race group.
    pub fn in_race(mut self, key: impl Into<String>) -> Self {
        self.parallel_group = Some(key.into());
        self.is_race = true;
        self
    }
}

/// Member description used when opening a group in one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    #[serde(default)]
    pub assignee: Option<Assignee>,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            assignee: None,
        }
    }

    pub fn assigned_to(mut self, assignee: Assignee) -> Self {
        self.assignee = Some(assignee);
        self
    }
}

/// Derived view over all tasks sharing a `parallel_group` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStatus {
    pub key: String,
    pub is_race: bool,
    pub total: usize,
    pub pending: usize,
    pub completed: usize,
    pub cancelled: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<Uuid>,
}

impl GroupStatus {
    /// Compute the view from the current member records.
    pub fn from_members(key: &str, members: &[Task]) -> Self {
        let count = |state: TaskState| members.iter().filter(|t| t.state == state).count();
        let winner = if members.iter().any(|t| t.is_race) {
            members
                .iter()
                .filter(|t| t.state == TaskState::Completed)
                .min_by_key(|t| t.completed_at)
                .map(|t| t.id)
        } else {
            None
        };

        Self {
            key: key.to_string(),
            is_race: members.iter().any(|t| t.is_race),
            total: members.len(),
            pending: count(TaskState::Pending),
            completed: count(TaskState::Completed),
            cancelled: count(TaskState::Cancelled),
            winner,
        }
    }

    /// AND groups: every member completed, and at least one member exists.
    /// Race groups: a winner is recorded.
    pub fn is_satisfied(&self) -> bool {
        if self.is_race {
            self.winner.is_some()
        } else {
            self.total > 0 && self.completed == self.total
        }
    }

    /// Race: a winner is recorded and nothing is left pending.
    pub fn is_resolved(&self) -> bool {
        self.winner.is_some() && self.pending == 0
    }
}

/// Workflow instance lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl InstanceState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Pending or in progress.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(self, next: InstanceState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::Pending, Self::Completed)
                | (Self::Pending, Self::Cancelled)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Cancelled)
        )
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A running (or finished) workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: Uuid,
    pub workflow_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_instance_id: Option<Uuid>,
    pub state: InstanceState,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initiated_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowInstance {
    /// Materialise a pending instance from a creation request.
    pub fn from_new(new: NewInstance) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workflow_id: new.workflow_id,
            parent_instance_id: new.parent_instance_id,
            state: InstanceState::Pending,
            data: new.data,
            entity_type: new.entity_type,
            entity_id: new.entity_id,
            initiated_by: new.initiated_by,
            created_at: now,
            updated_at: now,
        }
    }

    /// Instance data as an expression context.
    pub fn context(&self) -> std::collections::HashMap<String, Value> {
        self.data
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Instance creation request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewInstance {
    pub workflow_id: String,
    #[serde(default)]
    pub parent_instance_id: Option<Uuid>,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub initiated_by: Option<String>,
}

impl NewInstance {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            ..Default::default()
        }
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    pub fn for_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn initiated_by(mut self, initiator: impl Into<String>) -> Self {
        self.initiated_by = Some(initiator.into());
        self
    }
}

/// Published whenever the coordinator changes an instance's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceEvent {
    pub instance_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_instance_id: Option<Uuid>,
    pub workflow_id: String,
    pub state: InstanceState,
}

impl From<&WorkflowInstance> for InstanceEvent {
    fn from(instance: &WorkflowInstance) -> Self {
        Self {
            instance_id: instance.id,
            parent_instance_id: instance.parent_instance_id,
            workflow_id: instance.workflow_id.clone(),
            state: instance.state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(state: TaskState, is_race: bool) -> Task {
        let mut task = Task::from_new(NewTask {
            is_race,
            ..NewTask::new(Uuid::new_v4(), "review").in_group("g")
        });
        task.state = state;
        if state == TaskState::Completed {
            task.completed_at = Some(Utc::now());
        }
        task
    }

    #[test]
    fn test_task_state_transitions() {
        assert!(TaskState::Pending.can_transition_to(TaskState::Completed));
        assert!(TaskState::Pending.can_transition_to(TaskState::Cancelled));
        assert!(!TaskState::Completed.can_transition_to(TaskState::Cancelled));
        assert!(!TaskState::Cancelled.can_transition_to(TaskState::Completed));
        assert!(!TaskState::Completed.can_transition_to(TaskState::Pending));
        assert!(TaskState::Cancelled.is_terminal());
    }

    #[test]
    fn test_instance_state_transitions() {
        assert!(InstanceState::Pending.can_transition_to(InstanceState::InProgress));
        assert!(InstanceState::InProgress.can_transition_to(InstanceState::Cancelled));
        assert!(!InstanceState::InProgress.can_transition_to(InstanceState::Pending));
        assert!(!InstanceState::Completed.can_transition_to(InstanceState::InProgress));
        assert!(InstanceState::InProgress.is_active());
    }

    #[test]
    fn test_state_serialization() {
        assert_eq!(
            serde_json::to_string(&InstanceState::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!(InstanceState::InProgress.to_string(), "in_progress");
        assert_eq!(serde_json::to_string(&TaskState::Cancelled).unwrap(), "\"cancelled\"");
    }

    #[test]
    fn test_and_group_status() {
        let members = vec![
            member(TaskState::Completed, false),
            member(TaskState::Pending, false),
        ];
        let status = GroupStatus::from_members("g", &members);
        assert_eq!(status.total, 2);
        assert!(!status.is_satisfied());

        let done = vec![
            member(TaskState::Completed, false),
            member(TaskState::Completed, false),
        ];
        assert!(GroupStatus::from_members("g", &done).is_satisfied());
        assert!(!GroupStatus::from_members("g", &[]).is_satisfied());
    }

    #[test]
    fn test_race_group_status() {
        let winner = member(TaskState::Completed, true);
        let members = vec![winner.clone(), member(TaskState::Cancelled, true)];
        let status = GroupStatus::from_members("g", &members);
        assert!(status.is_race);
        assert_eq!(status.winner, Some(winner.id));
        assert!(status.is_satisfied());
        assert!(status.is_resolved());
    }

    #[test]
    fn test_task_serialization_field_names() {
        let task = Task::from_new(NewTask::new(Uuid::new_v4(), "firma").in_race("r-1"));
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["state"], "pending");
        assert_eq!(json["parallel_group"], "r-1");
        assert_eq!(json["is_race"], true);
        assert!(json.get("workflow_instance_id").is_some());
    }
}
