//! Workflow coordination: tasks, parallel and race groups, sub-workflows.

pub mod branch;
pub mod coordinator;
pub mod memory;
pub mod store;
pub mod subworkflow;
pub mod types;

pub use branch::{select_branch, ConditionalBranch};
pub use coordinator::{TaskCompletion, WorkflowCoordinator};
pub use memory::MemoryStore;
pub use store::{GroupLock, InstanceStore, StaticCatalog, TaskStore, WorkflowCatalog, WorkflowTrigger};
pub use subworkflow::{merge_context, LaunchOptions, SubWorkflowOrchestrator};
pub use types::{
    Assignee, AssigneeKind, GroupStatus, InstanceEvent, InstanceState, NewInstance, NewTask, Task,
    TaskSpec, TaskState, WorkflowInstance,
};
