//! Built-in action handlers.
//!
//! - `update_field`, `set_priority`, `add_tag` - write entity fields
//! - `assign_to_user`, `assign_to_role` - set the entity's assignee
//! - `escalate` - reassign, flag and optionally notify
//! - `send_notification` - deliver a rendered message
//! - `create_task` - create a task, optionally in a parallel group
//! - `trigger_workflow` - start a workflow instance

mod entity;
mod notification;
mod workflow;

pub use self::entity::{
    AddTagHandler, AssignToRoleHandler, AssignToUserHandler, EscalateHandler, SetPriorityHandler,
    UpdateFieldHandler,
};
pub use self::notification::SendNotificationHandler;
pub use self::workflow::{CreateTaskHandler, TriggerWorkflowHandler, INSTANCE_FIELD};

use std::sync::Arc;

use crate::actions::notify::Notifier;
use crate::actions::registry::ActionRegistry;
use crate::config::EngineConfig;
use crate::workflow::coordinator::WorkflowCoordinator;
use crate::workflow::store::WorkflowTrigger;

/// External services the built-in handlers may depend on.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub notifier: Option<Arc<dyn Notifier>>,
    pub coordinator: Option<Arc<WorkflowCoordinator>>,
    /// Defaults to the coordinator when unset.
    pub trigger: Option<Arc<dyn WorkflowTrigger>>,
}

impl Collaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_coordinator(mut self, coordinator: Arc<WorkflowCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn with_trigger(mut self, trigger: Arc<dyn WorkflowTrigger>) -> Self {
        self.trigger = Some(trigger);
        self
    }
}

/// Create a registry with every built-in handler whose collaborators are
/// available and whose subsystem is enabled.
pub fn create_default_registry(config: &EngineConfig, collaborators: &Collaborators) -> ActionRegistry {
    let mut registry = ActionRegistry::new();

    registry.register(UpdateFieldHandler);
    registry.register(AssignToUserHandler);
    registry.register(AssignToRoleHandler);
    registry.register(AddTagHandler);
    registry.register(SetPriorityHandler);

    let notifier = collaborators
        .notifier
        .clone()
        .filter(|_| config.notifications_enabled);
    registry.register(EscalateHandler::new(notifier.clone()));
    if let Some(notifier) = notifier {
        registry.register(SendNotificationHandler::new(notifier));
    }

    if config.workflows_enabled {
        if let Some(coordinator) = &collaborators.coordinator {
            registry.register(CreateTaskHandler::new(coordinator.clone()));
        }
        let trigger = collaborators.trigger.clone().or_else(|| {
            collaborators
                .coordinator
                .clone()
                .map(|c| c as Arc<dyn WorkflowTrigger>)
        });
        if let Some(trigger) = trigger {
            registry.register(TriggerWorkflowHandler::new(trigger));
        }
    }

    registry
}
