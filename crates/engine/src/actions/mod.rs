//! Rule actions: registry, dispatch and the built-in handlers.

pub mod dispatcher;
pub mod handlers;
pub mod notify;
pub mod registry;
pub mod result;
pub mod template;

pub use dispatcher::ActionDispatcher;
pub use handlers::{create_default_registry, Collaborators};
pub use notify::{LogNotifier, Notification, Notifier};
pub use registry::{ActionHandler, ActionRegistry, ActionSpec};
pub use result::{ActionResult, ActionStatus};
