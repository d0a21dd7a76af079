//! Tramita engine library
//!
//! Business rules and workflow coordination for case-handling systems:
//!
//! - **Rules**: priority-ordered rule sets with typed condition trees
//! - **Expressions**: a restricted boolean language for conditional actions
//!   and branch guards
//! - **Actions**: a handler registry with per-action failure isolation
//! - **Workflows**: tasks, parallel (AND) and race gateways, instance
//!   lifecycle and sub-workflows
//!
//! ## Modules
//!
//! - [`config`]: Engine configuration from `TRAMITA_*` environment variables
//! - [`entity`]: The entity capabilities rules read and mutate
//! - [`error`]: Error types
//! - [`rules`]: Rule model, loading and evaluation
//! - [`actions`]: Action handlers and dispatch
//! - [`workflow`]: Task/gateway coordination and sub-workflows
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tramita_engine::{
//!     actions::{create_default_registry, ActionDispatcher, Collaborators, LogNotifier},
//!     config::EngineConfig,
//!     entity::JsonEntity,
//!     rules::{load_rule_set, RuleEngine},
//!     workflow::WorkflowCoordinator,
//! };
//!
//! let config = EngineConfig::from_env()?;
//! let coordinator = Arc::new(WorkflowCoordinator::in_memory(&config));
//! let collaborators = Collaborators::new()
//!     .with_notifier(Arc::new(LogNotifier))
//!     .with_coordinator(coordinator);
//! let registry = create_default_registry(&config, &collaborators);
//! let (rules, _issues) = load_rule_set(&yaml, &registry, &config)?;
//!
//! let engine = RuleEngine::new(ActionDispatcher::new(registry));
//! let entity = JsonEntity::from_value("solicitud", serde_json::json!({"tipo": "urgente"}));
//! let results = engine.evaluate_rules(&entity, &rules).await;
//! ```

pub mod actions;
pub mod config;
pub mod entity;
pub mod error;
pub mod expression;
pub mod result_ext;
pub mod rules;
pub mod workflow;

pub use error::{EngineError, EngineResult};
pub use result_ext::{OptionResultExt, ResultExt};
