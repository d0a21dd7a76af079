//! Guarded, failure-isolating action execution.

use std::time::Instant;

use serde_json::Value;
use tracing::{debug, warn};

use crate::entity::Entity;
use crate::error::{EngineError, EngineResult};
use crate::expression::Expression;

use super::registry::{ActionRegistry, ActionSpec};
use super::result::ActionResult;

enum Guard {
    Pass,
    Unmet,
    Invalid(EngineError),
}

/// Routes actions to handlers and turns every outcome into an [`ActionResult`].
#[derive(Debug, Default)]
pub struct ActionDispatcher {
    registry: ActionRegistry,
}

impl ActionDispatcher {
    pub fn new(registry: ActionRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Route to the handler, with errors returned to the caller.
    pub async fn dispatch(&self, action: &ActionSpec, entity: &dyn Entity) -> EngineResult<Value> {
        self.registry.dispatch(action, entity).await
    }

    /// Execute one action. Handler errors become a failed result; a `when`
    /// guard that is unmet or fails to parse skips the action.
    pub async fn execute(&self, action: &ActionSpec, entity: &dyn Entity) -> ActionResult {
        match check_guard(action, entity) {
            Guard::Pass => {}
            Guard::Unmet => {
                debug!(action = %action.action_type, "Action guard not met");
                return ActionResult::skipped(&action.action_type, "condition not met");
            }
            Guard::Invalid(e) => {
                warn!(action = %action.action_type, error = %e, "Skipping action with invalid guard");
                return ActionResult::skipped(&action.action_type, format!("invalid condition: {}", e));
            }
        }

        let started = Instant::now();
        let outcome = self.dispatch(action, entity).await;
        let elapsed = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(output) => ActionResult::succeeded(&action.action_type, output).with_duration(elapsed),
            Err(e) => {
                warn!(
                    action = %action.action_type,
                    entity = %entity.label(),
                    error = %e,
                    "Action failed"
                );
                ActionResult::failed(&action.action_type, e.to_string()).with_duration(elapsed)
            }
        }
    }

    /// Execute `actions` in order; a failure does not stop the rest.
    pub async fn execute_all(&self, actions: &[ActionSpec], entity: &dyn Entity) -> Vec<ActionResult> {
        let mut results = Vec::with_capacity(actions.len());
        for action in actions {
            results.push(self.execute(action, entity).await);
        }
        results
    }

    /// What `execute` would do, without running any handler.
    pub fn preview(&self, action: &ActionSpec, entity: &dyn Entity) -> ActionResult {
        match check_guard(action, entity) {
            Guard::Unmet => ActionResult::skipped(&action.action_type, "condition not met"),
            Guard::Invalid(e) => {
                ActionResult::skipped(&action.action_type, format!("invalid condition: {}", e))
            }
            Guard::Pass if !self.registry.has(&action.action_type) => ActionResult::failed(
                &action.action_type,
                EngineError::UnsupportedAction(action.action_type.clone()).to_string(),
            ),
            Guard::Pass => ActionResult::skipped(&action.action_type, "dry run"),
        }
    }
}

fn check_guard(action: &ActionSpec, entity: &dyn Entity) -> Guard {
    let Some(source) = &action.when else {
        return Guard::Pass;
    };
    match Expression::parse(source) {
        Ok(expr) if expr.evaluate(&entity.context()) => Guard::Pass,
        Ok(_) => Guard::Unmet,
        Err(e) => Guard::Invalid(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::registry::ActionHandler;
    use crate::actions::result::ActionStatus;
    use crate::entity::JsonEntity;
    use async_trait::async_trait;
    use serde_json::json;

    struct Fails;

    #[async_trait]
    impl ActionHandler for Fails {
        fn name(&self) -> &'static str {
            "fails"
        }

        async fn handle(&self, _action: &ActionSpec, _entity: &dyn Entity) -> EngineResult<Value> {
            Err(EngineError::Store("unavailable".to_string()))
        }
    }

    struct Succeeds;

    #[async_trait]
    impl ActionHandler for Succeeds {
        fn name(&self) -> &'static str {
            "ok"
        }

        async fn handle(&self, _action: &ActionSpec, _entity: &dyn Entity) -> EngineResult<Value> {
            Ok(json!(1))
        }
    }

    fn dispatcher() -> ActionDispatcher {
        let mut registry = ActionRegistry::new();
        registry.register(Fails);
        registry.register(Succeeds);
        ActionDispatcher::new(registry)
    }

    fn entity() -> JsonEntity {
        JsonEntity::from_value("e", json!({"monto": 500}))
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let actions = vec![
            ActionSpec::new("fails", json!({})),
            ActionSpec::new("unknown", json!({})),
            ActionSpec::new("ok", json!({})),
        ];
        let results = dispatcher().execute_all(&actions, &entity()).await;
        let statuses: Vec<ActionStatus> = results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![ActionStatus::Failed, ActionStatus::Failed, ActionStatus::Succeeded]
        );
        assert!(results[1].error.as_deref().unwrap().contains("unknown"));
    }

    #[tokio::test]
    async fn test_guard_controls_execution() {
        let d = dispatcher();
        let e = entity();

        let met = d.execute(&ActionSpec::new("ok", json!({})).when("monto > 100"), &e).await;
        assert_eq!(met.status, ActionStatus::Succeeded);

        let unmet = d.execute(&ActionSpec::new("ok", json!({})).when("monto > 1000"), &e).await;
        assert_eq!(unmet.status, ActionStatus::Skipped);

        let invalid = d.execute(&ActionSpec::new("ok", json!({})).when("monto >> 1"), &e).await;
        assert_eq!(invalid.status, ActionStatus::Skipped);
        assert!(invalid.error.unwrap().starts_with("invalid condition"));
    }

    #[test]
    fn test_preview_runs_nothing() {
        let d = dispatcher();
        let e = entity();
        assert_eq!(d.preview(&ActionSpec::new("fails", json!({})), &e).status, ActionStatus::Skipped);
        assert_eq!(d.preview(&ActionSpec::new("nope", json!({})), &e).status, ActionStatus::Failed);
    }

    #[test]
    fn test_dispatch_unsupported_blocking() {
        let d = dispatcher();
        let e = entity();
        let err = tokio_test::block_on(d.dispatch(&ActionSpec::new("nope", json!({})), &e)).unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedAction(_)));
    }
}
