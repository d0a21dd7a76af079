//! Ordered rule evaluation.

use tracing::{debug, info};

use crate::actions::ActionDispatcher;
use crate::entity::Entity;

use super::condition::ConditionEvaluator;
use super::types::{EvaluationSummary, MatchResult, Rule, RuleSet};

/// Evaluates rule sets and dispatches the actions of matching rules.
#[derive(Debug)]
pub struct RuleEngine {
    evaluator: ConditionEvaluator,
    dispatcher: ActionDispatcher,
    dry_run: bool,
}

impl RuleEngine {
    pub fn new(dispatcher: ActionDispatcher) -> Self {
        Self {
            evaluator: ConditionEvaluator::new(),
            dispatcher,
            dry_run: false,
        }
    }

    /// Evaluate conditions only; every action of a matching rule is
    /// recorded as skipped (or failed, if it has no handler).
    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    pub fn dispatcher(&self) -> &ActionDispatcher {
        &self.dispatcher
    }

    /// Whether `rule` applies to `entity`. Disabled rules never apply.
    pub fn matches(&self, rule: &Rule, entity: &dyn Entity) -> bool {
        rule.enabled && self.evaluator.evaluate(&rule.conditions, entity)
    }

    /// Evaluate `rules` in priority order against `entity`.
    ///
    /// Only matching rules appear in the result. Action failures are
    /// recorded and never stop evaluation; `stop_on_match` does.
    pub async fn evaluate_rules(&self, entity: &dyn Entity, rules: &RuleSet) -> Vec<MatchResult> {
        self.evaluate_with_summary(entity, rules).await.0
    }

    /// Like [`evaluate_rules`](Self::evaluate_rules), plus aggregate counts.
    pub async fn evaluate_with_summary(
        &self,
        entity: &dyn Entity,
        rules: &RuleSet,
    ) -> (Vec<MatchResult>, EvaluationSummary) {
        let mut results = Vec::new();
        let mut evaluated = 0;
        let mut stopped_by = None;

        for rule in rules {
            if !rule.enabled {
                debug!(rule = %rule.name, "Skipping disabled rule");
                continue;
            }
            evaluated += 1;

            if !self.evaluator.evaluate(&rule.conditions, entity) {
                debug!(rule = %rule.name, "Rule did not match");
                continue;
            }

            let actions = if self.dry_run {
                rule.actions
                    .iter()
                    .map(|action| self.dispatcher.preview(action, entity))
                    .collect()
            } else {
                self.dispatcher.execute_all(&rule.actions, entity).await
            };

            let result = MatchResult {
                rule: rule.name.clone(),
                matched: true,
                actions,
            };
            debug!(
                rule = %rule.name,
                actions = result.actions.len(),
                failed = result.failed_actions().len(),
                "Rule matched"
            );
            results.push(result);

            if rule.stop_on_match {
                stopped_by = Some(rule.name.clone());
                break;
            }
        }

        let summary = EvaluationSummary::from_results(evaluated, &results, stopped_by);
        info!(entity = %entity.label(), dry_run = self.dry_run, "{}", summary);
        (results, summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{create_default_registry, ActionRegistry, ActionSpec, ActionStatus, Collaborators};
    use crate::config::EngineConfig;
    use crate::entity::JsonEntity;
    use crate::rules::condition::{ConditionNode, Operator};
    use crate::rules::parser::parse_rule_set;
    use serde_json::{json, Value};

    fn engine() -> RuleEngine {
        let registry = create_default_registry(&EngineConfig::default(), &Collaborators::new());
        RuleEngine::new(ActionDispatcher::new(registry))
    }

    fn tag_rule(name: &str, priority: i64, tag: &str) -> Rule {
        Rule::new(name, ConditionNode::leaf("tipo", Operator::Eq, json!("urgente")))
            .with_priority(priority)
            .with_action(ActionSpec::new("add_tag", json!({"tag": tag})))
    }

    #[tokio::test]
    async fn test_urgent_rule_end_to_end() {
        let rules = parse_rule_set(
            r#"
- name: urgente
  priority: 1
  stop_on_match: true
  conditions:
    operator: AND
    conditions:
      - field: tipo
        operator: eq
        value: urgente
      - field: estado
        operator: eq
        value: pendiente
  actions:
    - type: assign_to_user
      user_id: 1
    - type: set_priority
      priority: alta
- name: etiquetar
  priority: 5
  conditions:
    field: tipo
    operator: eq
    value: urgente
  actions:
    - type: add_tag
      tag: revisar
"#,
        )
        .unwrap();
        let entity = JsonEntity::from_value(
            "solicitud",
            json!({"tipo": "urgente", "estado": "pendiente"}),
        );

        let (results, summary) = engine().evaluate_with_summary(&entity, &rules).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].rule, "urgente");
        assert!(results[0].all_succeeded());
        assert_eq!(summary.stopped_by.as_deref(), Some("urgente"));
        assert_eq!(entity.field("assignee_id"), Some(json!("1")));
        assert_eq!(entity.field("assignee_type"), Some(json!("user")));
        assert_eq!(entity.field("priority"), Some(json!("alta")));
        assert_eq!(entity.field("tags"), None);

        // Without the second condition the first rule is skipped.
        let resuelta = JsonEntity::from_value("solicitud", json!({"tipo": "urgente", "estado": "cerrado"}));
        let results = engine().evaluate_rules(&resuelta, &rules).await;
        let names: Vec<&str> = results.iter().map(|r| r.rule.as_str()).collect();
        assert_eq!(names, vec!["etiquetar"]);
        assert_eq!(resuelta.field("tags"), Some(json!(["revisar"])));
    }

    #[tokio::test]
    async fn test_non_matching_rules_contribute_nothing() {
        let rules = RuleSet::new(vec![tag_rule("a", 1, "x")]).unwrap();
        let entity = JsonEntity::from_value("e", json!({"tipo": "normal"}));
        assert!(engine().evaluate_rules(&entity, &rules).await.is_empty());
    }

    #[tokio::test]
    async fn test_stop_on_match_halts_lower_priorities() {
        let rules = RuleSet::new(vec![
            tag_rule("tercera", 30, "c"),
            tag_rule("primera", 10, "a").stop_on_match(),
            tag_rule("segunda", 20, "b"),
        ])
        .unwrap();
        let entity = JsonEntity::from_value("e", json!({"tipo": "urgente"}));

        let (results, summary) = engine().evaluate_with_summary(&entity, &rules).await;
        let names: Vec<&str> = results.iter().map(|r| r.rule.as_str()).collect();
        assert_eq!(names, vec!["primera"]);
        assert_eq!(summary.stopped_by.as_deref(), Some("primera"));
        assert_eq!(entity.field("tags"), Some(json!(["a"])));
    }

    #[tokio::test]
    async fn test_all_matching_rules_run_in_priority_order() {
        let rules = RuleSet::new(vec![tag_rule("b", 2, "b"), tag_rule("a", 1, "a")]).unwrap();
        let entity = JsonEntity::from_value("e", json!({"tipo": "urgente"}));

        let results = engine().evaluate_rules(&entity, &rules).await;
        assert_eq!(results.len(), 2);
        assert_eq!(entity.field("tags"), Some(json!(["a", "b"])));
    }

    #[tokio::test]
    async fn test_disabled_rules_are_skipped() {
        let rules = RuleSet::new(vec![tag_rule("off", 1, "x").disabled()]).unwrap();
        let entity = JsonEntity::from_value("e", json!({"tipo": "urgente"}));
        let engine = engine();
        assert!(engine.evaluate_rules(&entity, &rules).await.is_empty());
        assert!(!engine.matches(&rules.rules()[0], &entity));
    }

    #[tokio::test]
    async fn test_action_failure_does_not_stop_siblings() {
        let rule = tag_rule("r", 1, "x")
            .with_action(ActionSpec::new("assign_to_role", json!({"role": "legal"})))
            .with_action(ActionSpec::new("not_registered", json!({})))
            .with_action(ActionSpec::new("set_priority", json!({"priority": 1})));
        let rules = RuleSet::new(vec![rule, tag_rule("otra", 2, "y")]).unwrap();
        let entity = JsonEntity::from_value("e", json!({"tipo": "urgente"})).without_assignment();

        let results = engine().evaluate_rules(&entity, &rules).await;
        assert_eq!(results.len(), 2);
        let statuses: Vec<ActionStatus> = results[0].actions.iter().map(|a| a.status).collect();
        assert_eq!(
            statuses,
            vec![
                ActionStatus::Succeeded,
                ActionStatus::Failed,
                ActionStatus::Failed,
                ActionStatus::Succeeded,
            ]
        );
        assert_eq!(results[0].failed_actions().len(), 2);
        assert_eq!(entity.field("priority"), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_dry_run_changes_nothing() {
        let rules = RuleSet::new(vec![tag_rule("r", 1, "x")]).unwrap();
        let entity = JsonEntity::from_value("e", json!({"tipo": "urgente"}));

        let results = engine().dry_run(true).evaluate_rules(&entity, &rules).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].actions[0].status, ActionStatus::Skipped);
        assert_eq!(entity.field("tags"), None);
    }

    #[tokio::test]
    async fn test_conditional_action() {
        let rule = Rule::new("r", ConditionNode::leaf("tipo", Operator::IsNotNull, Value::Null))
            .with_action(ActionSpec::new("add_tag", json!({"tag": "grande"})).when("monto >= 1000"))
            .with_action(ActionSpec::new("add_tag", json!({"tag": "chico"})).when("monto < 1000"));
        let rules = RuleSet::new(vec![rule]).unwrap();
        let entity = JsonEntity::from_value("e", json!({"tipo": "x", "monto": 5000}));

        let results = engine().evaluate_rules(&entity, &rules).await;
        assert_eq!(results[0].actions[0].status, ActionStatus::Succeeded);
        assert_eq!(results[0].actions[1].status, ActionStatus::Skipped);
        assert_eq!(entity.field("tags"), Some(json!(["grande"])));
    }

    #[tokio::test]
    async fn test_empty_registry_records_unsupported() {
        let engine = RuleEngine::new(ActionDispatcher::new(ActionRegistry::new()));
        let rules = RuleSet::new(vec![tag_rule("r", 1, "x")]).unwrap();
        let entity = JsonEntity::from_value("e", json!({"tipo": "urgente"}));

        let results = engine.evaluate_rules(&entity, &rules).await;
        assert!(!results[0].all_succeeded());
        assert!(results[0].actions[0]
            .error
            .as_deref()
            .unwrap()
            .contains("Unsupported action"));
    }
}
