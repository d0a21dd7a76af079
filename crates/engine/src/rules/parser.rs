//! Rule set loading and validation.
//!
//! Accepts YAML or JSON, either `{rules: [...]}` or a bare list of rules.

use serde::Serialize;
use tracing::{info, warn};

use crate::actions::ActionRegistry;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::expression::Expression;

use super::condition::{ConditionNode, Operator};
use super::types::{Rule, RuleSet};

/// Parse a rule set document.
pub fn parse_rule_set(content: &str) -> EngineResult<RuleSet> {
    let document: serde_yaml::Value = serde_yaml::from_str(content)?;

    let items = match document {
        serde_yaml::Value::Sequence(items) => items,
        serde_yaml::Value::Mapping(mut map) => match map.remove("rules") {
            Some(serde_yaml::Value::Sequence(items)) => items,
            Some(_) => {
                return Err(EngineError::Validation(
                    "'rules' must be a list".to_string(),
                ))
            }
            None => {
                return Err(EngineError::Validation(
                    "Rule set document needs a 'rules' list".to_string(),
                ))
            }
        },
        serde_yaml::Value::Null => Vec::new(),
        _ => {
            return Err(EngineError::Validation(
                "Rule set document must be a list or a mapping with 'rules'".to_string(),
            ))
        }
    };

    let mut rules = Vec::with_capacity(items.len());
    for (idx, item) in items.into_iter().enumerate() {
        let label = item
            .get("name")
            .and_then(|n| n.as_str())
            .map(|n| format!("rule '{}'", n))
            .unwrap_or_else(|| format!("rules[{}]", idx));
        let rule: Rule = serde_yaml::from_value(item)
            .map_err(|e| EngineError::Validation(format!("{}: {}", label, e)))?;
        rules.push(rule);
    }

    RuleSet::new(rules)
}

/// Issue severity. Errors fail loading in strict mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// A problem found in a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
}

impl ValidationIssue {
    fn error(rule: &Rule, message: impl Into<String>) -> Self {
        Self {
            rule: rule.name.clone(),
            severity: Severity::Error,
            message: message.into(),
        }
    }

    fn warning(rule: &Rule, message: impl Into<String>) -> Self {
        Self {
            rule: rule.name.clone(),
            severity: Severity::Warning,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] rule '{}': {}", self.severity, self.rule, self.message)
    }
}

/// Report everything that would make a rule misbehave at evaluation time.
///
/// Unknown action types are only checked when a registry is given.
pub fn validate_rule_set(rules: &RuleSet, registry: Option<&ActionRegistry>) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    for rule in rules {
        if rule.name.trim().is_empty() {
            issues.push(ValidationIssue::error(rule, "rule name must not be empty"));
        }
        validate_node(rule, &rule.conditions, &mut issues);

        if rule.actions.is_empty() {
            issues.push(ValidationIssue::warning(rule, "rule has no actions"));
        }
        for (idx, action) in rule.actions.iter().enumerate() {
            if let Some(registry) = registry {
                if !registry.has(&action.action_type) {
                    issues.push(ValidationIssue::error(
                        rule,
                        format!(
                            "actions[{}]: {}",
                            idx,
                            EngineError::UnsupportedAction(action.action_type.clone())
                        ),
                    ));
                }
            }
            if let Some(guard) = &action.when {
                if let Err(e) = Expression::parse(guard) {
                    issues.push(ValidationIssue::error(
                        rule,
                        format!("actions[{}]: invalid 'when' expression: {}", idx, e),
                    ));
                }
            }
        }
    }

    issues
}

fn validate_node(rule: &Rule, node: &ConditionNode, issues: &mut Vec<ValidationIssue>) {
    match node {
        ConditionNode::Group(group) => {
            if group.children.is_empty() {
                issues.push(ValidationIssue::error(
                    rule,
                    "empty condition group never matches",
                ));
            }
            for child in &group.children {
                validate_node(rule, child, issues);
            }
        }
        ConditionNode::Leaf(leaf) => {
            if leaf.field.trim().is_empty() {
                issues.push(ValidationIssue::error(rule, "condition field must not be empty"));
            }
            if !leaf.operator.is_known() {
                issues.push(ValidationIssue::error(
                    rule,
                    format!(
                        "field '{}': {}",
                        leaf.field,
                        EngineError::UnsupportedOperator(leaf.operator.to_string())
                    ),
                ));
            }
            if matches!(leaf.operator, Operator::In | Operator::NotIn) && !leaf.value.is_array() {
                issues.push(ValidationIssue::warning(
                    rule,
                    format!(
                        "field '{}': '{}' value is not a list and is treated as a single element",
                        leaf.field, leaf.operator
                    ),
                ));
            }
        }
    }
}

/// Parse, validate against `registry` and log the issues.
///
/// With `strict_validation` any error-level issue fails the load.
pub fn load_rule_set(
    content: &str,
    registry: &ActionRegistry,
    config: &EngineConfig,
) -> EngineResult<(RuleSet, Vec<ValidationIssue>)> {
    let rules = parse_rule_set(content)?;
    let issues = validate_rule_set(&rules, Some(registry));

    for issue in &issues {
        warn!(rule = %issue.rule, severity = %issue.severity, "{}", issue.message);
    }

    let errors: Vec<String> = issues
        .iter()
        .filter(|i| i.severity == Severity::Error)
        .map(|i| i.to_string())
        .collect();
    if config.strict_validation && !errors.is_empty() {
        return Err(EngineError::Validation(errors.join("; ")));
    }

    info!(rules = rules.len(), issues = issues.len(), "Rule set loaded");
    Ok((rules, issues))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{create_default_registry, Collaborators};

    const RULES: &str = r#"
rules:
  - name: monto_alto
    priority: 20
    conditions:
      operator: AND
      conditions:
        - field: monto
          operator: gt
          value: 10000
        - field: estado
          operator: ne
          value: cerrado
    actions:
      - type: assign_to_role
        role: tesoreria
  - name: urgente
    priority: 10
    stop_on_match: true
    conditions:
      field: tipo
      operator: EQ
      value: urgente
    actions:
      - type: set_priority
        priority: alta
"#;

    fn registry() -> ActionRegistry {
        create_default_registry(&EngineConfig::default(), &Collaborators::new())
    }

    #[test]
    fn test_parse_wrapped_yaml() {
        let set = parse_rule_set(RULES).unwrap();
        let names: Vec<&str> = set.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["urgente", "monto_alto"]);
        assert!(set.get("urgente").unwrap().stop_on_match);
        assert!(validate_rule_set(&set, Some(&registry())).is_empty());
    }

    #[test]
    fn test_parse_bare_json_list() {
        let json = r#"[{"name": "r", "conditions": {"field": "a", "operator": "is_null"},
                        "actions": [{"type": "add_tag", "tag": "x"}]}]"#;
        let set = parse_rule_set(json).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.rules()[0].actions[0].payload["tag"], "x");
    }

    #[test]
    fn test_parse_errors_name_the_rule() {
        let err = parse_rule_set("rules:\n  - name: roto\n    priority: alta\n").unwrap_err();
        match err {
            EngineError::Validation(msg) => assert!(msg.contains("roto"), "{}", msg),
            other => panic!("unexpected error {:?}", other),
        }
        assert!(parse_rule_set("rules: 3").is_err());
        assert!(parse_rule_set("otra: []").is_err());
        assert!(parse_rule_set("rules: []").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_document_is_validation_error() {
        match parse_rule_set("rules: [\n  - name: a\n").unwrap_err() {
            EngineError::Validation(msg) => {
                assert!(msg.starts_with("Invalid rule set document: "), "{}", msg)
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_validation_reports_problems() {
        let yaml = r#"
- name: r
  conditions:
    operator: OR
    conditions:
      - field: estado
        operator: matches
        value: x
      - operator: AND
        conditions: []
      - field: tipo
        operator: in
        value: a
  actions:
    - type: teleport
    - type: add_tag
      tag: x
      when: "a >> 1"
"#;
        let set = parse_rule_set(yaml).unwrap();
        let issues = validate_rule_set(&set, Some(&registry()));
        let errors: Vec<&str> = issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .map(|i| i.message.as_str())
            .collect();
        assert_eq!(errors.len(), 4, "{:?}", errors);
        assert!(errors.iter().any(|m| m.contains("Unsupported operator: matches")));
        assert!(errors.iter().any(|m| m.contains("empty condition group")));
        assert!(errors.iter().any(|m| m.contains("Unsupported action: teleport")));
        assert!(errors.iter().any(|m| m.contains("invalid 'when'")));
        assert!(issues.iter().any(|i| i.severity == Severity::Warning));
    }

    #[test]
    fn test_strict_loading_fails_on_errors() {
        let yaml = "- name: r\n  conditions: {field: a, operator: bogus}\n  actions: [{type: add_tag, tag: x}]\n";
        let lenient = load_rule_set(yaml, &registry(), &EngineConfig::default()).unwrap();
        assert_eq!(lenient.1.len(), 1);

        let strict = EngineConfig {
            strict_validation: true,
            ..EngineConfig::default()
        };
        assert!(matches!(
            load_rule_set(yaml, &registry(), &strict).unwrap_err(),
            EngineError::Validation(_)
        ));
    }
}
