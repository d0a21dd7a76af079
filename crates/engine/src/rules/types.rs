//! Rule definitions and evaluation results.

use serde::{Deserialize, Serialize};

use crate::actions::{ActionResult, ActionSpec, ActionStatus};
use crate::error::{EngineError, EngineResult};

use super::condition::ConditionNode;

fn default_true() -> bool {
    true
}

/// A business rule: when `conditions` hold, run `actions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,

    /// Lower runs first.
    #[serde(default)]
    pub priority: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(alias = "condition")]
    pub conditions: ConditionNode,

    #[serde(default)]
    pub actions: Vec<ActionSpec>,

    /// Stop evaluating lower-priority rules once this one matches.
    #[serde(default)]
    pub stop_on_match: bool,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Rule {
    pub fn new(name: impl Into<String>, conditions: ConditionNode) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            description: None,
            conditions,
            actions: Vec::new(),
            stop_on_match: false,
            enabled: true,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_action(mut self, action: ActionSpec) -> Self {
        self.actions.push(action);
        self
    }

    pub fn stop_on_match(mut self) -> Self {
        self.stop_on_match = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Rules in evaluation order. Equal priorities keep declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Build a set; fails with `Validation` on duplicate rule names.
    pub fn new(mut rules: Vec<Rule>) -> EngineResult<Self> {
        {
            let mut seen = std::collections::HashSet::new();
            for rule in &rules {
                if !seen.insert(rule.name.as_str()) {
                    return Err(EngineError::Validation(format!(
                        "duplicate rule name '{}'",
                        rule.name
                    )));
                }
            }
        }
        // sort_by_key is stable
        rules.sort_by_key(|rule| rule.priority);
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rule> {
        self.rules.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.name == name)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl<'a> IntoIterator for &'a RuleSet {
    type Item = &'a Rule;
    type IntoIter = std::slice::Iter<'a, Rule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}

/// A rule that matched, and what its actions did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub rule: String,
    pub matched: bool,
    pub actions: Vec<ActionResult>,
}

impl MatchResult {
    /// No action failed. Skipped actions do not count as failures.
    pub fn all_succeeded(&self) -> bool {
        self.actions.iter().all(|a| a.status != ActionStatus::Failed)
    }

    pub fn failed_actions(&self) -> Vec<&ActionResult> {
        self.actions.iter().filter(|a| a.is_failure()).collect()
    }
}

/// Aggregate counts over one evaluation, for logging and CLI output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvaluationSummary {
    pub rules_evaluated: usize,
    pub rules_matched: usize,
    pub actions_succeeded: usize,
    pub actions_failed: usize,
    pub actions_skipped: usize,
    pub stopped_by: Option<String>,
}

impl EvaluationSummary {
    pub fn from_results(rules_evaluated: usize, results: &[MatchResult], stopped_by: Option<String>) -> Self {
        let mut summary = Self {
            rules_evaluated,
            rules_matched: results.len(),
            stopped_by,
            ..Self::default()
        };
        for action in results.iter().flat_map(|r| &r.actions) {
            match action.status {
                ActionStatus::Succeeded => summary.actions_succeeded += 1,
                ActionStatus::Failed => summary.actions_failed += 1,
                ActionStatus::Skipped => summary.actions_skipped += 1,
            }
        }
        summary
    }
}

impl std::fmt::Display for EvaluationSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} of {} rules matched; actions: {} succeeded, {} failed, {} skipped",
            self.rules_matched,
            self.rules_evaluated,
            self.actions_succeeded,
            self.actions_failed,
            self.actions_skipped
        )?;
        if let Some(rule) = &self.stopped_by {
            write!(f, " (stopped by '{}')", rule)?;
        }
        Ok(())
    }
}
