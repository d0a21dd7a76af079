//! Business rules: conditions, rule sets and their evaluation.

pub mod compare;
pub mod condition;
pub mod engine;
pub mod field;
pub mod parser;
pub mod types;

pub use condition::{
    Condition, ConditionEvaluator, ConditionGroup, ConditionNode, GroupOperator, Operator,
};
pub use engine::RuleEngine;
pub use parser::{load_rule_set, parse_rule_set, validate_rule_set, Severity, ValidationIssue};
pub use types::{EvaluationSummary, MatchResult, Rule, RuleSet};
