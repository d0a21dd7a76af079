//! Condition trees and their evaluation.
//!
//! A rule's applicability is a tree of AND/OR groups over leaf
//! conditions. Evaluation is pure: it only reads the entity.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::entity::Entity;

use super::compare::{compare, loose_eq, to_text};
use super::field;

/// Leaf condition operator.
///
/// Unrecognised names are kept in [`Operator::Unknown`] so they can be
/// reported by validation; they always evaluate false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum Operator {
    #[default]
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Contains,
    StartsWith,
    EndsWith,
    In,
    NotIn,
    IsNull,
    IsNotNull,
    Unknown(String),
}

impl Operator {
    pub fn as_str(&self) -> &str {
        match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Gt => "gt",
            Operator::Lt => "lt",
            Operator::Ge => "ge",
            Operator::Le => "le",
            Operator::Contains => "contains",
            Operator::StartsWith => "starts_with",
            Operator::EndsWith => "ends_with",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::IsNull => "is_null",
            Operator::IsNotNull => "is_not_null",
            Operator::Unknown(name) => name,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Operator::Unknown(_))
    }

    /// Whether the operator reads the condition's `value` operand.
    pub fn uses_value(&self) -> bool {
        !matches!(self, Operator::IsNull | Operator::IsNotNull)
    }
}

impl From<String> for Operator {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "eq" => Operator::Eq,
            "ne" => Operator::Ne,
            "gt" => Operator::Gt,
            "lt" => Operator::Lt,
            "ge" => Operator::Ge,
            "le" => Operator::Le,
            "contains" => Operator::Contains,
            "starts_with" => Operator::StartsWith,
            "ends_with" => Operator::EndsWith,
            "in" => Operator::In,
            "not_in" => Operator::NotIn,
            "is_null" => Operator::IsNull,
            "is_not_null" => Operator::IsNotNull,
            _ => Operator::Unknown(s),
        }
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        op.as_str().to_string()
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Boolean connective of a condition group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GroupOperator {
    #[serde(alias = "and")]
    And,
    #[serde(alias = "or")]
    Or,
}

/// Leaf condition: `field <operator> value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Dot-path into the entity.
    pub field: String,

    #[serde(default)]
    pub operator: Operator,

    /// Right-hand operand; ignored by `is_null`/`is_not_null`.
    #[serde(default)]
    pub value: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }
}

/// AND/OR group over child nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionGroup {
    pub operator: GroupOperator,

    #[serde(alias = "conditions")]
    pub children: Vec<ConditionNode>,
}

/// Node of a condition tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionNode {
    Group(ConditionGroup),
    Leaf(Condition),
}

impl ConditionNode {
    /// Build an AND group.
    pub fn all(children: Vec<ConditionNode>) -> Self {
        ConditionNode::Group(ConditionGroup {
            operator: GroupOperator::And,
            children,
        })
    }

    /// Build an OR group.
    pub fn any(children: Vec<ConditionNode>) -> Self {
        ConditionNode::Group(ConditionGroup {
            operator: GroupOperator::Or,
            children,
        })
    }

    /// Build a leaf.
    pub fn leaf(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        ConditionNode::Leaf(Condition::new(field, operator, value))
    }

    /// Visit every leaf in declaration order.
    pub fn leaves(&self) -> Vec<&Condition> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Condition>) {
        match self {
            ConditionNode::Leaf(leaf) => out.push(leaf),
            ConditionNode::Group(group) => {
                for child in &group.children {
                    child.collect_leaves(out);
                }
            }
        }
    }
}

/// Evaluates condition trees against entities.
#[derive(Debug, Clone, Default)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// Create a new condition evaluator.
    pub fn new() -> Self {
        Self
    }

    /// Evaluate a condition tree.
    pub fn evaluate<E: Entity + ?Sized>(&self, node: &ConditionNode, entity: &E) -> bool {
        match node {
            ConditionNode::Group(group) => self.evaluate_group(group, entity),
            ConditionNode::Leaf(leaf) => self.evaluate_leaf(leaf, entity),
        }
    }

    fn evaluate_group<E: Entity + ?Sized>(&self, group: &ConditionGroup, entity: &E) -> bool {
        if group.children.is_empty() {
            warn!(
                operator = ?group.operator,
                "Condition group has no children, treating as unmet"
            );
            return false;
        }

        match group.operator {
            GroupOperator::And => group.children.iter().all(|c| self.evaluate(c, entity)),
            GroupOperator::Or => group.children.iter().any(|c| self.evaluate(c, entity)),
        }
    }

    /// Evaluate a single leaf condition.
    pub fn evaluate_leaf<E: Entity + ?Sized>(&self, condition: &Condition, entity: &E) -> bool {
        let actual = field::resolve(entity, &condition.field);
        let result = apply_operator(&condition.operator, &actual, &condition.value);

        debug!(
            field = %condition.field,
            operator = %condition.operator,
            matched = result,
            "Evaluated condition"
        );

        result
    }
}

/// Apply `operator` to a resolved field value and the condition operand.
pub fn apply_operator(operator: &Operator, actual: &Value, expected: &Value) -> bool {
    match operator {
        Operator::Eq => loose_eq(actual, expected),
        Operator::Ne => !loose_eq(actual, expected),
        Operator::Gt => compare(actual, expected).is_some_and(|o| o.is_gt()),
        Operator::Lt => compare(actual, expected).is_some_and(|o| o.is_lt()),
        Operator::Ge => compare(actual, expected).is_some_and(|o| o.is_ge()),
        Operator::Le => compare(actual, expected).is_some_and(|o| o.is_le()),
        Operator::Contains => to_text(actual).contains(&to_text(expected)),
        Operator::StartsWith => to_text(actual).starts_with(&to_text(expected)),
        Operator::EndsWith => to_text(actual).ends_with(&to_text(expected)),
        Operator::In => is_member(actual, expected),
        Operator::NotIn => !is_member(actual, expected),
        Operator::IsNull => actual.is_null(),
        Operator::IsNotNull => !actual.is_null(),
        Operator::Unknown(name) => {
            warn!(
                operator = %name,
                "Unknown condition operator, evaluating as false"
            );
            false
        }
    }
}

fn is_member(actual: &Value, collection: &Value) -> bool {
    match collection {
        Value::Array(items) => items.iter().any(|item| loose_eq(actual, item)),
        Value::Null => false,
        scalar => loose_eq(actual, scalar),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::JsonEntity;
    use serde_json::json;

    fn entity(value: Value) -> JsonEntity {
        JsonEntity::from_value("test", value)
    }

    fn leaf(field: &str, op: &str, value: Value) -> ConditionNode {
        ConditionNode::leaf(field, Operator::from(op.to_string()), value)
    }

    #[test]
    fn test_operator_parsing() {
        assert_eq!(Operator::from("EQ".to_string()), Operator::Eq);
        assert_eq!(Operator::from("not_in".to_string()), Operator::NotIn);
        assert_eq!(
            Operator::from("between".to_string()),
            Operator::Unknown("between".to_string())
        );
        assert!(!Operator::from("between".to_string()).is_known());
    }

    #[test]
    fn test_condition_tree_deserialization() {
        let node: ConditionNode = serde_json::from_value(json!({
            "operator": "AND",
            "children": [
                {"field": "tipo", "operator": "eq", "value": "urgente"},
                {"operator": "or", "conditions": [
                    {"field": "monto", "operator": "gt", "value": 100},
                    {"field": "vip", "operator": "is_not_null"}
                ]}
            ]
        }))
        .unwrap();

        match &node {
            ConditionNode::Group(group) => {
                assert_eq!(group.operator, GroupOperator::And);
                assert_eq!(group.children.len(), 2);
            }
            _ => panic!("expected group"),
        }
        assert_eq!(node.leaves().len(), 3);
    }

    #[test]
    fn test_eq_is_loose() {
        let e = entity(json!({"monto": "100"}));
        let evaluator = ConditionEvaluator::new();
        assert!(evaluator.evaluate(&leaf("monto", "eq", json!(100)), &e));
        assert!(!evaluator.evaluate(&leaf("monto", "ne", json!(100)), &e));
    }

    #[test]
    fn test_ordering_operators() {
        let e = entity(json!({"monto": 150, "nombre": "beta"}));
        let evaluator = ConditionEvaluator::new();
        assert!(evaluator.evaluate(&leaf("monto", "gt", json!(100)), &e));
        assert!(evaluator.evaluate(&leaf("monto", "ge", json!("150")), &e));
        assert!(!evaluator.evaluate(&leaf("monto", "lt", json!(100)), &e));
        assert!(evaluator.evaluate(&leaf("monto", "le", json!(150)), &e));
        assert!(evaluator.evaluate(&leaf("nombre", "gt", json!("alpha")), &e));
    }

    #[test]
    fn test_incomparable_pairs_are_false() {
        let e = entity(json!({"monto": "abc", "vacio": null}));
        let evaluator = ConditionEvaluator::new();
        assert!(!evaluator.evaluate(&leaf("monto", "gt", json!(1)), &e));
        assert!(!evaluator.evaluate(&leaf("monto", "lt", json!(1)), &e));
        assert!(!evaluator.evaluate(&leaf("vacio", "ge", json!(0)), &e));

        let numeric = entity(json!({"folio": "10"}));
        assert!(!evaluator.evaluate(&leaf("folio", "lt", json!("abc")), &numeric));
        assert!(!evaluator.evaluate(&leaf("folio", "ge", json!("abc")), &numeric));
    }

    #[test]
    fn test_string_operators_cast() {
        let e = entity(json!({"codigo": 12345, "titulo": "Solicitud urgente"}));
        let evaluator = ConditionEvaluator::new();
        assert!(evaluator.evaluate(&leaf("codigo", "starts_with", json!(12)), &e));
        assert!(evaluator.evaluate(&leaf("codigo", "ends_with", json!("45")), &e));
        assert!(evaluator.evaluate(&leaf("titulo", "contains", json!("urgente")), &e));
        assert!(!evaluator.evaluate(&leaf("titulo", "contains", json!("normal")), &e));
    }

    #[test]
    fn test_membership() {
        let e = entity(json!({"estado": "pendiente", "nivel": "2"}));
        let evaluator = ConditionEvaluator::new();
        assert!(evaluator.evaluate(
            &leaf("estado", "in", json!(["pendiente", "revision"])),
            &e
        ));
        assert!(evaluator.evaluate(&leaf("nivel", "in", json!([1, 2, 3])), &e));
        assert!(evaluator.evaluate(&leaf("estado", "not_in", json!(["cerrado"])), &e));
        assert!(evaluator.evaluate(&leaf("estado", "in", json!("pendiente")), &e));
        assert!(!evaluator.evaluate(&leaf("estado", "in", Value::Null), &e));
    }

    #[test]
    fn test_null_operators_ignore_value() {
        let e = entity(json!({"asignado": null, "tipo": "x"}));
        let evaluator = ConditionEvaluator::new();
        for value in [Value::Null, json!("anything"), json!(42)] {
            assert!(evaluator.evaluate(&leaf("asignado", "is_null", value.clone()), &e));
            assert!(evaluator.evaluate(&leaf("missing", "is_null", value.clone()), &e));
            assert!(evaluator.evaluate(&leaf("tipo", "is_not_null", value.clone()), &e));
            assert!(!evaluator.evaluate(&leaf("tipo", "is_null", value), &e));
        }
    }

    #[test]
    fn test_unknown_operator_is_false() {
        let e = entity(json!({"tipo": "x"}));
        let evaluator = ConditionEvaluator::new();
        assert!(!evaluator.evaluate(&leaf("tipo", "matches", json!("x")), &e));
        assert!(!evaluator.evaluate(&leaf("tipo", "between", Value::Null), &e));
    }

    #[test]
    fn test_groups() {
        let e = entity(json!({"tipo": "urgente", "estado": "pendiente"}));
        let evaluator = ConditionEvaluator::new();

        let both = ConditionNode::all(vec![
            leaf("tipo", "eq", json!("urgente")),
            leaf("estado", "eq", json!("pendiente")),
        ]);
        assert!(evaluator.evaluate(&both, &e));

        let one_wrong = ConditionNode::all(vec![
            leaf("tipo", "eq", json!("urgente")),
            leaf("estado", "eq", json!("cerrado")),
        ]);
        assert!(!evaluator.evaluate(&one_wrong, &e));

        let either = ConditionNode::any(vec![
            leaf("tipo", "eq", json!("normal")),
            leaf("estado", "eq", json!("pendiente")),
        ]);
        assert!(evaluator.evaluate(&either, &e));
    }

    #[test]
    fn test_empty_group_is_unmet() {
        let e = entity(json!({}));
        let evaluator = ConditionEvaluator::new();
        assert!(!evaluator.evaluate(&ConditionNode::all(vec![]), &e));
        assert!(!evaluator.evaluate(&ConditionNode::any(vec![]), &e));
    }
}
