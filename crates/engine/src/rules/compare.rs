//! Loose value semantics shared by conditions and expressions.

use std::cmp::Ordering;

use serde_json::Value;

/// Numeric view of a value: numbers, and strings that parse as numbers.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            trimmed.parse::<f64>().ok().filter(|f| f.is_finite())
        }
        _ => None,
    }
}

/// Loose equality: `"5" == 5`, `"5.0" == 5`, otherwise type-aware equality.
pub fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| loose_eq(x, y))
        }
        (Value::Object(_), Value::Object(_)) => left == right,
        _ => match (as_number(left), as_number(right)) {
            (Some(a), Some(b)) => a == b,
            _ => match (left, right) {
                (Value::String(a), Value::String(b)) => a == b,
                _ => false,
            },
        },
    }
}

/// Ordering between two values; `None` when the pair is not comparable.
///
/// Strings compare lexically only when neither side is numeric.
pub fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (as_number(left), as_number(right)) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        (None, None) => match (left, right) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        },
        _ => None,
    }
}

/// String view used by substring operators.
pub fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Check if a JSON value is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_string_equals_number() {
        assert!(loose_eq(&json!("5"), &json!(5)));
        assert!(loose_eq(&json!(5), &json!("5.0")));
        assert!(loose_eq(&json!(" 2 "), &json!(2)));
        assert!(!loose_eq(&json!("5a"), &json!(5)));
    }

    #[test]
    fn test_null_only_equals_null() {
        assert!(loose_eq(&Value::Null, &Value::Null));
        assert!(!loose_eq(&Value::Null, &json!("")));
        assert!(!loose_eq(&json!(0), &Value::Null));
    }

    #[test]
    fn test_strings_and_bools() {
        assert!(loose_eq(&json!("alta"), &json!("alta")));
        assert!(!loose_eq(&json!("alta"), &json!("Alta")));
        assert!(loose_eq(&json!(true), &json!(true)));
        assert!(!loose_eq(&json!(true), &json!("true")));
    }

    #[test]
    fn test_compare_mixed() {
        assert_eq!(compare(&json!("10"), &json!(9)), Some(Ordering::Greater));
        assert_eq!(compare(&json!("abc"), &json!("abd")), Some(Ordering::Less));
        assert_eq!(compare(&json!("abc"), &json!(3)), None);
        assert_eq!(compare(&Value::Null, &json!(3)), None);
        assert_eq!(compare(&json!([1]), &json!([1])), None);
    }

    #[test]
    fn test_numeric_and_text_strings_do_not_order() {
        assert_eq!(compare(&json!("10"), &json!("abc")), None);
        assert_eq!(compare(&json!("abc"), &json!("10")), None);
        assert_eq!(compare(&json!("10"), &json!("9")), Some(Ordering::Greater));
        assert_eq!(compare(&json!(""), &json!("a")), Some(Ordering::Less));
    }

    #[test]
    fn test_to_text() {
        assert_eq!(to_text(&json!(42)), "42");
        assert_eq!(to_text(&Value::Null), "");
        assert_eq!(to_text(&json!(false)), "false");
    }

    #[test]
    fn test_is_truthy() {
        assert!(!is_truthy(&Value::Null));
        assert!(!is_truthy(&json!(0)));
        assert!(is_truthy(&json!("x")));
        assert!(!is_truthy(&json!([])));
        assert!(is_truthy(&json!({"a": 1})));
    }
}
