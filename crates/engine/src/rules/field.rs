//! Dot-path field resolution.
//!
//! Missing segments never error: resolution stops at the first absent or
//! null segment and yields `Value::Null`.

use std::collections::HashMap;

use serde_json::Value;

use crate::entity::Entity;

/// Resolve `path` against an entity.
pub fn resolve<E: Entity + ?Sized>(entity: &E, path: &str) -> Value {
    let mut segments = path.split('.');
    let head = match segments.next() {
        Some(head) if !head.is_empty() => head,
        _ => return Value::Null,
    };

    match entity.field(head) {
        Some(root) => traverse(&root, segments).cloned().unwrap_or(Value::Null),
        None => Value::Null,
    }
}

/// Resolve `path` against a context map.
pub fn resolve_in(context: &HashMap<String, Value>, path: &str) -> Value {
    let mut segments = path.split('.');
    let head = match segments.next() {
        Some(head) if !head.is_empty() => head,
        _ => return Value::Null,
    };

    context
        .get(head)
        .and_then(|root| traverse(root, segments))
        .cloned()
        .unwrap_or(Value::Null)
}

/// Walk the remaining segments of a path below `root`.
fn traverse<'a, 'p>(
    root: &'a Value,
    segments: impl Iterator<Item = &'p str>,
) -> Option<&'a Value> {
    let mut current = root;

    for segment in segments {
        current = match current {
            Value::Object(obj) => obj.get(segment)?,
            Value::Array(arr) => {
                let idx: usize = segment.parse().ok()?;
                arr.get(idx)?
            }
            _ => return None,
        };
    }

    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::JsonEntity;
    use serde_json::json;

    fn entity(value: Value) -> JsonEntity {
        JsonEntity::from_value("test", value)
    }

    #[test]
    fn test_single_segment() {
        let e = entity(json!({"tipo": "urgente"}));
        assert_eq!(resolve(&e, "tipo"), json!("urgente"));
    }

    #[test]
    fn test_nested_segment() {
        let e = entity(json!({"usuario": {"nombre": "Ana"}}));
        assert_eq!(resolve(&e, "usuario.nombre"), json!("Ana"));
    }

    #[test]
    fn test_null_intermediate_short_circuits() {
        let e = entity(json!({"usuario": null}));
        assert_eq!(resolve(&e, "usuario.nombre"), Value::Null);
    }

    #[test]
    fn test_missing_field_is_null() {
        let e = entity(json!({}));
        assert_eq!(resolve(&e, "usuario.nombre"), Value::Null);
        assert_eq!(resolve(&e, "estado"), Value::Null);
        assert_eq!(resolve(&e, ""), Value::Null);
    }

    #[test]
    fn test_scalar_intermediate_is_null() {
        let e = entity(json!({"usuario": "Ana"}));
        assert_eq!(resolve(&e, "usuario.nombre"), Value::Null);
    }

    #[test]
    fn test_array_index() {
        let e = entity(json!({"items": [{"sku": "A1"}, {"sku": "B2"}]}));
        assert_eq!(resolve(&e, "items.1.sku"), json!("B2"));
        assert_eq!(resolve(&e, "items.5.sku"), Value::Null);
        assert_eq!(resolve(&e, "items.x"), Value::Null);
    }

    #[test]
    fn test_resolve_in_context() {
        let mut ctx = HashMap::new();
        ctx.insert("a".to_string(), json!({"b": 3}));
        assert_eq!(resolve_in(&ctx, "a.b"), json!(3));
        assert_eq!(resolve_in(&ctx, "z"), Value::Null);
    }
}
