//! Command-line input parsing.

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde_json::{Map, Value};

/// Read a JSON argument given inline or as `@path`.
pub fn json_argument(raw: &str) -> Result<Value> {
    let content = match raw.strip_prefix('@') {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read JSON file: {}", path))?,
        None => raw.to_string(),
    };
    serde_json::from_str(&content).context("Failed to parse JSON input")
}

/// Read a JSON object argument; anything else is an error.
pub fn json_object(raw: &str) -> Result<Map<String, Value>> {
    match json_argument(raw)? {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!("Expected a JSON object, got: {}", other)),
    }
}

/// Parse `key=value` pairs. Values that parse as JSON keep their type,
/// everything else is taken as a string.
pub fn parse_variables(variables: &[String]) -> Result<Vec<(String, Value)>> {
    variables
        .iter()
        .map(|var| {
            let (key, value) = var
                .split_once('=')
                .ok_or_else(|| anyhow!("Invalid variable format: {}. Expected key=value", var))?;
            if key.is_empty() {
                return Err(anyhow!("Invalid variable format: {}. Key is empty", var));
            }
            let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
            Ok((key.to_string(), value))
        })
        .collect()
}

/// Set a possibly dotted key, creating intermediate objects.
pub fn set_path(fields: &mut Map<String, Value>, key: &str, value: Value) {
    match key.split_once('.') {
        None => {
            fields.insert(key.to_string(), value);
        }
        Some((head, rest)) => {
            let slot = fields
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            if let Value::Object(inner) = slot {
                set_path(inner, rest, value);
            }
        }
    }
}

pub fn read_rules_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read rule set: {}", path.display()))
}
