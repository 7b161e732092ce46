//! Minimal JSON Schema checks for tool arguments.
//!
//! Covers the subset tool descriptors use in practice: a top-level
//! `type: object`, `required`, primitive `type` per property and
//! `additionalProperties: false`.

use serde_json::{Map, Value};

/// Validate `arguments` against an object schema.
pub fn validate_arguments(
    schema: &Map<String, Value>,
    arguments: &Map<String, Value>,
) -> Result<(), String> {
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !arguments.contains_key(name) {
                return Err(format!("missing required argument `{name}`"));
            }
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));

    for (name, value) in arguments {
        match properties.and_then(|p| p.get(name)) {
            Some(property) => {
                if let Some(expected) = property.get("type") {
                    if !matches_type(expected, value) {
                        return Err(format!(
                            "argument `{name}` must be of type {expected}, got {}",
                            type_name(value)
                        ));
                    }
                }
            }
            None if closed => return Err(format!("unexpected argument `{name}`")),
            None => {}
        }
    }

    Ok(())
}

fn matches_type(expected: &Value, value: &Value) -> bool {
    match expected {
        Value::String(name) => matches_named_type(name, value),
        // `type: ["string", "null"]`
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .any(|name| matches_named_type(name, value)),
        _ => true,
    }
}

fn matches_named_type(name: &str, value: &Value) -> bool {
    match name {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
