// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Minimal JSON-Schema argument validation.
//!
//! Tool parameter schemas in this codebase use a small, fixed subset of JSON
//! Schema: an object with `properties` (each a primitive `type`, possibly an
//! `enum`), `required`, and array items.  Validating against that subset
//! before a tool runs turns malformed model output into one structured
//! "Invalid arguments" error instead of a tool-specific failure halfway
//! through execution.

use serde_json::Value;

/// Validate `args` against a parameters `schema`.
///
/// Returns a list of human-readable problems; empty means valid.
pub fn validate_args(schema: &Value, args: &Value) -> Vec<String> {
    let mut problems = Vec::new();

    let obj = match args.as_object() {
        Some(o) => o,
        None => {
            problems.push(format!("arguments must be an object, got {}", type_name(args)));
            return problems;
        }
    };

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for req in required {
            if let Some(name) = req.as_str() {
                if !obj.contains_key(name) {
                    problems.push(format!("missing required parameter '{name}'"));
                }
            }
        }
    }

    if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
        for (name, value) in obj {
            let Some(prop) = props.get(name) else {
                // Unknown parameters are tolerated; models frequently add
                // harmless extras and rejecting them wastes a turn.
                continue;
            };
            if let Some(expected) = prop.get("type").and_then(|t| t.as_str()) {
                if !type_matches(expected, value) {
                    problems.push(format!(
                        "parameter '{name}' must be {expected}, got {}",
                        type_name(value)
                    ));
                    continue;
                }
            }
            if let Some(allowed) = prop.get("enum").and_then(|e| e.as_array()) {
                if !allowed.contains(value) {
                    problems.push(format!(
                        "parameter '{name}' must be one of {}",
                        serde_json::to_string(allowed).unwrap_or_default()
                    ));
                }
            }
        }
    }

    problems
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
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

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "limit": { "type": "integer" },
                "mode": { "type": "string", "enum": ["a", "b"] }
            },
            "required": ["path"]
        })
    }

    #[test]
    fn valid_args_pass() {
        let problems = validate_args(&schema(), &json!({"path": "x", "limit": 3}));
        assert!(problems.is_empty(), "{problems:?}");
    }

    #[test]
    fn missing_required_is_reported() {
        let problems = validate_args(&schema(), &json!({"limit": 3}));
        assert_eq!(problems, vec!["missing required parameter 'path'"]);
    }

    #[test]
    fn wrong_type_is_reported() {
        let problems = validate_args(&schema(), &json!({"path": 42}));
        assert!(problems.iter().any(|p| p.contains("'path' must be string")));
    }

    #[test]
    fn non_object_args_are_rejected() {
        let problems = validate_args(&schema(), &json!("just a string"));
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("must be an object"));
    }

    #[test]
    fn enum_violation_is_reported() {
        let problems = validate_args(&schema(), &json!({"path": "x", "mode": "c"}));
        assert!(problems.iter().any(|p| p.contains("one of")));
    }

    #[test]
    fn unknown_parameters_are_tolerated() {
        let problems = validate_args(&schema(), &json!({"path": "x", "extra": true}));
        assert!(problems.is_empty());
    }

    #[test]
    fn integer_accepts_unsigned_and_signed() {
        assert!(validate_args(&schema(), &json!({"path": "x", "limit": -1})).is_empty());
        assert!(validate_args(&schema(), &json!({"path": "x", "limit": 9000})).is_empty());
        assert!(!validate_args(&schema(), &json!({"path": "x", "limit": 1.5})).is_empty());
    }
}
