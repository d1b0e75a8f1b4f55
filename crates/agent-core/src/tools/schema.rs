//! Declarative parameter validation
//!
//! Checks an argument object against the subset of JSON Schema the tools
//! declare: top-level object type, `properties` types, `required` names,
//! and `additionalProperties: false`.

use serde_json::Value;

/// Validate `args` against `schema`. Returns human-readable errors; empty
/// means valid.
pub fn validate(schema: &Value, args: &Value) -> Vec<String> {
    let mut errors = Vec::new();

    let Some(args_obj) = args.as_object() else {
        return vec!["arguments must be an object".to_string()];
    };

    let properties = schema.get("properties").and_then(|p| p.as_object());

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for name in required.iter().filter_map(|n| n.as_str()) {
            if !args_obj.contains_key(name) {
                errors.push(format!("missing required parameter '{}'", name));
            }
        }
    }

    if let Some(properties) = properties {
        for (name, value) in args_obj {
            match properties.get(name) {
                Some(property) => {
                    if let Some(expected) = property.get("type").and_then(|t| t.as_str()) {
                        if !type_matches(expected, value) {
                            errors.push(format!(
                                "parameter '{}' should be {}, got {}",
                                name,
                                expected,
                                type_name(value)
                            ));
                        }
                    }
                }
                None => {
                    let closed = schema
                        .get("additionalProperties")
                        .and_then(|a| a.as_bool())
                        == Some(false);
                    if closed {
                        errors.push(format!("unknown parameter '{}'", name));
                    }
                }
            }
        }
    }

    errors
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn file_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "limit": {"type": "integer"}
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    #[test]
    fn accepts_valid_arguments() {
        assert!(validate(&file_schema(), &json!({"path": "a.txt", "limit": 5})).is_empty());
    }

    #[test]
    fn reports_missing_required() {
        let errors = validate(&file_schema(), &json!({"limit": 5}));
        assert!(errors.iter().any(|e| e.contains("missing required parameter 'path'")));
    }

    #[test]
    fn reports_type_mismatch() {
        let errors = validate(&file_schema(), &json!({"path": 42}));
        assert!(errors.iter().any(|e| e.contains("'path' should be string")));
    }

    #[test]
    fn rejects_unknown_when_closed() {
        let errors = validate(&file_schema(), &json!({"path": "a", "bogus": true}));
        assert!(errors.iter().any(|e| e.contains("unknown parameter 'bogus'")));
    }

    #[test]
    fn rejects_non_object_arguments() {
        let errors = validate(&file_schema(), &json!("just a string"));
        assert_eq!(errors, vec!["arguments must be an object".to_string()]);
    }
}
