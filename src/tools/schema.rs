//! 工具参数校验（JSON Schema 子集）
//!
//! 支持 type（单个或列表）、required、properties（递归）、items、enum、additionalProperties: false；
//! 其它关键字忽略。校验失败返回带路径的原因，例如 `$.host: expected string, got number`。

use serde_json::Value;

/// 按工具的 input schema 校验参数
pub fn validate_arguments(schema: &Value, args: &Value) -> Result<(), String> {
    validate(schema, args, "$")
}

fn validate(schema: &Value, value: &Value, path: &str) -> Result<(), String> {
    // `true` / 非对象 schema 接受任何值
    let Some(schema) = schema.as_object() else {
        return Ok(());
    };

    if let Some(ty) = schema.get("type") {
        let ok = match ty {
            Value::String(t) => type_matches(t, value),
            Value::Array(types) => types
                .iter()
                .filter_map(Value::as_str)
                .any(|t| type_matches(t, value)),
            _ => true,
        };
        if !ok {
            return Err(format!(
                "{path}: expected {}, got {}",
                describe_type(ty),
                type_name(value)
            ));
        }
    }

    if let Some(Value::Array(allowed)) = schema.get("enum") {
        if !allowed.contains(value) {
            let allowed = Value::Array(allowed.clone());
            return Err(format!("{path}: value {value} is not one of {allowed}"));
        }
    }

    if let Value::Object(obj) = value {
        if let Some(Value::Array(required)) = schema.get("required") {
            for field in required.iter().filter_map(Value::as_str) {
                if !obj.contains_key(field) {
                    return Err(format!("{path}: missing required field '{field}'"));
                }
            }
        }

        let properties = schema.get("properties").and_then(Value::as_object);
        if let Some(properties) = properties {
            for (key, sub) in properties {
                if let Some(v) = obj.get(key) {
                    validate(sub, v, &format!("{path}.{key}"))?;
                }
            }
        }

        if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
            let declared = |k: &&String| properties.is_some_and(|p| p.contains_key(*k));
            if let Some(extra) = obj.keys().find(|k| !declared(k)) {
                return Err(format!("{path}: unexpected field '{extra}'"));
            }
        }
    }

    if let (Value::Array(items), Some(item_schema)) = (value, schema.get("items")) {
        for (i, item) in items.iter().enumerate() {
            validate(item_schema, item, &format!("{path}[{i}]"))?;
        }
    }

    Ok(())
}

fn type_matches(ty: &str, value: &Value) -> bool {
    match ty {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => {
            value.is_i64() || value.is_u64() || value.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        "boolean" => value.is_boolean(),
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

fn describe_type(ty: &Value) -> String {
    match ty {
        Value::String(t) => t.clone(),
        Value::Array(types) => types
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" | "),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metric_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "host": {"type": "string"},
                "metric": {"type": "string", "enum": ["cpu", "memory"]},
                "window_minutes": {"type": "integer"},
                "tags": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["host", "metric"],
            "additionalProperties": false
        })
    }

    #[test]
    fn test_valid_arguments() {
        let args = json!({"host": "A", "metric": "cpu", "window_minutes": 5, "tags": ["prod"]});
        assert!(validate_arguments(&metric_schema(), &args).is_ok());
    }

    #[test]
    fn test_missing_required() {
        let err = validate_arguments(&metric_schema(), &json!({"host": "A"})).unwrap_err();
        assert!(err.contains("metric"), "{err}");
    }

    #[test]
    fn test_wrong_type_reports_path() {
        let args = json!({"host": 1, "metric": "cpu"});
        let err = validate_arguments(&metric_schema(), &args).unwrap_err();
        assert_eq!(err, "$.host: expected string, got number");
    }

    #[test]
    fn test_enum_and_items() {
        let bad_enum = json!({"host": "A", "metric": "disk"});
        assert!(validate_arguments(&metric_schema(), &bad_enum).is_err());
        let bad_item = json!({"host": "A", "metric": "cpu", "tags": [1]});
        let err = validate_arguments(&metric_schema(), &bad_item).unwrap_err();
        assert!(err.starts_with("$.tags[0]"), "{err}");
    }

    #[test]
    fn test_additional_properties_false() {
        let args = json!({"host": "A", "metric": "cpu", "x": 1});
        let err = validate_arguments(&metric_schema(), &args).unwrap_err();
        assert!(err.contains("unexpected field 'x'"));
    }

    #[test]
    fn test_integer_and_type_list() {
        let schema = json!({"type": ["integer", "null"]});
        assert!(validate_arguments(&schema, &json!(3)).is_ok());
        assert!(validate_arguments(&schema, &json!(3.0)).is_ok());
        assert!(validate_arguments(&schema, &Value::Null).is_ok());
        assert!(validate_arguments(&schema, &json!(3.5)).is_err());
    }

    #[test]
    fn test_permissive_schema_accepts_anything() {
        assert!(validate_arguments(&json!({}), &json!({"anything": [1, 2]})).is_ok());
        assert!(validate_arguments(&json!(true), &json!("x")).is_ok());
    }
}
