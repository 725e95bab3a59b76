//! Payload transforms (§4.3), applied in order to a copy of the payload
//! before callback invocation. Any failure aborts the whole pipeline and
//! the original, untransformed payload is forwarded instead.

use crate::types::TransformSpec;
use serde_json::{Map, Value};

pub fn apply(transforms: &[TransformSpec], payload: &Value) -> Value {
    let mut current = payload.clone();
    for transform in transforms {
        match apply_one(transform, &current) {
            Ok(next) => current = next,
            Err(_) => return payload.clone(),
        }
    }
    current
}

fn apply_one(transform: &TransformSpec, payload: &Value) -> anyhow::Result<Value> {
    match transform.name.as_str() {
        "add_timestamp" => add_timestamp(payload),
        "flatten_payload" => flatten_payload(payload),
        "extract_fields" => extract_fields(transform, payload),
        other => Err(anyhow::anyhow!("unknown transform '{other}'")),
    }
}

fn add_timestamp(payload: &Value) -> anyhow::Result<Value> {
    let mut obj = payload
        .as_object()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("add_timestamp requires an object payload"))?;
    obj.insert("timestamp".to_string(), Value::String(chrono::Utc::now().to_rfc3339()));
    Ok(Value::Object(obj))
}

fn flatten_payload(payload: &Value) -> anyhow::Result<Value> {
    let obj = payload
        .as_object()
        .ok_or_else(|| anyhow::anyhow!("flatten_payload requires an object payload"))?;
    let mut flat = Map::new();
    flatten_into(obj, "", &mut flat);
    Ok(Value::Object(flat))
}

fn flatten_into(obj: &Map<String, Value>, prefix: &str, out: &mut Map<String, Value>) {
    for (key, value) in obj {
        let dotted = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
        match value {
            Value::Object(nested) => flatten_into(nested, &dotted, out),
            other => {
                out.insert(dotted, other.clone());
            }
        }
    }
}

fn extract_fields(transform: &TransformSpec, payload: &Value) -> anyhow::Result<Value> {
    let allowed: Vec<String> = transform
        .params
        .get("fields")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow::anyhow!("extract_fields requires a 'fields' array param"))?
        .iter()
        .filter_map(|v| v.as_str().map(|s| s.to_string()))
        .collect();
    let obj = payload
        .as_object()
        .ok_or_else(|| anyhow::anyhow!("extract_fields requires an object payload"))?;
    let mut out = Map::new();
    for field in allowed {
        if let Some(value) = obj.get(&field) {
            out.insert(field, value.clone());
        }
    }
    Ok(Value::Object(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn add_timestamp_inserts_field() {
        let result = apply(&[TransformSpec { name: "add_timestamp".to_string(), params: HashMap::new() }], &serde_json::json!({"a": 1}));
        assert!(result.get("timestamp").is_some());
    }

    #[test]
    fn flatten_payload_dots_nested_keys() {
        let result = apply(
            &[TransformSpec { name: "flatten_payload".to_string(), params: HashMap::new() }],
            &serde_json::json!({"a": {"b": 1, "c": {"d": 2}}}),
        );
        assert_eq!(result["a.b"], 1);
        assert_eq!(result["a.c.d"], 2);
    }

    #[test]
    fn extract_fields_keeps_only_allow_listed() {
        let spec = TransformSpec {
            name: "extract_fields".to_string(),
            params: HashMap::from([("fields".to_string(), serde_json::json!(["a", "c"]))]),
        };
        let result = apply(&[spec], &serde_json::json!({"a": 1, "b": 2, "c": 3}));
        assert_eq!(result, serde_json::json!({"a": 1, "c": 3}));
    }

    #[test]
    fn failing_transform_forwards_original_payload() {
        let payload = serde_json::json!([1, 2, 3]);
        let result = apply(&[TransformSpec { name: "flatten_payload".to_string(), params: HashMap::new() }], &payload);
        assert_eq!(result, payload);
    }
}
