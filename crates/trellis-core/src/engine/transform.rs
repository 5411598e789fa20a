//! Input reshaping for `transform` nodes.

use serde_json::{Map, Value};

use crate::domain::graph::Transformation;

/// Collapse a node's gathered inputs into a single value: the sole input
/// when there is exactly one predecessor, otherwise an object keyed by
/// predecessor node id.
pub fn inputs_value(inputs: &Map<String, Value>) -> Value {
    if inputs.len() == 1 {
        inputs.values().next().cloned().unwrap_or(Value::Null)
    } else {
        Value::Object(inputs.clone())
    }
}

/// Apply a transformation to the gathered inputs.
pub fn apply(
    transformation: Transformation,
    fields: Option<&[String]>,
    inputs: &Map<String, Value>,
) -> Value {
    match transformation {
        Transformation::Passthrough => inputs_value(inputs),
        Transformation::Merge => Value::Object(merged(inputs)),
        Transformation::Extract => {
            let merged = merged(inputs);
            let mut out = Map::new();
            if let Some(fields) = fields {
                for field in fields {
                    if let Some(value) = merged.get(field) {
                        out.insert(field.clone(), value.clone());
                    }
                }
            }
            Value::Object(out)
        }
    }
}

/// Merge every object-shaped input into one object; later predecessors win
/// on key collisions. Non-object inputs land under their node id.
fn merged(inputs: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (node_id, value) in inputs {
        match value {
            Value::Object(obj) => {
                for (k, v) in obj {
                    out.insert(k.clone(), v.clone());
                }
            }
            other => {
                out.insert(node_id.clone(), other.clone());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inputs(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_passthrough_single_input_unwraps() {
        let ins = inputs(&[("a", json!({"x": 1}))]);
        assert_eq!(
            apply(Transformation::Passthrough, None, &ins),
            json!({"x": 1})
        );
    }

    #[test]
    fn test_passthrough_multiple_inputs_keyed_by_node() {
        let ins = inputs(&[("a", json!(1)), ("b", json!(2))]);
        assert_eq!(
            apply(Transformation::Passthrough, None, &ins),
            json!({"a": 1, "b": 2})
        );
    }

    #[test]
    fn test_merge_combines_objects() {
        let ins = inputs(&[
            ("a", json!({"x": 1, "shared": "from_a"})),
            ("b", json!({"y": 2, "shared": "from_b"})),
        ]);
        let out = apply(Transformation::Merge, None, &ins);
        assert_eq!(out["x"], json!(1));
        assert_eq!(out["y"], json!(2));
        // Later predecessor wins
        assert_eq!(out["shared"], json!("from_b"));
    }

    #[test]
    fn test_merge_scalar_inputs_keyed_by_node() {
        let ins = inputs(&[("a", json!(42))]);
        assert_eq!(apply(Transformation::Merge, None, &ins), json!({"a": 42}));
    }

    #[test]
    fn test_extract_projects_fields() {
        let ins = inputs(&[("a", json!({"x": 1, "y": 2, "z": 3}))]);
        let fields = vec!["x".to_string(), "z".to_string(), "missing".to_string()];
        assert_eq!(
            apply(Transformation::Extract, Some(&fields), &ins),
            json!({"x": 1, "z": 3})
        );
    }

    #[test]
    fn test_extract_without_fields_is_empty() {
        let ins = inputs(&[("a", json!({"x": 1}))]);
        assert_eq!(apply(Transformation::Extract, None, &ins), json!({}));
    }
}
