//! JSON tree walking shared by the network, embedded-state, and LD-JSON
//! methods.

use harvest_rules::normalize_field_key;
use serde_json::Value;

/// One leaf found in a JSON tree.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonLeaf {
    pub key_path: String,
    /// Normalized form of the final path segment.
    pub key: String,
    pub value: String,
}

/// Collect scalar leaves (and scalar-array elements) with dotted key paths.
/// Arrays of objects index into the path (`specs.0.weight`).
#[must_use]
pub fn collect_leaves(root: &Value) -> Vec<JsonLeaf> {
    let mut leaves = Vec::new();
    walk(root, String::new(), "", &mut leaves);
    leaves
}

fn walk(value: &Value, path: String, key: &str, out: &mut Vec<JsonLeaf>) {
    match value {
        Value::Object(map) => {
            for (child_key, child) in map {
                let child_path = if path.is_empty() {
                    child_key.clone()
                } else {
                    format!("{path}.{child_key}")
                };
                walk(child, child_path, child_key, out);
            }
        }
        Value::Array(items) => {
            let all_scalars = items.iter().all(|v| !v.is_object() && !v.is_array());
            if all_scalars {
                // Scalar arrays stay keyed by the parent (list-shape fields).
                for item in items {
                    if let Some(text) = scalar_to_string(item) {
                        out.push(JsonLeaf {
                            key_path: path.clone(),
                            key: normalize_field_key(key),
                            value: text,
                        });
                    }
                }
            } else {
                for (index, item) in items.iter().enumerate() {
                    walk(item, format!("{path}.{index}"), key, out);
                }
            }
        }
        scalar => {
            if let Some(text) = scalar_to_string(scalar) {
                out.push(JsonLeaf {
                    key_path: path,
                    key: normalize_field_key(key),
                    value: text,
                });
            }
        }
    }
}

/// Render a JSON scalar as a candidate value. Integral floats lose the
/// trailing `.0`; null yields nothing.
#[must_use]
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => {
            if let Some(int) = n.as_i64() {
                Some(int.to_string())
            } else {
                n.as_f64().map(|f| {
                    if f.fract() == 0.0 && f.abs() < 1e15 {
                        format!("{}", f as i64)
                    } else {
                        format!("{f}")
                    }
                })
            }
        }
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn walks_nested_objects_with_dotted_paths() {
        let root = json!({"product": {"specs": {"weight_g": 63, "sensor": "HERO 25K"}}});
        let leaves = collect_leaves(&root);
        assert!(leaves.contains(&JsonLeaf {
            key_path: "product.specs.weight_g".into(),
            key: "weight_g".into(),
            value: "63".into(),
        }));
        assert!(leaves.iter().any(|l| l.value == "HERO 25K"));
    }

    #[test]
    fn scalar_arrays_keep_parent_path() {
        let root = json!({"dpi_steps": [400, 800, 1600]});
        let leaves = collect_leaves(&root);
        assert_eq!(leaves.len(), 3);
        assert!(leaves.iter().all(|l| l.key_path == "dpi_steps"));
        assert!(leaves.iter().all(|l| l.key == "dpi_steps"));
    }

    #[test]
    fn object_arrays_index_into_path() {
        let root = json!({"offers": [{"price": 159.99}, {"price": 149.0}]});
        let leaves = collect_leaves(&root);
        assert!(leaves.iter().any(|l| l.key_path == "offers.0.price"));
        assert!(
            leaves
                .iter()
                .any(|l| l.key_path == "offers.1.price" && l.value == "149")
        );
    }

    #[test]
    fn nulls_and_blanks_are_skipped() {
        let root = json!({"a": null, "b": "  ", "c": true});
        let leaves = collect_leaves(&root);
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].value, "true");
    }
}
