//! JSON Schemas for rule-pack artifacts.
//!
//! Defaults are embedded; a helper root may override any of them by placing
//! `<name>.schema.json` under `_shared/schemas/`.

use anyhow::{Context, Result};
use camino::Utf8Path;
use serde_json::{Value, json};

use crate::paths::shared_schemas_dir;

/// Return the schema for an artifact filename, honoring helper-root
/// overrides. `component_db/*.json` files share one schema.
pub fn schema_for(helper_root: &Utf8Path, artifact: &str) -> Result<Value> {
    let name = if artifact.starts_with("component_db/") {
        "component_db"
    } else {
        artifact.trim_end_matches(".json")
    };

    let override_path = shared_schemas_dir(helper_root).join(format!("{name}.schema.json"));
    if override_path.exists() {
        let raw = std::fs::read_to_string(&override_path)
            .with_context(|| format!("failed to read schema override: {override_path}"))?;
        return serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse schema override: {override_path}"));
    }

    embedded_schema(name)
        .with_context(|| format!("no schema known for artifact '{artifact}'"))
}

/// Validate an artifact instance against its schema. Returns schema error
/// messages; empty means valid.
pub fn validate_against_schema(
    helper_root: &Utf8Path,
    artifact: &str,
    instance: &Value,
) -> Result<Vec<String>> {
    let schema = schema_for(helper_root, artifact)?;
    let validator = jsonschema::validator_for(&schema)
        .with_context(|| format!("invalid schema for artifact '{artifact}'"))?;
    Ok(validator
        .iter_errors(instance)
        .map(|err| format!("{}: {}", err.instance_path(), err))
        .collect())
}

fn embedded_schema(name: &str) -> Option<Value> {
    let schema = match name {
        "field_rules" => json!({
            "type": "object",
            "required": ["category", "fields"],
            "properties": {
                "category": {"type": "string", "pattern": "^[a-z0-9_-]+$"},
                "fields": {
                    "type": "object",
                    "additionalProperties": {
                        "type": "object",
                        "required": [
                            "field_key", "display_name", "group", "data_type",
                            "output_shape", "required_level", "availability",
                            "difficulty", "effort", "evidence", "unknown_reason_default"
                        ],
                        "properties": {
                            "field_key": {"type": "string", "pattern": "^[a-z0-9_]+$"},
                            "display_name": {"type": "string", "minLength": 1},
                            "data_type": {"enum": ["string", "number", "url", "boolean", "enum"]},
                            "output_shape": {"enum": ["scalar", "list"]},
                            "required_level": {"enum": [
                                "required", "expected", "critical",
                                "editorial", "commerce", "optional"
                            ]},
                            "availability": {"enum": ["expected", "editorial_only", "sometimes", "rare"]},
                            "difficulty": {"enum": ["easy", "medium", "hard"]},
                            "effort": {"type": "integer", "minimum": 1, "maximum": 10},
                            "evidence": {
                                "type": "object",
                                "required": ["required", "min_refs"]
                            }
                        }
                    }
                }
            }
        }),
        "ui_field_catalog" => json!({
            "type": "object",
            "required": ["fields"],
            "properties": {
                "fields": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["key", "display_name", "order"]
                    }
                }
            }
        }),
        "known_values" => json!({
            "type": "object",
            "required": ["enums"],
            "properties": {
                "enums": {
                    "type": "object",
                    "additionalProperties": {
                        "type": "object",
                        "required": ["policy", "values"],
                        "properties": {
                            "policy": {"enum": ["open", "closed"]},
                            "values": {"type": "array", "items": {"type": "string"}}
                        }
                    }
                }
            }
        }),
        "parse_templates" => json!({
            "type": "object",
            "required": ["templates"],
            "properties": {
                "templates": {
                    "type": "object",
                    "additionalProperties": {
                        "type": "object",
                        "required": ["patterns"],
                        "properties": {
                            "patterns": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "required": ["regex", "group"]
                                }
                            }
                        }
                    }
                }
            }
        }),
        "cross_validation_rules" => json!({
            "type": "object",
            "required": ["rules"],
            "properties": {
                "rules": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["rule_id", "rule_type", "trigger_field", "on_fail"],
                        "properties": {
                            "on_fail": {"enum": ["reject_candidate", "flag_for_review"]}
                        }
                    }
                }
            }
        }),
        "field_groups" => json!({
            "type": "object",
            "required": ["groups"],
            "properties": {
                "groups": {
                    "type": "object",
                    "additionalProperties": {
                        "type": "array",
                        "items": {"type": "string"}
                    }
                }
            }
        }),
        "key_migrations" => json!({
            "type": "object",
            "required": ["version", "previous_version", "bump", "migrations", "key_map"],
            "properties": {
                "bump": {"enum": ["major", "minor", "patch"]},
                "migrations": {"type": "array"},
                "key_map": {"type": "object", "additionalProperties": {"type": "string"}}
            }
        }),
        "manifest" => json!({
            "type": "object",
            "required": ["algorithm", "artifact_count", "artifacts"],
            "properties": {
                "algorithm": {"const": "sha256"},
                "artifact_count": {"type": "integer", "minimum": 0},
                "artifacts": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["path", "sha256", "bytes"],
                        "properties": {
                            "sha256": {"type": "string", "pattern": "^[0-9a-f]{64}$"}
                        }
                    }
                }
            }
        }),
        "component_db" => json!({
            "type": "object",
            "required": ["component_type", "entries"],
            "properties": {
                "entries": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["canonical_name", "maker"]
                    }
                }
            }
        }),
        _ => return None,
    };
    Some(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    fn helper_root(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()
    }

    #[test]
    fn manifest_schema_rejects_wrong_algorithm() {
        let dir = TempDir::new().unwrap();
        let root = helper_root(&dir);
        let bad = json!({"algorithm": "md5", "artifact_count": 0, "artifacts": []});
        let errors = validate_against_schema(&root, "manifest.json", &bad).unwrap();
        assert!(!errors.is_empty());

        let good = json!({"algorithm": "sha256", "artifact_count": 0, "artifacts": []});
        let errors = validate_against_schema(&root, "manifest.json", &good).unwrap();
        assert!(errors.is_empty());
    }

    #[test]
    fn component_db_files_share_one_schema() {
        let dir = TempDir::new().unwrap();
        let root = helper_root(&dir);
        let instance = json!({"component_type": "sensor", "entries": []});
        let errors =
            validate_against_schema(&root, "component_db/sensor.json", &instance).unwrap();
        assert!(errors.is_empty());
    }

    #[test]
    fn overrides_take_precedence() {
        let dir = TempDir::new().unwrap();
        let root = helper_root(&dir);
        let schemas = shared_schemas_dir(&root);
        std::fs::create_dir_all(schemas.as_std_path()).unwrap();
        std::fs::write(
            schemas.join("field_groups.schema.json").as_std_path(),
            r#"{"type": "object", "required": ["groups", "extra_key"]}"#,
        )
        .unwrap();

        let instance = json!({"groups": {}});
        let errors = validate_against_schema(&root, "field_groups.json", &instance).unwrap();
        assert!(errors.iter().any(|e| e.contains("extra_key")));
    }

    #[test]
    fn unknown_artifact_is_an_error() {
        let dir = TempDir::new().unwrap();
        let root = helper_root(&dir);
        assert!(schema_for(&root, "mystery.json").is_err());
    }
}
