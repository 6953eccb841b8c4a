//! `rules-diff`: dry-run compile plus breaking-change classification.

use anyhow::Result;
use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::compile::{CompileReport, compile};
use crate::model::{FieldRule, FieldRulesArtifact};
use crate::normalize::normalize_field_rule;
use crate::paths::{generated_dir, normalize_category};
use crate::workbook::load_category_sources;

/// Severity of a pending rules change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffClassification {
    Safe,
    PotentiallyBreaking,
    Breaking,
}

/// Outcome of `rules-diff`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesDiffReport {
    pub classification: DiffClassification,
    pub removed_fields: Vec<String>,
    pub added_fields: Vec<String>,
    pub changed_fields: Vec<String>,
    pub compile: CompileReport,
}

/// Classify what the next compile would do to the pack:
/// `breaking` iff any field is removed, `potentially_breaking` iff any field's
/// metadata changed, else `safe`.
pub fn rules_diff(helper_root: &Utf8Path, category: &str) -> Result<RulesDiffReport> {
    let category = normalize_category(category)?;
    let compile_report = compile(helper_root, &category, true)?;

    let category_root = crate::paths::category_root(helper_root, &category);
    let sources = load_category_sources(&category_root)?;
    let mut next: BTreeMap<String, FieldRule> = BTreeMap::new();
    for row in &sources.extract.fields {
        let rule = normalize_field_rule(row);
        next.entry(rule.field_key.clone()).or_insert(rule);
    }

    let previous = read_previous_fields(helper_root, &category);

    let removed_fields: Vec<String> = previous
        .keys()
        .filter(|k| !next.contains_key(*k))
        .cloned()
        .collect();
    let added_fields: Vec<String> = next
        .keys()
        .filter(|k| !previous.contains_key(*k))
        .cloned()
        .collect();
    let changed_fields: Vec<String> = next
        .iter()
        .filter(|(key, rule)| previous.get(*key).is_some_and(|old| old != *rule))
        .map(|(key, _)| key.clone())
        .collect();

    let classification = if !removed_fields.is_empty() {
        DiffClassification::Breaking
    } else if !changed_fields.is_empty() {
        DiffClassification::PotentiallyBreaking
    } else {
        DiffClassification::Safe
    };

    Ok(RulesDiffReport {
        classification,
        removed_fields,
        added_fields,
        changed_fields,
        compile: compile_report,
    })
}

fn read_previous_fields(helper_root: &Utf8Path, category: &str) -> BTreeMap<String, FieldRule> {
    let path = generated_dir(helper_root, category).join("field_rules.json");
    std::fs::read_to_string(path.as_std_path())
        .ok()
        .and_then(|raw| serde_json::from_str::<FieldRulesArtifact>(&raw).ok())
        .map(|a| a.fields)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    fn seeded(fields_json: &str) -> (TempDir, Utf8PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let source = root.join("mouse/_source");
        std::fs::create_dir_all(source.as_std_path()).unwrap();
        std::fs::write(
            source.join("workbook_fields.json").as_std_path(),
            fields_json,
        )
        .unwrap();
        (dir, root)
    }

    fn reseed(root: &Utf8Path, fields_json: &str) {
        std::fs::write(
            root.join("mouse/_source/workbook_fields.json").as_std_path(),
            fields_json,
        )
        .unwrap();
    }

    #[test]
    fn added_field_is_safe() {
        let (_dir, root) = seeded(r#"{"fields": [{"key": "weight"}]}"#);
        compile(&root, "mouse", false).unwrap();
        reseed(&root, r#"{"fields": [{"key": "weight"}, {"key": "dpi"}]}"#);

        let report = rules_diff(&root, "mouse").unwrap();
        assert_eq!(report.classification, DiffClassification::Safe);
        assert_eq!(report.added_fields, vec!["dpi"]);
    }

    #[test]
    fn changed_metadata_is_potentially_breaking() {
        let (_dir, root) = seeded(r#"{"fields": [{"key": "weight"}]}"#);
        compile(&root, "mouse", false).unwrap();
        reseed(
            &root,
            r#"{"fields": [{"key": "weight", "data_type": "number"}]}"#,
        );

        let report = rules_diff(&root, "mouse").unwrap();
        assert_eq!(report.classification, DiffClassification::PotentiallyBreaking);
        assert_eq!(report.changed_fields, vec!["weight"]);
    }

    #[test]
    fn removed_field_is_breaking() {
        let (_dir, root) = seeded(r#"{"fields": [{"key": "weight"}, {"key": "dpi"}]}"#);
        compile(&root, "mouse", false).unwrap();
        reseed(&root, r#"{"fields": [{"key": "weight"}]}"#);

        let report = rules_diff(&root, "mouse").unwrap();
        assert_eq!(report.classification, DiffClassification::Breaking);
        assert_eq!(report.removed_fields, vec!["dpi"]);
        assert!(report.compile.dry_run);
    }

    #[test]
    fn fresh_category_is_safe() {
        let (_dir, root) = seeded(r#"{"fields": [{"key": "weight"}]}"#);
        let report = rules_diff(&root, "mouse").unwrap();
        assert_eq!(report.classification, DiffClassification::Safe);
    }
}
