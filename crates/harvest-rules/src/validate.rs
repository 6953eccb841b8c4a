//! Rule-pack validation: files, metadata, schemas, manifest recomputation.

use anyhow::{Context, Result};
use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::compile::{build_manifest, list_pack_files};
use crate::migrate::check_migrations;
use crate::model::{
    CrossValidationRules, FieldRulesArtifact, KeyMigrations, MANIFEST_FILE, Manifest,
    PACK_ARTIFACTS,
};
use crate::paths::{component_db_dir, generated_dir, normalize_category};
use crate::schema::validate_against_schema;

/// Outcome of `validate`: errors fail the operation, warnings do not.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub category: String,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate a compiled pack:
/// required files exist, component_db non-empty (warn only), complete field
/// metadata, well-formed key migrations, every artifact matches its schema,
/// and manifest hashes match recomputation.
pub fn validate(helper_root: &Utf8Path, category: &str) -> Result<ValidationReport> {
    let category = normalize_category(category)?;
    let out_dir = generated_dir(helper_root, &category);
    let mut report = ValidationReport {
        category: category.clone(),
        ..ValidationReport::default()
    };

    for name in PACK_ARTIFACTS.iter().chain(std::iter::once(&MANIFEST_FILE)) {
        if !out_dir.join(name).exists() {
            report.errors.push(format!("missing required artifact: {name}"));
        }
    }
    if !report.errors.is_empty() {
        return Ok(report);
    }

    let db_dir = component_db_dir(helper_root, &category);
    let db_count = db_dir
        .read_dir_utf8()
        .map(|entries| entries.filter_map(Result::ok).count())
        .unwrap_or(0);
    if db_count == 0 {
        report
            .warnings
            .push("component_db is empty; component-backed fields will not resolve".to_string());
    }

    // Schema pass over every artifact, manifest included.
    for rel_path in list_pack_files(&out_dir)?
        .into_iter()
        .chain(std::iter::once(MANIFEST_FILE.to_string()))
    {
        let path = out_dir.join(&rel_path);
        let raw = std::fs::read_to_string(path.as_std_path())
            .with_context(|| format!("failed to read artifact: {path}"))?;
        let value: Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(err) => {
                report
                    .errors
                    .push(format!("artifact is not valid JSON: {rel_path}: {err}"));
                continue;
            }
        };
        for problem in validate_against_schema(helper_root, &rel_path, &value)? {
            report
                .errors
                .push(format!("schema validation failed: {rel_path}{problem}"));
        }
    }

    check_field_metadata(&out_dir, &mut report);
    check_key_migration_rows(&out_dir, &mut report);
    check_range_rule_pairing(&out_dir, &mut report);
    check_manifest(&out_dir, &mut report)?;

    debug!(
        category = %category,
        errors = report.errors.len(),
        warnings = report.warnings.len(),
        "validated rule pack"
    );
    Ok(report)
}

fn check_field_metadata(out_dir: &Utf8Path, report: &mut ValidationReport) {
    let Some(artifact) = read::<FieldRulesArtifact>(out_dir, "field_rules.json") else {
        report
            .errors
            .push("field_rules.json does not deserialize".to_string());
        return;
    };

    for (key, rule) in &artifact.fields {
        if rule.field_key != *key {
            report
                .errors
                .push(format!("field '{key}' carries mismatched field_key '{}'", rule.field_key));
        }
        if rule.display_name.trim().is_empty() {
            report.errors.push(format!("field '{key}' has empty display_name"));
        }
        if rule.unknown_reason_default.trim().is_empty() {
            report
                .errors
                .push(format!("field '{key}' has empty unknown_reason_default"));
        }
        if !(1..=10).contains(&rule.effort) {
            report
                .errors
                .push(format!("field '{key}' effort {} outside [1,10]", rule.effort));
        }
    }
}

fn check_key_migration_rows(out_dir: &Utf8Path, report: &mut ValidationReport) {
    let Some(doc) = read::<KeyMigrations>(out_dir, "key_migrations.json") else {
        report
            .errors
            .push("key_migrations.json does not deserialize".to_string());
        return;
    };
    for problem in check_migrations(&doc) {
        report.errors.push(format!("key migration: {problem}"));
    }
}

/// Invariant: every field with a range has a matching `range` rule.
fn check_range_rule_pairing(out_dir: &Utf8Path, report: &mut ValidationReport) {
    let fields = read::<FieldRulesArtifact>(out_dir, "field_rules.json");
    let rules = read::<CrossValidationRules>(out_dir, "cross_validation_rules.json");
    let (Some(fields), Some(rules)) = (fields, rules) else {
        return;
    };

    for (key, rule) in &fields.fields {
        let Some(range) = rule.contract.range else {
            continue;
        };
        let paired = rules.rules.iter().any(|r| {
            r.rule_type == "range"
                && r.trigger_field == *key
                && r.min == range.min
                && r.max == range.max
        });
        if !paired {
            report.errors.push(format!(
                "field '{key}' has contract.range but no matching range cross-validation rule"
            ));
        }
    }
}

fn check_manifest(out_dir: &Utf8Path, report: &mut ValidationReport) -> Result<()> {
    let Some(stored) = read::<Manifest>(out_dir, MANIFEST_FILE) else {
        report.errors.push("manifest.json does not deserialize".to_string());
        return Ok(());
    };

    let recomputed = build_manifest(out_dir)?;
    if stored.artifact_count != recomputed.artifact_count {
        report.errors.push(format!(
            "manifest validation failed: artifact_count {} != {} on disk",
            stored.artifact_count, recomputed.artifact_count
        ));
    }

    let stored_rows: std::collections::BTreeMap<&str, &str> = stored
        .artifacts
        .iter()
        .map(|a| (a.path.as_str(), a.sha256.as_str()))
        .collect();

    for row in &recomputed.artifacts {
        match stored_rows.get(row.path.as_str()) {
            Some(stored_hash) if *stored_hash == row.sha256 => {}
            Some(_) | None => report
                .errors
                .push(format!("manifest validation failed: {}", row.path)),
        }
    }
    for row in &stored.artifacts {
        if !recomputed.artifacts.iter().any(|r| r.path == row.path) {
            report.errors.push(format!(
                "manifest validation failed: {} listed but missing on disk",
                row.path
            ));
        }
    }
    Ok(())
}

fn read<T: serde::de::DeserializeOwned>(out_dir: &Utf8Path, rel_path: &str) -> Option<T> {
    let raw = std::fs::read_to_string(out_dir.join(rel_path).as_std_path()).ok()?;
    serde_json::from_str(&raw).ok()
}
