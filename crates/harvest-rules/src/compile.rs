//! Rule-pack compiler: deterministic build of `_generated/` from `_source/`.

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{info, warn};

use harvest_util::{file_sha256, semantic_sha256, to_canonical_json, write_file_atomic};

use crate::derive::{compile_all_templates, derive_field_groups, derive_cross_validation, normalize_known_values};
use crate::migrate::compute_key_migrations;
use crate::model::{
    ComponentDbFile, ComponentEntry, CrossValidationRules, FieldRule, FieldRulesArtifact,
    KeyMigrations, KnownValues, MANIFEST_FILE, Manifest, ManifestEntry, UiCatalogEntry,
    UiFieldCatalog,
};
use crate::normalize::normalize_field_rule;
use crate::paths::{generated_dir, normalize_category};
use crate::workbook::load_category_sources;

/// Outcome of a compile (or dry-run compile).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileReport {
    pub category: String,
    pub dry_run: bool,
    pub pack_version: String,
    pub artifact_count: usize,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
    pub warnings: Vec<String>,
}

impl CompileReport {
    /// True when the dry-run found no differences against the existing pack.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// Compile a category's rule pack.
///
/// In dry-run mode the artifacts are staged into a temp root, diffed against
/// the existing pack ignoring volatile keys, and nothing under `_generated/`
/// is touched. Otherwise every artifact is written canonically and the
/// manifest is regenerated last.
pub fn compile(helper_root: &Utf8Path, category: &str, dry_run: bool) -> Result<CompileReport> {
    let category = normalize_category(category)?;
    let (artifacts, mut warnings, pack_version) = synthesize(helper_root, &category)?;
    let out_dir = generated_dir(helper_root, &category);

    if dry_run {
        let staged = tempfile::tempdir().context("failed to create staging root")?;
        let staged_root = Utf8PathBuf::from_path_buf(staged.path().to_path_buf())
            .map_err(|p| anyhow::anyhow!("staging root is not UTF-8: {}", p.display()))?;
        for (rel_path, value) in &artifacts {
            write_artifact(&staged_root, rel_path, value)?;
        }
        let (added, removed, modified) = diff_against_pack(&out_dir, &artifacts)?;
        info!(
            category = %category,
            added = added.len(),
            removed = removed.len(),
            modified = modified.len(),
            "dry-run compile"
        );
        return Ok(CompileReport {
            category,
            dry_run: true,
            pack_version,
            artifact_count: artifacts.len(),
            added,
            removed,
            modified,
            warnings,
        });
    }

    let (added, removed, modified) = diff_against_pack(&out_dir, &artifacts)?;
    for (rel_path, value) in &artifacts {
        write_artifact(&out_dir, rel_path, value)?;
    }
    // Stale artifacts from prior compiles would otherwise poison the manifest.
    for rel_path in &removed {
        let path = out_dir.join(rel_path);
        if path.exists() {
            std::fs::remove_file(path.as_std_path())
                .with_context(|| format!("failed to remove stale artifact: {path}"))?;
        }
    }

    // Manifest is written last, after every other artifact is flushed.
    let manifest = build_manifest(&out_dir)?;
    let artifact_count = manifest.artifact_count;
    let manifest_value =
        serde_json::to_value(&manifest).context("failed to serialize manifest")?;
    write_artifact(&out_dir, MANIFEST_FILE, &manifest_value)?;

    if artifacts.len() != artifact_count {
        warn!(
            expected = artifacts.len(),
            actual = artifact_count,
            "manifest artifact count drifted from synthesized set"
        );
        warnings.push(format!(
            "manifest covers {artifact_count} artifacts, compiler produced {}",
            artifacts.len()
        ));
    }

    info!(category = %category, artifacts = artifact_count, version = %pack_version, "compiled rule pack");

    Ok(CompileReport {
        category,
        dry_run: false,
        pack_version,
        artifact_count,
        added,
        removed,
        modified,
        warnings,
    })
}

/// Recompute the manifest rows for the pack on disk (hashes over semantic
/// form, byte sizes from disk). Used by `validate` to detect drift.
pub fn build_manifest(out_dir: &Utf8Path) -> Result<Manifest> {
    let mut entries = Vec::new();
    for rel_path in list_pack_files(out_dir)? {
        let path = out_dir.join(&rel_path);
        let bytes = std::fs::read(path.as_std_path())
            .with_context(|| format!("failed to read artifact: {path}"))?;
        let sha256 = match serde_json::from_slice::<Value>(&bytes) {
            Ok(value) => semantic_sha256(&value)?,
            Err(_) => file_sha256(&bytes),
        };
        entries.push(ManifestEntry {
            path: rel_path,
            sha256,
            bytes: bytes.len() as u64,
        });
    }
    entries.sort_by(|a, b| a.path.cmp(&b.path));

    Ok(Manifest {
        algorithm: "sha256".to_string(),
        artifact_count: entries.len(),
        generated_at: timestamp(),
        artifacts: entries,
    })
}

/// All non-manifest artifact files under `_generated/`, as sorted relative
/// paths with forward slashes.
pub fn list_pack_files(out_dir: &Utf8Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    if !out_dir.exists() {
        return Ok(files);
    }
    collect_files(out_dir, out_dir, &mut files)?;
    files.retain(|f| f != MANIFEST_FILE);
    files.sort();
    Ok(files)
}

fn collect_files(root: &Utf8Path, dir: &Utf8Path, out: &mut Vec<String>) -> Result<()> {
    for entry in dir
        .read_dir_utf8()
        .with_context(|| format!("failed to read directory: {dir}"))?
    {
        let entry = entry.with_context(|| format!("failed to read entry in: {dir}"))?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, path, out)?;
        } else if path.extension() == Some("json") {
            let rel = path
                .strip_prefix(root)
                .map_err(|_| anyhow::anyhow!("artifact escapes pack root: {path}"))?;
            out.push(rel.as_str().replace('\\', "/"));
        }
    }
    Ok(())
}

fn synthesize(
    helper_root: &Utf8Path,
    category: &str,
) -> Result<(Vec<(String, Value)>, Vec<String>, String)> {
    let category_root = crate::paths::category_root(helper_root, category);
    let sources = load_category_sources(&category_root)?;
    let mut warnings = sources.warnings.clone();
    let now = timestamp();

    // Field rules, first-wins on duplicate normalized keys.
    let mut fields: BTreeMap<String, FieldRule> = BTreeMap::new();
    for row in &sources.extract.fields {
        let rule = normalize_field_rule(row);
        if fields.contains_key(&rule.field_key) {
            warnings.push(format!(
                "duplicate field key '{}' from workbook row '{}' ignored",
                rule.field_key, row.key
            ));
            continue;
        }
        fields.insert(rule.field_key.clone(), rule);
    }

    // UI catalog: seed rows keep their order, unseeded fields follow sorted.
    let mut catalog_entries: Vec<UiCatalogEntry> = Vec::new();
    for (index, row) in sources.seed.ui_field_catalog.iter().enumerate() {
        let key = crate::normalize::normalize_field_key(&row.key);
        let display = row
            .display_name
            .clone()
            .or_else(|| fields.get(&key).map(|r| r.display_name.clone()))
            .unwrap_or_else(|| key.clone());
        catalog_entries.push(UiCatalogEntry {
            key,
            display_name: display,
            group: row.group.clone(),
            section: row.section.clone(),
            order: row.order.unwrap_or(index as u32),
        });
    }
    let seeded: std::collections::BTreeSet<&str> =
        catalog_entries.iter().map(|e| e.key.as_str()).collect();
    let mut next_order = catalog_entries.len() as u32;
    let unseeded: Vec<&FieldRule> = fields
        .values()
        .filter(|r| !seeded.contains(r.field_key.as_str()))
        .collect();
    for rule in unseeded {
        catalog_entries.push(UiCatalogEntry {
            key: rule.field_key.clone(),
            display_name: rule.display_name.clone(),
            group: Some(rule.group.clone()),
            section: None,
            order: next_order,
        });
        next_order += 1;
    }

    let known_values = KnownValues {
        generated_at: now.clone(),
        enums: normalize_known_values(&sources.extract.enums),
    };

    // Previous pack state feeds the migrations document.
    let out_dir = generated_dir(helper_root, category);
    let previous_fields = read_artifact::<FieldRulesArtifact>(&out_dir, "field_rules.json")
        .map(|a| a.fields);
    let previous_known = read_artifact::<KnownValues>(&out_dir, "known_values.json");
    let previous_version = read_artifact::<KeyMigrations>(&out_dir, "key_migrations.json")
        .map_or_else(|| "0.0.0".to_string(), |m| m.version);

    let migrations = compute_key_migrations(
        previous_fields.as_ref(),
        &fields,
        previous_known.as_ref(),
        &known_values,
        &previous_version,
        &now,
    );
    let pack_version = migrations.version.clone();
    let templates = compile_all_templates(&fields, &sources.extract.template_library, &now);
    let cross_validation = CrossValidationRules {
        generated_at: now.clone(),
        rules: derive_cross_validation(&fields),
    };
    let groups = derive_field_groups(&fields, &catalog_entries, &now);

    let field_rules = FieldRulesArtifact {
        category: category.to_string(),
        generated_at: now.clone(),
        fields,
    };
    let catalog = UiFieldCatalog {
        generated_at: now.clone(),
        fields: catalog_entries,
    };

    let mut artifacts: Vec<(String, Value)> = vec![
        ("field_rules.json".into(), serde_json::to_value(&field_rules)?),
        ("ui_field_catalog.json".into(), serde_json::to_value(&catalog)?),
        ("known_values.json".into(), serde_json::to_value(&known_values)?),
        ("parse_templates.json".into(), serde_json::to_value(&templates)?),
        (
            "cross_validation_rules.json".into(),
            serde_json::to_value(&cross_validation)?,
        ),
        ("field_groups.json".into(), serde_json::to_value(&groups)?),
        ("key_migrations.json".into(), serde_json::to_value(&migrations)?),
    ];

    for (component_type, raw_entries) in &sources.extract.components {
        let mut entries: Vec<ComponentEntry> = raw_entries
            .iter()
            .map(|raw| ComponentEntry {
                canonical_name: raw.canonical_name.clone(),
                maker: raw
                    .maker
                    .clone()
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| "unknown".to_string()),
                aliases: raw.aliases.clone(),
                links: raw.links.clone(),
                properties: raw.properties.clone(),
            })
            .collect();
        entries.sort_by(|a, b| {
            a.canonical_name
                .cmp(&b.canonical_name)
                .then_with(|| a.maker.cmp(&b.maker))
        });
        let file = ComponentDbFile {
            component_type: component_type.clone(),
            generated_at: now.clone(),
            entries,
        };
        artifacts.push((
            format!("component_db/{component_type}.json"),
            serde_json::to_value(&file)?,
        ));
    }

    Ok((artifacts, warnings, pack_version))
}

fn diff_against_pack(
    out_dir: &Utf8Path,
    artifacts: &[(String, Value)],
) -> Result<(Vec<String>, Vec<String>, Vec<String>)> {
    let mut added = Vec::new();
    let mut modified = Vec::new();

    let new_paths: std::collections::BTreeSet<&str> =
        artifacts.iter().map(|(p, _)| p.as_str()).collect();

    for (rel_path, value) in artifacts {
        let on_disk = out_dir.join(rel_path);
        if !on_disk.exists() {
            added.push(rel_path.clone());
            continue;
        }
        let raw = std::fs::read_to_string(on_disk.as_std_path())
            .with_context(|| format!("failed to read existing artifact: {on_disk}"))?;
        let existing: Value = serde_json::from_str(&raw)
            .with_context(|| format!("existing artifact is not JSON: {on_disk}"))?;
        if semantic_sha256(&existing)? != semantic_sha256(value)? {
            modified.push(rel_path.clone());
        }
    }

    let removed = list_pack_files(out_dir)?
        .into_iter()
        .filter(|p| !new_paths.contains(p.as_str()))
        .collect();

    Ok((added, removed, modified))
}

fn write_artifact(out_dir: &Utf8Path, rel_path: &str, value: &Value) -> Result<()> {
    let path = out_dir.join(rel_path);
    let content = to_canonical_json(value)?;
    write_file_atomic(&path, &content)
}

fn read_artifact<T: serde::de::DeserializeOwned>(out_dir: &Utf8Path, rel_path: &str) -> Option<T> {
    let path = out_dir.join(rel_path);
    let raw = std::fs::read_to_string(path.as_std_path()).ok()?;
    serde_json::from_str(&raw).ok()
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn helper_root(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()
    }

    fn seed_category(root: &Utf8Path, category: &str) {
        let source = root.join(category).join("_source");
        std::fs::create_dir_all(source.as_std_path()).unwrap();
        std::fs::write(
            source.join("workbook_fields.json").as_std_path(),
            r#"{
                "fields": [
                    {"key": "Weight (g)", "data_type": "number", "required_level": "required",
                     "range": {"min": 20, "max": 250}},
                    {"key": "Sensor", "data_type": "enum", "required_level": "critical"},
                    {"key": "DPI", "data_type": "number", "required_level": "critical"}
                ],
                "enums": {"fields": {"sensor": ["HERO 25K"]}},
                "components": {
                    "sensor": [{"canonical_name": "HERO 25K", "maker": "Logitech",
                                "aliases": ["Hero25K"]}]
                }
            }"#,
        )
        .unwrap();
    }

    #[test]
    fn compile_writes_full_pack_with_manifest_last() {
        let dir = TempDir::new().unwrap();
        let root = helper_root(&dir);
        seed_category(&root, "mouse");

        let report = compile(&root, "mouse", false).unwrap();
        assert!(!report.dry_run);
        assert_eq!(report.pack_version, "0.1.0"); // three fields added

        let out = generated_dir(&root, "mouse");
        for name in crate::model::PACK_ARTIFACTS {
            assert!(out.join(name).exists(), "missing {name}");
        }
        assert!(out.join("component_db/sensor.json").exists());

        let manifest: Manifest = serde_json::from_str(
            &std::fs::read_to_string(out.join(MANIFEST_FILE).as_std_path()).unwrap(),
        )
        .unwrap();
        assert_eq!(manifest.algorithm, "sha256");
        assert_eq!(manifest.artifact_count, manifest.artifacts.len());
        assert_eq!(manifest.artifact_count, report.artifact_count);
        // manifest itself is never a manifest row
        assert!(!manifest.artifacts.iter().any(|a| a.path == MANIFEST_FILE));
    }

    #[test]
    fn recompile_same_inputs_is_semantically_stable() {
        let dir = TempDir::new().unwrap();
        let root = helper_root(&dir);
        seed_category(&root, "mouse");

        compile(&root, "mouse", false).unwrap();
        let first = build_manifest(&generated_dir(&root, "mouse")).unwrap();

        let report = compile(&root, "mouse", false).unwrap();
        // Only the migrations version counter changes shape; hashes must not.
        let second = build_manifest(&generated_dir(&root, "mouse")).unwrap();

        let first_map: BTreeMap<_, _> = first
            .artifacts
            .iter()
            .map(|a| (a.path.clone(), a.sha256.clone()))
            .collect();
        for row in &second.artifacts {
            if row.path == "key_migrations.json" {
                continue;
            }
            assert_eq!(
                first_map.get(&row.path),
                Some(&row.sha256),
                "hash drifted for {}",
                row.path
            );
        }
        assert!(report.modified.iter().all(|p| p == "key_migrations.json"));
    }

    #[test]
    fn dry_run_stages_without_writing() {
        let dir = TempDir::new().unwrap();
        let root = helper_root(&dir);
        seed_category(&root, "mouse");

        let report = compile(&root, "mouse", true).unwrap();
        assert!(report.dry_run);
        assert_eq!(report.added.len(), report.artifact_count);
        assert!(!generated_dir(&root, "mouse").exists());
    }

    #[test]
    fn dry_run_reports_modified_fields() {
        let dir = TempDir::new().unwrap();
        let root = helper_root(&dir);
        seed_category(&root, "mouse");
        compile(&root, "mouse", false).unwrap();

        // Change a field's range in the source workbook.
        let source = root.join("mouse/_source/workbook_fields.json");
        let raw = std::fs::read_to_string(source.as_std_path()).unwrap();
        std::fs::write(
            source.as_std_path(),
            raw.replace("\"max\": 250", "\"max\": 200"),
        )
        .unwrap();

        let report = compile(&root, "mouse", true).unwrap();
        assert!(report.modified.contains(&"field_rules.json".to_string()));
        assert!(
            report
                .modified
                .contains(&"cross_validation_rules.json".to_string())
        );
        assert!(report.added.is_empty());
    }

    #[test]
    fn missing_workbook_aborts_compile() {
        let dir = TempDir::new().unwrap();
        let root = helper_root(&dir);
        std::fs::create_dir_all(root.join("mouse/_source").as_std_path()).unwrap();
        assert!(compile(&root, "mouse", false).is_err());
    }

    #[test]
    fn duplicate_field_keys_warn_first_wins() {
        let dir = TempDir::new().unwrap();
        let root = helper_root(&dir);
        let source = root.join("mouse/_source");
        std::fs::create_dir_all(source.as_std_path()).unwrap();
        std::fs::write(
            source.join("workbook_fields.json").as_std_path(),
            r#"{"fields": [{"key": "Weight (g)"}, {"key": "weight  g"}]}"#,
        )
        .unwrap();

        let report = compile(&root, "mouse", false).unwrap();
        assert!(report.warnings.iter().any(|w| w.contains("duplicate")));
    }
}
