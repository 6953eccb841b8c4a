//! Key-migrations document: computed on compile, applied to legacy records.

use std::collections::{BTreeMap, BTreeSet};

use crate::model::{Bump, FieldRule, KeyMigrations, KnownValues, Migration};

/// Compare the previous and next field maps (and their known-value sets) and
/// produce the migrations document.
///
/// Bump policy: `major` if any field was removed or had a breaking contract
/// change (data type, output shape, or enum policy), `minor` if fields were
/// only added, else `patch`.
#[must_use]
pub fn compute_key_migrations(
    previous: Option<&BTreeMap<String, FieldRule>>,
    next: &BTreeMap<String, FieldRule>,
    previous_known: Option<&KnownValues>,
    next_known: &KnownValues,
    previous_version: &str,
    generated_at: &str,
) -> KeyMigrations {
    let empty = BTreeMap::new();
    let prev = previous.unwrap_or(&empty);

    let prev_keys: BTreeSet<&String> = prev.keys().collect();
    let next_keys: BTreeSet<&String> = next.keys().collect();

    let removed: Vec<&String> = prev_keys.difference(&next_keys).copied().collect();
    let added: Vec<&String> = next_keys.difference(&prev_keys).copied().collect();

    let mut migrations = Vec::new();
    let mut key_map = BTreeMap::new();

    // A removed key whose display name survives under a new key is a rename;
    // anything else removed is a deprecation.
    for old_key in &removed {
        let old_display = prev[*old_key].display_name.to_ascii_lowercase();
        let renamed_to = added.iter().find(|new_key| {
            next[**new_key].display_name.to_ascii_lowercase() == old_display
        });
        match renamed_to {
            Some(new_key) => {
                migrations.push(Migration::Rename {
                    from: (*old_key).clone(),
                    to: (**new_key).clone(),
                });
                key_map.insert((*old_key).clone(), (**new_key).clone());
            }
            None => migrations.push(Migration::Deprecate {
                field: (*old_key).clone(),
                reason: "removed from workbook".to_string(),
            }),
        }
    }

    let contract_change = next.iter().any(|(key, rule)| {
        prev.get(key).is_some_and(|old| {
            old.data_type != rule.data_type || old.output_shape != rule.output_shape
        })
    });
    // An enum flipping between open and closed changes what consensus may
    // accept, so it is a contract break even with type and shape unchanged.
    let policy_change = previous_known.is_some_and(|prev_known| {
        next_known.enums.iter().any(|(field, set)| {
            prev_known
                .enums
                .get(field)
                .is_some_and(|old| old.policy != set.policy)
        })
    });
    let breaking_change = contract_change || policy_change;

    let bump = if !removed.is_empty() || breaking_change {
        Bump::Major
    } else if !added.is_empty() {
        Bump::Minor
    } else {
        Bump::Patch
    };

    let version = bump_version(previous_version, bump);
    let summary = format!(
        "{} added, {} removed, {} renamed",
        added.len(),
        removed.len(),
        key_map.len()
    );

    KeyMigrations {
        version,
        previous_version: previous_version.to_string(),
        bump,
        summary,
        migrations,
        key_map,
        generated_at: generated_at.to_string(),
    }
}

/// Apply the key map to a record's keys.
///
/// Processing is input-order, each key mapped at most once, and keys that are
/// themselves rename *targets* are never re-mapped. The last rule is what
/// makes the operation idempotent and safe under `A→B, B→A` cycles: a key
/// produced by a rename stays put on every subsequent application.
#[must_use]
pub fn apply_key_migrations(
    record: &BTreeMap<String, serde_json::Value>,
    migrations: &KeyMigrations,
) -> BTreeMap<String, serde_json::Value> {
    let targets: BTreeSet<&String> = migrations.key_map.values().collect();
    let mut out = BTreeMap::new();
    let mut visited: BTreeSet<String> = BTreeSet::new();

    for (key, value) in record {
        let mapped = match migrations.key_map.get(key) {
            Some(target) if !targets.contains(key) && !visited.contains(key) => {
                visited.insert(target.clone());
                target.clone()
            }
            _ => key.clone(),
        };
        // First writer wins when a rename collides with an existing key.
        out.entry(mapped).or_insert_with(|| value.clone());
    }

    out
}

/// Parse `major.minor.patch` and apply the bump. Malformed previous versions
/// restart at the bump's floor.
#[must_use]
pub fn bump_version(previous: &str, bump: Bump) -> String {
    let mut parts = previous.split('.').map(|p| p.parse::<u64>().ok());
    let (major, minor, patch) = match (parts.next(), parts.next(), parts.next()) {
        (Some(Some(a)), Some(Some(b)), Some(Some(c))) => (a, b, c),
        _ => (0, 0, 0),
    };
    match bump {
        Bump::Major => format!("{}.0.0", major + 1),
        Bump::Minor => format!("{major}.{}.0", minor + 1),
        Bump::Patch => format!("{major}.{minor}.{}", patch + 1),
    }
}

/// Check one migrations document for well-formedness. Returns the list of
/// problems; empty means valid.
#[must_use]
pub fn check_migrations(doc: &KeyMigrations) -> Vec<String> {
    let mut problems = Vec::new();

    for version in [&doc.version, &doc.previous_version] {
        let ok = version.split('.').count() == 3
            && version.split('.').all(|p| p.parse::<u64>().is_ok());
        if !ok {
            problems.push(format!("malformed semver: '{version}'"));
        }
    }

    for row in &doc.migrations {
        match row {
            Migration::Rename { from, to } if from == to => {
                problems.push(format!("rename maps '{from}' to itself"));
            }
            Migration::Merge { from, .. } if from.is_empty() => {
                problems.push("merge with empty source list".to_string());
            }
            Migration::Split { to, .. } if to.is_empty() => {
                problems.push("split with empty target list".to_string());
            }
            _ => {}
        }
    }

    for (from, to) in &doc.key_map {
        if from == to {
            problems.push(format!("key_map maps '{from}' to itself"));
        }
    }

    problems
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EnumPolicy, KnownValueSet};
    use crate::normalize::normalize_field_rule;
    use crate::workbook::RawFieldRow;
    use serde_json::json;

    fn rule(key: &str, display: &str) -> FieldRule {
        let mut r = normalize_field_rule(&RawFieldRow {
            key: key.into(),
            ..RawFieldRow::default()
        });
        r.display_name = display.to_string();
        r
    }

    fn field_map(entries: &[(&str, &str)]) -> BTreeMap<String, FieldRule> {
        entries
            .iter()
            .map(|(k, d)| ((*k).to_string(), rule(k, d)))
            .collect()
    }

    fn known(entries: &[(&str, EnumPolicy)]) -> KnownValues {
        KnownValues {
            generated_at: "t".into(),
            enums: entries
                .iter()
                .map(|(field, policy)| {
                    (
                        (*field).to_string(),
                        KnownValueSet {
                            policy: *policy,
                            values: vec!["a".to_string()],
                        },
                    )
                })
                .collect(),
        }
    }

    fn no_enums() -> KnownValues {
        known(&[])
    }

    #[test]
    fn added_fields_bump_minor() {
        let prev = field_map(&[("weight", "Weight")]);
        let next = field_map(&[("weight", "Weight"), ("dpi", "DPI")]);
        let doc =
            compute_key_migrations(Some(&prev), &next, None, &no_enums(), "1.2.3", "t");
        assert_eq!(doc.bump, Bump::Minor);
        assert_eq!(doc.version, "1.3.0");
    }

    #[test]
    fn removed_field_bumps_major_and_deprecates() {
        let prev = field_map(&[("weight", "Weight"), ("dpi", "DPI")]);
        let next = field_map(&[("weight", "Weight")]);
        let doc =
            compute_key_migrations(Some(&prev), &next, None, &no_enums(), "1.2.3", "t");
        assert_eq!(doc.bump, Bump::Major);
        assert_eq!(doc.version, "2.0.0");
        assert!(matches!(&doc.migrations[0], Migration::Deprecate { field, .. } if field == "dpi"));
    }

    #[test]
    fn same_display_name_is_a_rename() {
        let prev = field_map(&[("dpi_max", "DPI")]);
        let next = field_map(&[("dpi", "DPI")]);
        let doc =
            compute_key_migrations(Some(&prev), &next, None, &no_enums(), "1.0.0", "t");
        assert_eq!(doc.key_map.get("dpi_max"), Some(&"dpi".to_string()));
        assert!(
            doc.migrations
                .iter()
                .any(|m| matches!(m, Migration::Rename { from, to } if from == "dpi_max" && to == "dpi"))
        );
    }

    #[test]
    fn type_change_is_breaking() {
        let prev = field_map(&[("weight", "Weight")]);
        let mut next = field_map(&[("weight", "Weight")]);
        next.get_mut("weight").unwrap().data_type = crate::model::DataType::Number;
        let doc =
            compute_key_migrations(Some(&prev), &next, None, &no_enums(), "1.0.0", "t");
        assert_eq!(doc.bump, Bump::Major);
    }

    #[test]
    fn closed_to_open_policy_change_bumps_major() {
        // Type and shape held constant; only the enum policy flips.
        let fields = field_map(&[("sensor", "Sensor")]);
        let prev_known = known(&[("sensor", EnumPolicy::Closed)]);
        let next_known = known(&[("sensor", EnumPolicy::Open)]);

        let doc = compute_key_migrations(
            Some(&fields),
            &fields.clone(),
            Some(&prev_known),
            &next_known,
            "1.0.0",
            "t",
        );
        assert_eq!(doc.bump, Bump::Major);
        assert_eq!(doc.version, "2.0.0");

        // Unchanged policy stays a patch.
        let doc = compute_key_migrations(
            Some(&fields),
            &fields.clone(),
            Some(&next_known),
            &next_known.clone(),
            "1.0.0",
            "t",
        );
        assert_eq!(doc.bump, Bump::Patch);
    }

    #[test]
    fn no_change_is_patch() {
        let prev = field_map(&[("weight", "Weight")]);
        let doc = compute_key_migrations(
            Some(&prev),
            &prev.clone(),
            None,
            &no_enums(),
            "1.0.0",
            "t",
        );
        assert_eq!(doc.bump, Bump::Patch);
        assert_eq!(doc.version, "1.0.1");
    }

    fn doc_with_map(pairs: &[(&str, &str)]) -> KeyMigrations {
        KeyMigrations {
            version: "1.0.0".into(),
            previous_version: "0.1.0".into(),
            bump: Bump::Major,
            summary: String::new(),
            migrations: Vec::new(),
            key_map: pairs
                .iter()
                .map(|(a, b)| ((*a).to_string(), (*b).to_string()))
                .collect(),
            generated_at: "t".into(),
        }
    }

    #[test]
    fn apply_is_idempotent() {
        let doc = doc_with_map(&[("dpi_max", "dpi")]);
        let record: BTreeMap<String, serde_json::Value> =
            [("dpi_max".to_string(), json!(25600))].into();

        let once = apply_key_migrations(&record, &doc);
        assert!(once.contains_key("dpi"));
        let twice = apply_key_migrations(&once, &doc);
        assert_eq!(once, twice);
    }

    #[test]
    fn rename_cycle_does_not_oscillate() {
        let doc = doc_with_map(&[("a", "b"), ("b", "a")]);
        let record: BTreeMap<String, serde_json::Value> = [("a".to_string(), json!(1))].into();

        // Both keys are rename targets, so the cycle leaves keys untouched
        // and repeated application is stable.
        let once = apply_key_migrations(&record, &doc);
        let twice = apply_key_migrations(&once, &doc);
        assert_eq!(once, twice);
    }

    #[test]
    fn collision_keeps_first_writer() {
        let doc = doc_with_map(&[("old_weight", "weight")]);
        let record: BTreeMap<String, serde_json::Value> = [
            ("old_weight".to_string(), json!(63)),
            ("weight".to_string(), json!(64)),
        ]
        .into();

        let out = apply_key_migrations(&record, &doc);
        assert_eq!(out.len(), 1);
        assert_eq!(out["weight"], json!(63));
    }

    #[test]
    fn malformed_docs_are_reported() {
        let mut doc = doc_with_map(&[("a", "a")]);
        doc.version = "not-semver".into();
        let problems = check_migrations(&doc);
        assert_eq!(problems.len(), 2);
    }
}
