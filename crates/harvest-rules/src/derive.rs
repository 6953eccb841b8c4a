//! Derived-artifact synthesis: parse templates, cross-validation rules,
//! field groups, known values.

use std::collections::{BTreeMap, BTreeSet};

use crate::model::{
    CompiledTemplate, CrossValidationRule, EnumPolicy, FieldGroups, FieldRule, KnownValueSet,
    OnFail, ParseTemplates, TemplatePattern, UiCatalogEntry,
};
use crate::workbook::TemplateDef;

/// Build the compiled parse template for one field:
/// rule patterns ∪ library patterns (when `parse.template` names one) ∪ a
/// single-regex label fallback derived from the display name.
#[must_use]
pub fn compile_template(
    rule: &FieldRule,
    template_library: &BTreeMap<String, TemplateDef>,
) -> CompiledTemplate {
    let mut patterns: Vec<TemplatePattern> = Vec::new();
    let mut seen: BTreeSet<String> = BTreeSet::new();

    let mut push = |pattern: TemplatePattern, patterns: &mut Vec<TemplatePattern>| {
        if seen.insert(pattern.regex.clone()) {
            patterns.push(pattern);
        }
    };

    let parse = rule.parse.clone().unwrap_or_default();
    for p in &parse.patterns {
        push(p.clone(), &mut patterns);
    }

    if let Some(name) = &parse.template {
        if let Some(def) = template_library.get(name) {
            for p in &def.patterns {
                let mut p = p.clone();
                if p.unit.is_none() {
                    p.unit = def.unit.clone();
                }
                push(p, &mut patterns);
            }
        }
    }

    push(label_fallback_pattern(rule), &mut patterns);

    CompiledTemplate {
        patterns,
        context_keywords: parse.context_keywords,
        negative_keywords: parse.negative_keywords,
        unit: parse.unit,
        post_process: parse.post_process,
    }
}

/// Generic `<label> : <value>` fallback used when no curated pattern hits.
fn label_fallback_pattern(rule: &FieldRule) -> TemplatePattern {
    let label = regex::escape(&rule.display_name);
    let label = label.replace(r"\ ", r"\s+");
    TemplatePattern::from_regex(format!(r"(?i){label}\s*[:=]?\s*([\w.,\-/ ]+)"))
}

/// Build `parse_templates.json` for all fields, sorted by field key.
#[must_use]
pub fn compile_all_templates(
    fields: &BTreeMap<String, FieldRule>,
    template_library: &BTreeMap<String, TemplateDef>,
    generated_at: &str,
) -> ParseTemplates {
    let mut templates = BTreeMap::new();
    for (key, rule) in fields {
        templates.insert(key.clone(), compile_template(rule, template_library));
    }
    ParseTemplates {
        generated_at: generated_at.to_string(),
        templates,
    }
}

/// Synthesize cross-validation rules:
/// - one `range` rule per field with `contract.range` (on_fail
///   reject_candidate);
/// - curated category rules, emitted only when every field in the triggering
///   key set exists.
///
/// Rules are de-duplicated by `rule_id` and sorted for stable output.
#[must_use]
pub fn derive_cross_validation(fields: &BTreeMap<String, FieldRule>) -> Vec<CrossValidationRule> {
    let mut rules: Vec<CrossValidationRule> = Vec::new();

    for (key, rule) in fields {
        if let Some(range) = rule.contract.range {
            rules.push(CrossValidationRule {
                rule_id: format!("range_{key}"),
                rule_type: "range".to_string(),
                trigger_field: key.clone(),
                min: range.min,
                max: range.max,
                fields: Vec::new(),
                on_fail: OnFail::RejectCandidate,
            });
        }
    }

    let has = |key: &str| fields.contains_key(key);

    if has("connectivity") && has("battery_life_hours") {
        rules.push(CrossValidationRule {
            rule_id: "wireless_requires_battery".to_string(),
            rule_type: "dependency".to_string(),
            trigger_field: "connectivity".to_string(),
            min: None,
            max: None,
            fields: vec!["battery_life_hours".to_string()],
            on_fail: OnFail::FlagForReview,
        });
    }

    if has("sensor") && has("dpi") {
        rules.push(CrossValidationRule {
            rule_id: "sensor_dpi_consistency".to_string(),
            rule_type: "consistency".to_string(),
            trigger_field: "sensor".to_string(),
            min: None,
            max: None,
            fields: vec!["dpi".to_string()],
            on_fail: OnFail::FlagForReview,
        });
    }

    let dims = ["length_mm", "width_mm", "height_mm"];
    if dims.iter().all(|d| has(d)) {
        rules.push(CrossValidationRule {
            rule_id: "dimensions_triplet_complete".to_string(),
            rule_type: "completeness".to_string(),
            trigger_field: "length_mm".to_string(),
            min: None,
            max: None,
            fields: dims.iter().map(|s| (*s).to_string()).collect(),
            on_fail: OnFail::FlagForReview,
        });
    }

    let mut seen = BTreeSet::new();
    rules.retain(|r| seen.insert(r.rule_id.clone()));
    rules.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));
    rules
}

/// Group fields: UI catalog `group|section` first, else the rule's group,
/// default `general`. Group keys and members both sorted.
#[must_use]
pub fn derive_field_groups(
    fields: &BTreeMap<String, FieldRule>,
    catalog: &[UiCatalogEntry],
    generated_at: &str,
) -> FieldGroups {
    let catalog_groups: BTreeMap<&str, String> = catalog
        .iter()
        .filter_map(|entry| {
            entry
                .group
                .clone()
                .or_else(|| entry.section.clone())
                .map(|g| (entry.key.as_str(), g))
        })
        .collect();

    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, rule) in fields {
        let group = catalog_groups
            .get(key.as_str())
            .cloned()
            .unwrap_or_else(|| {
                if rule.group.trim().is_empty() {
                    "general".to_string()
                } else {
                    rule.group.clone()
                }
            });
        groups.entry(group).or_default().push(key.clone());
    }
    for members in groups.values_mut() {
        members.sort();
    }

    FieldGroups {
        generated_at: generated_at.to_string(),
        groups,
    }
}

/// Normalize the workbook's enum payload to the tagged form
/// `{field: {policy, values[]}}`. Accepts either
/// `{enums: {field: {policy, values}}}` or `{fields: {field: [values]}}`.
/// The polymorphism stops here.
#[must_use]
pub fn normalize_known_values(raw: &serde_json::Value) -> BTreeMap<String, KnownValueSet> {
    let mut out = BTreeMap::new();

    if let Some(enums) = raw.get("enums").and_then(|v| v.as_object()) {
        for (field, entry) in enums {
            let policy = entry
                .get("policy")
                .and_then(|p| serde_json::from_value::<EnumPolicy>(p.clone()).ok())
                .unwrap_or_default();
            let values = entry
                .get("values")
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            out.insert(field.clone(), KnownValueSet { policy, values });
        }
        return out;
    }

    if let Some(fields) = raw.get("fields").and_then(|v| v.as_object()) {
        for (field, values) in fields {
            let values = values
                .as_array()
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            out.insert(
                field.clone(),
                KnownValueSet {
                    policy: EnumPolicy::Open,
                    values,
                },
            );
        }
    }

    out
}
