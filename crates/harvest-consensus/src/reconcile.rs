//! Per-field reconciliation: normalize, group, vote, and attach provenance.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use harvest_extract::{Candidate, Method, parse_leading_number};
use harvest_plan::{Source, Tier};
use harvest_rules::RulePack;
use harvest_rules::model::{
    DataType, EnumPolicy, FieldRule, OnFail, OutputShape, RequiredLevel, SelectionPolicy,
};

use crate::confidence::{ConfidenceInputs, field_confidence};
use crate::job::Job;

/// Pass targets; the critical target is configurable via the category schema.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConsensusConfig {
    pub default_pass_target: u32,
    pub critical_pass_target: u32,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            default_pass_target: 1,
            critical_pass_target: 2,
        }
    }
}

/// One evidence row attached to an accepted value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceRow {
    pub tier: Tier,
    pub tier_name: String,
    pub method: Method,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
}

/// Per-field provenance. `value == "unk"` when no value was accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldProvenance {
    pub value: String,
    pub confirmations: u32,
    pub approved_confirmations: u32,
    pub pass_target: u32,
    pub meets_pass_target: bool,
    pub confidence: f64,
    pub evidence: Vec<EvidenceRow>,
}

/// Sentinel for "no accepted value".
pub const UNK: &str = "unk";

/// Enum value not found in `known_values`, surfaced for curation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewValueRow {
    pub field: String,
    pub value: String,
}

/// Consensus output for one round.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub fields: BTreeMap<String, FieldProvenance>,
    pub candidates_by_field: BTreeMap<String, Vec<Candidate>>,
    pub fields_below_pass_target: Vec<String>,
    pub critical_fields_below_pass_target: Vec<String>,
    pub missing_required_fields: Vec<String>,
    pub new_values_proposed: Vec<NewValueRow>,
    pub contradictions: Vec<String>,
    pub field_reasoning: BTreeMap<String, Vec<String>>,
}

/// Reconcile all candidates into per-field values.
///
/// Locked fields (identity and anchors) never enter the input set. Range
/// rules with `reject_candidate` drop offending candidates before grouping.
/// The winner per field is the group with the most approved confirmations;
/// ties break by total confirmations, then best method priority, then lowest
/// source index. Reconciliation is stable under candidate permutation.
#[must_use]
pub fn reconcile(
    candidates: &[Candidate],
    sources: &[Source],
    pack: &RulePack,
    job: &Job,
    config: &ConsensusConfig,
    identity_confidence: f64,
) -> ConsensusResult {
    let mut result = ConsensusResult::default();
    let locked = job.locked_fields();

    // Range rules that reject candidates outright.
    let reject_ranges: BTreeMap<&str, (Option<f64>, Option<f64>)> = pack
        .cross_validation
        .rules
        .iter()
        .filter(|r| r.rule_type == "range" && r.on_fail == OnFail::RejectCandidate)
        .map(|r| (r.trigger_field.as_str(), (r.min, r.max)))
        .collect();

    let mut by_field: BTreeMap<String, Vec<Candidate>> = BTreeMap::new();
    for candidate in candidates {
        if locked.contains(&candidate.field) {
            push_reason(
                &mut result.field_reasoning,
                &candidate.field,
                "candidate dropped: field is locked".to_string(),
            );
            continue;
        }
        if let Some((min, max)) = reject_ranges.get(candidate.field.as_str()) {
            if let Some(number) = parse_leading_number(&candidate.value) {
                let in_range =
                    min.is_none_or(|m| number >= m) && max.is_none_or(|m| number <= m);
                if !in_range {
                    push_reason(
                        &mut result.field_reasoning,
                        &candidate.field,
                        format!("candidate '{}' rejected by range rule", candidate.value),
                    );
                    continue;
                }
            }
        }
        by_field
            .entry(candidate.field.clone())
            .or_default()
            .push(candidate.clone());
    }

    for (field, field_candidates) in by_field {
        let rule = pack.field_rules.fields.get(&field);
        let pass_target = pass_target_for(rule, config);

        let provenance = if rule.is_some_and(|r| r.output_shape == OutputShape::List) {
            reconcile_list(&field_candidates, sources, pass_target, identity_confidence)
        } else {
            reconcile_scalar(
                &field,
                &field_candidates,
                sources,
                pack,
                rule,
                pass_target,
                identity_confidence,
                &mut result,
            )
        };

        result
            .candidates_by_field
            .insert(field.clone(), field_candidates);
        result.fields.insert(field, provenance);
    }

    // Fields defined by the pack but absent from every source still surface.
    for (field, rule) in &pack.field_rules.fields {
        if locked.contains(field) || result.fields.contains_key(field) {
            continue;
        }
        result.fields.insert(
            field.clone(),
            FieldProvenance {
                value: UNK.to_string(),
                confirmations: 0,
                approved_confirmations: 0,
                pass_target: pass_target_for(Some(rule), config),
                meets_pass_target: false,
                confidence: 0.0,
                evidence: Vec::new(),
            },
        );
    }

    classify_shortfalls(pack, job, &mut result);
    evaluate_flag_rules(pack, &mut result);

    debug!(
        fields = result.fields.len(),
        missing = result.missing_required_fields.len(),
        "reconciled candidates"
    );
    result
}

fn pass_target_for(rule: Option<&FieldRule>, config: &ConsensusConfig) -> u32 {
    match rule.map(|r| r.required_level) {
        Some(RequiredLevel::Critical) => config.critical_pass_target,
        _ => config.default_pass_target,
    }
}

struct Group {
    display_value: String,
    source_indexes: BTreeSet<usize>,
    approved_indexes: BTreeSet<usize>,
    best_method: u8,
    min_source_index: usize,
    candidates: Vec<Candidate>,
}

#[allow(clippy::too_many_arguments)]
fn reconcile_scalar(
    field: &str,
    candidates: &[Candidate],
    sources: &[Source],
    pack: &RulePack,
    rule: Option<&FieldRule>,
    pass_target: u32,
    identity_confidence: f64,
    result: &mut ConsensusResult,
) -> FieldProvenance {
    let mut groups: BTreeMap<String, Group> = BTreeMap::new();

    for candidate in candidates {
        let normalized = group_key(&candidate.value, field, pack, rule);
        let display = display_value(&candidate.value, field, pack, rule);
        let approved = sources
            .get(candidate.source_index)
            .is_some_and(|s| s.approved_domain);

        let group = groups.entry(normalized).or_insert_with(|| Group {
            display_value: display,
            source_indexes: BTreeSet::new(),
            approved_indexes: BTreeSet::new(),
            best_method: 0,
            min_source_index: usize::MAX,
            candidates: Vec::new(),
        });
        group.source_indexes.insert(candidate.source_index);
        if approved {
            group.approved_indexes.insert(candidate.source_index);
        }
        group.best_method = group.best_method.max(candidate.method.priority());
        group.min_source_index = group.min_source_index.min(candidate.source_index);
        group.candidates.push(candidate.clone());
    }

    // Enum curation: normalized values outside known_values propose new
    // rows; under a closed policy they are also excluded from voting.
    if let Some(known) = pack.known_values.enums.get(field) {
        let mut unknown_keys: Vec<String> = Vec::new();
        for (key, group) in &groups {
            let is_known = known.values.iter().any(|v| {
                group_key(v, field, pack, rule) == group_key(&group.display_value, field, pack, rule)
            });
            if !is_known {
                let row = NewValueRow {
                    field: field.to_string(),
                    value: group.display_value.clone(),
                };
                if !result.new_values_proposed.contains(&row) {
                    result.new_values_proposed.push(row);
                }
                unknown_keys.push(key.clone());
            }
        }
        if known.policy == EnumPolicy::Closed {
            for key in unknown_keys {
                push_reason(
                    &mut result.field_reasoning,
                    field,
                    format!("value '{}' rejected by closed enum policy", groups[&key].display_value),
                );
                groups.remove(&key);
            }
        }
    }

    let prefer_tier = rule.is_some_and(|r| r.selection_policy == SelectionPolicy::PreferTier);
    let best_tier_of = |group: &Group| {
        group
            .source_indexes
            .iter()
            .filter_map(|&i| sources.get(i))
            .map(|s| s.tier.rank())
            .max()
            .unwrap_or(0)
    };

    let winner = groups.values().max_by(|a, b| {
        let lhs = (
            a.approved_indexes.len(),
            a.source_indexes.len(),
            if prefer_tier { best_tier_of(a) } else { 0 },
            a.best_method,
            std::cmp::Reverse(a.min_source_index),
        );
        let rhs = (
            b.approved_indexes.len(),
            b.source_indexes.len(),
            if prefer_tier { best_tier_of(b) } else { 0 },
            b.best_method,
            std::cmp::Reverse(b.min_source_index),
        );
        lhs.cmp(&rhs)
    });

    let Some(winner) = winner else {
        return FieldProvenance {
            value: UNK.to_string(),
            confirmations: 0,
            approved_confirmations: 0,
            pass_target,
            meets_pass_target: false,
            confidence: 0.0,
            evidence: Vec::new(),
        };
    };

    let approved_confirmations = winner.approved_indexes.len() as u32;
    let confirmations = winner.source_indexes.len() as u32;
    let meets = approved_confirmations >= pass_target;

    let disagreements: u32 = groups
        .values()
        .filter(|g| !std::ptr::eq(*g, winner))
        .map(|g| g.source_indexes.len() as u32)
        .sum();

    let evidence = evidence_rows(winner, sources);
    let best_tier = evidence.first().map(|row| row.tier);

    let confidence = if meets {
        field_confidence(&ConfidenceInputs {
            identity_confidence,
            approved_confirmations,
            disagreements,
            best_tier,
            anchor_conflicts: 0.0,
        })
    } else {
        0.0
    };

    FieldProvenance {
        value: if meets {
            winner.display_value.clone()
        } else {
            UNK.to_string()
        },
        confirmations,
        approved_confirmations,
        pass_target,
        meets_pass_target: meets,
        confidence,
        evidence: if meets { evidence } else { Vec::new() },
    }
}

/// List-shape fields union distinct normalized values across sources.
fn reconcile_list(
    candidates: &[Candidate],
    sources: &[Source],
    pass_target: u32,
    identity_confidence: f64,
) -> FieldProvenance {
    let mut seen = BTreeSet::new();
    let mut values = Vec::new();
    let mut source_indexes = BTreeSet::new();
    let mut approved_indexes = BTreeSet::new();

    for candidate in candidates {
        source_indexes.insert(candidate.source_index);
        if sources
            .get(candidate.source_index)
            .is_some_and(|s| s.approved_domain)
        {
            approved_indexes.insert(candidate.source_index);
        }
        let token = candidate.value.trim().to_ascii_lowercase();
        if seen.insert(token) {
            values.push(candidate.value.trim().to_string());
        }
    }

    let approved_confirmations = approved_indexes.len() as u32;
    let meets = approved_confirmations >= pass_target;

    // Best evidence row per distinct source.
    let pseudo_group = Group {
        display_value: values.join(", "),
        source_indexes,
        approved_indexes,
        best_method: candidates.iter().map(|c| c.method.priority()).max().unwrap_or(0),
        min_source_index: candidates
            .iter()
            .map(|c| c.source_index)
            .min()
            .unwrap_or(0),
        candidates: candidates.to_vec(),
    };
    let evidence = evidence_rows(&pseudo_group, sources);
    let best_tier = evidence.first().map(|row| row.tier);

    FieldProvenance {
        value: if meets && !values.is_empty() {
            values.join(", ")
        } else {
            UNK.to_string()
        },
        confirmations: pseudo_group.source_indexes.len() as u32,
        approved_confirmations,
        pass_target,
        meets_pass_target: meets,
        confidence: if meets {
            field_confidence(&ConfidenceInputs {
                identity_confidence,
                approved_confirmations,
                disagreements: 0,
                best_tier,
                anchor_conflicts: 0.0,
            })
        } else {
            0.0
        },
        evidence: if meets { evidence } else { Vec::new() },
    }
}

/// Best candidate per distinct source, ordered tier-first then method.
fn evidence_rows(group: &Group, sources: &[Source]) -> Vec<EvidenceRow> {
    let mut best_per_source: BTreeMap<usize, &Candidate> = BTreeMap::new();
    for candidate in &group.candidates {
        match best_per_source.get(&candidate.source_index) {
            Some(existing) if existing.method.priority() >= candidate.method.priority() => {}
            _ => {
                best_per_source.insert(candidate.source_index, candidate);
            }
        }
    }

    let mut rows: Vec<(u8, u8, usize, EvidenceRow)> = best_per_source
        .into_iter()
        .filter_map(|(index, candidate)| {
            let source = sources.get(index)?;
            Some((
                source.tier.rank(),
                candidate.method.priority(),
                index,
                EvidenceRow {
                    tier: source.tier,
                    tier_name: source.tier.name().to_string(),
                    method: candidate.method,
                    url: source.url.clone(),
                    quote: candidate.quote.clone(),
                },
            ))
        })
        .collect();
    rows.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)).then(a.2.cmp(&b.2)));
    rows.into_iter().map(|(_, _, _, row)| row).collect()
}

/// Grouping key for equivalence classes. Enum values that resolve in the
/// component library group under the canonical name, so aliases and spelling
/// variants vote together.
fn group_key(value: &str, field: &str, pack: &RulePack, rule: Option<&FieldRule>) -> String {
    if rule.is_some_and(|r| r.data_type == DataType::Enum) {
        if let Some(component) = pack.components.resolve(value) {
            if component.component_type == field {
                return fold(&component.entry.canonical_name);
            }
        }
    }
    normalize_value(value, rule)
}

fn normalize_value(value: &str, rule: Option<&FieldRule>) -> String {
    let trimmed = value.trim();
    match rule.map(|r| r.data_type) {
        Some(DataType::Number) => parse_leading_number(trimmed)
            .map(|n| {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", n as i64)
                } else {
                    format!("{n}")
                }
            })
            .unwrap_or_else(|| fold(trimmed)),
        Some(DataType::Boolean) => match trimmed.to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => "true".to_string(),
            "false" | "no" | "n" | "0" => "false".to_string(),
            other => other.to_string(),
        },
        _ => fold(trimmed),
    }
}

fn fold(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
}

/// Display value for a group: component-library canonical name when the
/// value resolves there, else the first observed spelling.
fn display_value(
    original: &str,
    field: &str,
    pack: &RulePack,
    rule: Option<&FieldRule>,
) -> String {
    if rule.is_some_and(|r| r.data_type == DataType::Enum) {
        if let Some(component) = pack.components.resolve(original) {
            if component.component_type == field {
                return component.entry.canonical_name.clone();
            }
        }
    }
    if rule.is_some_and(|r| r.data_type == DataType::Number) {
        return normalize_value(original, rule);
    }
    original.trim().to_string()
}

fn classify_shortfalls(pack: &RulePack, job: &Job, result: &mut ConsensusResult) {
    let locked = job.locked_fields();
    let extra_required: BTreeSet<&str> = job
        .requirements
        .required_fields
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(String::as_str)
        .collect();

    for (field, rule) in &pack.field_rules.fields {
        if locked.contains(field) {
            continue;
        }
        let provenance = result.fields.get(field);
        let missing = provenance.is_none_or(|p| p.value == UNK);
        let below = provenance.is_none_or(|p| !p.meets_pass_target);

        if below {
            result.fields_below_pass_target.push(field.clone());
        }
        match rule.required_level {
            RequiredLevel::Critical => {
                if below {
                    result.critical_fields_below_pass_target.push(field.clone());
                }
                if missing {
                    result.missing_required_fields.push(field.clone());
                }
            }
            RequiredLevel::Required => {
                if missing {
                    result.missing_required_fields.push(field.clone());
                }
            }
            _ => {
                if missing && extra_required.contains(field.as_str()) {
                    result.missing_required_fields.push(field.clone());
                }
            }
        }
    }
}

/// `flag_for_review` cross-validation rules surface contradictions without
/// failing the gate stack.
fn evaluate_flag_rules(pack: &RulePack, result: &mut ConsensusResult) {
    let value_of = |field: &str| -> Option<String> {
        result
            .fields
            .get(field)
            .filter(|p| p.value != UNK)
            .map(|p| p.value.clone())
    };

    for rule in &pack.cross_validation.rules {
        if rule.on_fail != OnFail::FlagForReview {
            continue;
        }
        match rule.rule_type.as_str() {
            "dependency" => {
                if value_of(&rule.trigger_field).is_some() {
                    for dependent in &rule.fields {
                        if value_of(dependent).is_none() {
                            result.contradictions.push(format!(
                                "{}: '{}' present but '{}' unresolved",
                                rule.rule_id, rule.trigger_field, dependent
                            ));
                        }
                    }
                }
            }
            "consistency" => {
                // Component-backed consistency: a resolved trigger component
                // with a max property bounds the dependent numeric field.
                let (Some(trigger_value), Some(dependent)) =
                    (value_of(&rule.trigger_field), rule.fields.first())
                else {
                    continue;
                };
                let Some(dependent_value) = value_of(dependent) else {
                    continue;
                };
                let Some(component) = pack.components.resolve(&trigger_value) else {
                    continue;
                };
                let max_key = format!("max_{dependent}");
                let Some(max) = component
                    .entry
                    .properties
                    .get(&max_key)
                    .and_then(serde_json::Value::as_f64)
                else {
                    continue;
                };
                let observed = dependent_value
                    .split(|c: char| !c.is_ascii_digit() && c != '.')
                    .filter_map(|t| t.parse::<f64>().ok())
                    .fold(0.0_f64, f64::max);
                if observed > max {
                    result.contradictions.push(format!(
                        "{}: {} {} exceeds {} limit {} of '{}'",
                        rule.rule_id, dependent, observed, max_key, max, trigger_value
                    ));
                }
            }
            "completeness" => {
                let present = rule.fields.iter().filter(|f| value_of(f).is_some()).count();
                if present > 0 && present < rule.fields.len() {
                    result.contradictions.push(format!(
                        "{}: {}/{} members resolved",
                        rule.rule_id,
                        present,
                        rule.fields.len()
                    ));
                }
            }
            _ => {}
        }
    }
}

fn push_reason(reasoning: &mut BTreeMap<String, Vec<String>>, field: &str, reason: String) {
    reasoning.entry(field.to_string()).or_default().push(reason);
}
