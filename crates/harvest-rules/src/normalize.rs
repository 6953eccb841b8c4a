//! Field-key normalization and deterministic metadata defaults.

use crate::model::{
    Availability, Contract, DataType, Difficulty, EvidencePolicy, FieldRule, OutputShape,
    RequiredLevel,
};
use crate::workbook::RawFieldRow;

/// Normalize a raw header or key into a `field_key`: lowercase,
/// `[^a-z0-9]` → `_`, runs collapsed, leading/trailing `_` trimmed.
#[must_use]
pub fn normalize_field_key(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_underscore = false;
    for ch in raw.chars() {
        let lower = ch.to_ascii_lowercase();
        if lower.is_ascii_alphanumeric() {
            out.push(lower);
            last_underscore = false;
        } else if !last_underscore {
            out.push('_');
            last_underscore = true;
        }
    }
    out.trim_matches('_').to_string()
}

/// Fill every metadata slot of a raw workbook row with deterministic defaults
/// where the cell was blank. The result is a complete [`FieldRule`].
#[must_use]
pub fn normalize_field_rule(row: &RawFieldRow) -> FieldRule {
    let field_key = normalize_field_key(&row.key);
    let display_name = row
        .display_name
        .clone()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| title_case(&field_key));

    let required_level = row.required_level.unwrap_or_default();
    let unknown_reason_default = row
        .unknown_reason_default
        .clone()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "not_found_after_search".to_string());

    FieldRule {
        field_key,
        display_name,
        group: row
            .group
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "general".to_string()),
        data_type: row.data_type.unwrap_or(DataType::String),
        output_shape: row.output_shape.unwrap_or(OutputShape::Scalar),
        required_level,
        availability: row.availability.unwrap_or(Availability::Expected),
        difficulty: row.difficulty.unwrap_or(Difficulty::Easy),
        effort: row.effort.unwrap_or(1).clamp(1, 10),
        evidence: EvidencePolicy {
            required: row.evidence_required.unwrap_or(true),
            min_refs: row
                .min_evidence_refs
                .unwrap_or(if required_level == RequiredLevel::Critical {
                    2
                } else {
                    1
                }),
        },
        unknown_reason_default,
        contract: Contract { range: row.range },
        parse: row.parse.clone(),
        ai_mode: row.ai_mode.clone(),
        ai_max_calls: row.ai_max_calls,
        search_hints: row.search_hints.clone(),
        selection_policy: row.selection_policy.unwrap_or_default(),
    }
}

fn title_case(key: &str) -> String {
    key.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
