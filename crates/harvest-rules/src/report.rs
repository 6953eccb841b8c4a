//! Read-only views over a loaded pack, backing `list-fields` and
//! `field-report`.

use serde::{Deserialize, Serialize};

use crate::loader::RulePack;
use crate::model::Range;

/// One row of `field-report`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldReportRow {
    pub key: String,
    pub display_name: String,
    pub group: String,
    pub data_type: String,
    pub required_level: String,
    pub availability: String,
    pub difficulty: String,
    pub effort: u8,
    pub has_parse: bool,
    pub pattern_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_max_calls: Option<u32>,
    pub known_value_count: usize,
}

/// Sorted field keys of the pack.
#[must_use]
pub fn list_fields(pack: &RulePack) -> Vec<String> {
    pack.field_rules.fields.keys().cloned().collect()
}

/// Per-field summary rows, sorted by key.
#[must_use]
pub fn field_report(pack: &RulePack) -> Vec<FieldReportRow> {
    pack.field_rules
        .fields
        .values()
        .map(|rule| {
            let pattern_count = pack
                .parse_templates
                .templates
                .get(&rule.field_key)
                .map_or(0, |t| t.patterns.len());
            let known_value_count = pack
                .known_values
                .enums
                .get(&rule.field_key)
                .map_or(0, |k| k.values.len());
            FieldReportRow {
                key: rule.field_key.clone(),
                display_name: rule.display_name.clone(),
                group: rule.group.clone(),
                data_type: tag(&rule.data_type),
                required_level: tag(&rule.required_level),
                availability: tag(&rule.availability),
                difficulty: tag(&rule.difficulty),
                effort: rule.effort,
                has_parse: rule.parse.is_some(),
                pattern_count,
                range: rule.contract.range,
                ai_max_calls: rule.ai_max_calls,
                known_value_count,
            }
        })
        .collect()
}

fn tag<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}
