//! The per-round summary contract, with warn-only schema validation.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::warn;

use harvest_consensus::FieldProvenance;

/// Constraint-analysis slice of the summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstraintAnalysis {
    pub contradictions: Vec<String>,
    /// Fields whose accepted value a constraint casts doubt on; these feed
    /// the next round's target list.
    pub uncertain_fields: Vec<String>,
}

/// Identity slice of the summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityContext {
    pub certainty: f64,
    pub brand: String,
    pub model: String,
    pub variant: String,
}

/// What one round reports back to the orchestrator and run artifacts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoundSummary {
    pub round: u32,
    pub missing_required_fields: Vec<String>,
    pub critical_fields_below_pass_target: Vec<String>,
    pub fields_below_pass_target: Vec<String>,
    pub confidence: f64,
    pub validated: bool,
    pub validated_reason: String,
    pub sources_identity_matched: usize,
    pub provenance: BTreeMap<String, FieldProvenance>,
    pub field_order: Vec<String>,
    pub field_reasoning: BTreeMap<String, Vec<String>>,
    pub constraint_analysis: ConstraintAnalysis,
    pub identity_context: IdentityContext,
    pub search_provider: String,
    pub search_reason_code: String,
    pub targeted_fields: Vec<String>,
    pub escalated_fields: Vec<String>,
    pub improvement_reasons: Vec<String>,
    pub urls_fetched: usize,
    pub new_urls_discovered: usize,
}

/// Validate a summary against its schema. Problems are logged as warnings
/// and returned; they never fail the round.
#[must_use]
pub fn validate_summary(summary: &RoundSummary) -> Vec<String> {
    let schema = json!({
        "type": "object",
        "required": [
            "missing_required_fields",
            "critical_fields_below_pass_target",
            "confidence",
            "validated",
            "sources_identity_matched",
            "provenance",
            "field_order",
            "field_reasoning",
            "constraint_analysis",
            "identity_context"
        ],
        "properties": {
            "confidence": {"type": "number", "minimum": 0.0, "maximum": 1.0},
            "validated": {"type": "boolean"},
            "missing_required_fields": {"type": "array", "items": {"type": "string"}},
            "critical_fields_below_pass_target": {"type": "array", "items": {"type": "string"}},
            "sources_identity_matched": {"type": "integer", "minimum": 0}
        }
    });

    let Ok(validator) = jsonschema::validator_for(&schema) else {
        return vec!["summary schema did not compile".to_string()];
    };
    let Ok(instance) = serde_json::to_value(summary) else {
        return vec!["summary did not serialize".to_string()];
    };

    let problems: Vec<String> = validator
        .iter_errors(&instance)
        .map(|e| format!("summary contract: {e}"))
        .collect();
    for problem in &problems {
        warn!(round = summary.round, "{problem}");
    }
    problems
}

/// Progress comparison between consecutive rounds. Improvement reasons are
/// stable tokens consumed by stop conditions and tests.
#[must_use]
pub fn improvement_reasons(previous: &RoundSummary, current: &RoundSummary) -> Vec<String> {
    let mut reasons = Vec::new();
    if current.validated && !previous.validated {
        reasons.push("newly_validated".to_string());
    }
    if current.missing_required_fields.len() < previous.missing_required_fields.len() {
        reasons.push("missing_required_reduced".to_string());
    }
    if current.critical_fields_below_pass_target.len()
        < previous.critical_fields_below_pass_target.len()
    {
        reasons.push("critical_below_reduced".to_string());
    }
    if current.constraint_analysis.contradictions.len()
        < previous.constraint_analysis.contradictions.len()
    {
        reasons.push("contradictions_reduced".to_string());
    }
    if current.confidence > previous.confidence + 0.01 {
        reasons.push("confidence_improved".to_string());
    }
    reasons
}
