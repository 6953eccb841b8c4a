//! The validation gate stack.
//!
//! Gates apply in order; the first failure names the terminal reason while
//! `validation_reasons` enumerates every failed check. The constraint gate
//! surfaces contradictions but cannot fail a record on its own.

use serde::{Deserialize, Serialize};

/// Minimum identity certainty for publishing.
pub const IDENTITY_PUBLISH_THRESHOLD: f64 = 0.99;

/// Everything the stack inspects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateInputs {
    pub identity_certainty: f64,
    pub anchor_major_conflicts: usize,
    pub contradictions: Vec<String>,
    pub completeness_required: f64,
    pub target_completeness: f64,
    pub confidence: f64,
    pub target_confidence: f64,
    pub critical_fields_below_pass_target: Vec<String>,
    pub missing_required_fields: Vec<String>,
}

/// Terminal reason tokens, unique and human-stable.
pub mod reason {
    pub const COMPLETE: &str = "complete";
    pub const IDENTITY_MISMATCH: &str = "identity_mismatch";
    pub const ANCHOR_MAJOR_CONFLICT: &str = "anchor_major_conflict";
    pub const COMPLETENESS_BELOW_TARGET: &str = "completeness_below_target";
    pub const CONFIDENCE_BELOW_TARGET: &str = "confidence_below_target";
    pub const CRITICAL_FIELDS_BELOW_TARGET: &str = "critical_fields_below_target";
}

/// Stack verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateOutcome {
    pub validated: bool,
    pub validated_reason: String,
    pub validation_reasons: Vec<String>,
    /// Contradictions carried through for review; never fail the stack.
    pub contradictions: Vec<String>,
}

/// Run the six gates in order.
#[must_use]
pub fn run_gate_stack(inputs: &GateInputs) -> GateOutcome {
    let mut failures: Vec<&str> = Vec::new();

    if inputs.identity_certainty < IDENTITY_PUBLISH_THRESHOLD {
        failures.push(reason::IDENTITY_MISMATCH);
    }
    if inputs.anchor_major_conflicts > 0 {
        failures.push(reason::ANCHOR_MAJOR_CONFLICT);
    }
    // Constraint gate: reject_candidate rules already excluded values, and
    // flag_for_review contradictions surface without failing.
    if inputs.completeness_required < inputs.target_completeness {
        failures.push(reason::COMPLETENESS_BELOW_TARGET);
    }
    if inputs.confidence < inputs.target_confidence {
        failures.push(reason::CONFIDENCE_BELOW_TARGET);
    }
    if !inputs.critical_fields_below_pass_target.is_empty() {
        failures.push(reason::CRITICAL_FIELDS_BELOW_TARGET);
    }

    let validated = failures.is_empty();
    GateOutcome {
        validated,
        validated_reason: failures
            .first()
            .copied()
            .unwrap_or(reason::COMPLETE)
            .to_string(),
        validation_reasons: failures.iter().map(|r| (*r).to_string()).collect(),
        contradictions: inputs.contradictions.clone(),
    }
}

/// `covered(requiredFields) / |requiredFields|`; an empty required set is
/// fully complete.
#[must_use]
pub fn completeness_required(required: &[String], covered: impl Fn(&str) -> bool) -> f64 {
    if required.is_empty() {
        return 1.0;
    }
    let hit = required.iter().filter(|f| covered(f)).count();
    hit as f64 / required.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passing() -> GateInputs {
        GateInputs {
            identity_certainty: 1.0,
            anchor_major_conflicts: 0,
            contradictions: Vec::new(),
            completeness_required: 1.0,
            target_completeness: 0.8,
            confidence: 0.9,
            target_confidence: 0.7,
            critical_fields_below_pass_target: Vec::new(),
            missing_required_fields: Vec::new(),
        }
    }

    #[test]
    fn all_gates_pass() {
        let outcome = run_gate_stack(&passing());
        assert!(outcome.validated);
        assert_eq!(outcome.validated_reason, reason::COMPLETE);
        assert!(outcome.validation_reasons.is_empty());
    }

    #[test]
    fn first_failure_names_the_terminal_reason() {
        let mut inputs = passing();
        inputs.identity_certainty = 0.7;
        inputs.confidence = 0.1;
        let outcome = run_gate_stack(&inputs);
        assert!(!outcome.validated);
        assert_eq!(outcome.validated_reason, reason::IDENTITY_MISMATCH);
        assert_eq!(
            outcome.validation_reasons,
            vec![reason::IDENTITY_MISMATCH, reason::CONFIDENCE_BELOW_TARGET]
        );
    }

    #[test]
    fn anchor_conflict_fails_after_identity() {
        let mut inputs = passing();
        inputs.anchor_major_conflicts = 1;
        let outcome = run_gate_stack(&inputs);
        assert_eq!(outcome.validated_reason, reason::ANCHOR_MAJOR_CONFLICT);
    }

    #[test]
    fn contradictions_surface_without_failing() {
        let mut inputs = passing();
        inputs.contradictions = vec!["sensor_dpi_consistency: dpi exceeds limit".to_string()];
        let outcome = run_gate_stack(&inputs);
        assert!(outcome.validated);
        assert_eq!(outcome.contradictions.len(), 1);
    }

    #[test]
    fn completeness_confidence_and_critical_gates() {
        let mut inputs = passing();
        inputs.completeness_required = 0.5;
        assert_eq!(
            run_gate_stack(&inputs).validated_reason,
            reason::COMPLETENESS_BELOW_TARGET
        );

        let mut inputs = passing();
        inputs.confidence = 0.2;
        assert_eq!(
            run_gate_stack(&inputs).validated_reason,
            reason::CONFIDENCE_BELOW_TARGET
        );

        let mut inputs = passing();
        inputs.critical_fields_below_pass_target = vec!["sensor".to_string()];
        assert_eq!(
            run_gate_stack(&inputs).validated_reason,
            reason::CRITICAL_FIELDS_BELOW_TARGET
        );
    }

    #[test]
    fn completeness_ratio() {
        let required = vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string()];
        let ratio = completeness_required(&required, |f| f != "d");
        assert!((ratio - 0.75).abs() < 1e-9);
        assert_eq!(completeness_required(&[], |_| false), 1.0);
    }
}
