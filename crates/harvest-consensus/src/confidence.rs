//! Field confidence: a pure function of identity certainty, agreement, tier
//! bias, and anchor-conflict penalty.
//!
//! Fixed weights: identity 0.35, agreement 0.40, tier 0.15, conflict 0.10.
//! Determinism across runs matters more than the exact constants.

use harvest_plan::Tier;

const W_IDENTITY: f64 = 0.35;
const W_AGREEMENT: f64 = 0.40;
const W_TIER: f64 = 0.15;
const W_CONFLICT: f64 = 0.10;

/// Inputs for one field's confidence.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceInputs {
    pub identity_confidence: f64,
    pub approved_confirmations: u32,
    /// Distinct sources that voted for a different value.
    pub disagreements: u32,
    pub best_tier: Option<Tier>,
    /// Weighted anchor conflicts touching this field (minor 0.5, major 1.0).
    pub anchor_conflicts: f64,
}

/// `clamp01(w_i·identity + w_a·agreement + w_t·tier_bias − w_c·conflicts)`.
#[must_use]
pub fn field_confidence(inputs: &ConfidenceInputs) -> f64 {
    let votes = inputs.approved_confirmations + inputs.disagreements;
    let agreement = if votes == 0 {
        0.0
    } else {
        f64::from(inputs.approved_confirmations) / f64::from(votes)
    };

    let tier_bias = match inputs.best_tier {
        Some(Tier::One) => 1.0,
        Some(Tier::Two) => 0.6,
        Some(Tier::Three) => 0.3,
        Some(Tier::Unknown) => 0.1,
        None => 0.0,
    };

    (W_IDENTITY * inputs.identity_confidence + W_AGREEMENT * agreement + W_TIER * tier_bias
        - W_CONFLICT * inputs.anchor_conflicts)
        .clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_one_unanimous_clears_typical_target() {
        let confidence = field_confidence(&ConfidenceInputs {
            identity_confidence: 1.0,
            approved_confirmations: 2,
            disagreements: 0,
            best_tier: Some(Tier::One),
            anchor_conflicts: 0.0,
        });
        assert!(confidence >= 0.85, "got {confidence}");
    }

    #[test]
    fn disagreement_erodes_confidence() {
        let unanimous = field_confidence(&ConfidenceInputs {
            identity_confidence: 1.0,
            approved_confirmations: 2,
            disagreements: 0,
            best_tier: Some(Tier::Two),
            anchor_conflicts: 0.0,
        });
        let contested = field_confidence(&ConfidenceInputs {
            identity_confidence: 1.0,
            approved_confirmations: 2,
            disagreements: 2,
            best_tier: Some(Tier::Two),
            anchor_conflicts: 0.0,
        });
        assert!(contested < unanimous);
    }

    #[test]
    fn conflicts_penalize_and_clamp_holds() {
        let conflicted = field_confidence(&ConfidenceInputs {
            identity_confidence: 0.0,
            approved_confirmations: 0,
            disagreements: 0,
            best_tier: None,
            anchor_conflicts: 5.0,
        });
        assert_eq!(conflicted, 0.0);

        let maxed = field_confidence(&ConfidenceInputs {
            identity_confidence: 1.0,
            approved_confirmations: 5,
            disagreements: 0,
            best_tier: Some(Tier::One),
            anchor_conflicts: 0.0,
        });
        assert!(maxed <= 1.0);
    }

    #[test]
    fn deterministic_for_equal_inputs() {
        let inputs = ConfidenceInputs {
            identity_confidence: 0.7,
            approved_confirmations: 1,
            disagreements: 1,
            best_tier: Some(Tier::Three),
            anchor_conflicts: 0.5,
        };
        assert_eq!(field_confidence(&inputs), field_confidence(&inputs));
    }
}
