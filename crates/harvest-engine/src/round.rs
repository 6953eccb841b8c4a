//! Per-round configuration derived from the base engine config.

use serde::{Deserialize, Serialize};

use harvest_evidence::ModelTier;
use harvest_rules::RulePack;
use harvest_rules::model::{Availability, Difficulty, RequiredLevel};

/// Run aggressiveness. `Balanced` is conservative; the aggressive modes
/// raise URL caps and LLM budgets and widen target selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Balanced,
    Aggressive,
    UberAggressive,
}

impl RunMode {
    #[must_use]
    pub fn is_aggressive(self) -> bool {
        matches!(self, Self::Aggressive | Self::UberAggressive)
    }

    fn cap_multiplier(self) -> f64 {
        match self {
            Self::Balanced => 1.0,
            Self::Aggressive => 1.5,
            Self::UberAggressive => 2.0,
        }
    }
}

/// Effort profile of the category, used to scale caps.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EffortProfile {
    pub expected: usize,
    pub sometimes: usize,
    pub rare: usize,
    /// Sum of per-field effort, weighted by hard/critical/expected-required
    /// counts.
    pub contract_effort: u32,
}

/// Derive the category's effort profile from its rules.
#[must_use]
pub fn effort_profile(pack: &RulePack) -> EffortProfile {
    let mut profile = EffortProfile::default();
    for rule in pack.field_rules.fields.values() {
        match rule.availability {
            Availability::Expected => profile.expected += 1,
            Availability::Sometimes => profile.sometimes += 1,
            Availability::Rare => profile.rare += 1,
            Availability::EditorialOnly => {}
        }
        let mut weight = u32::from(rule.effort);
        if rule.difficulty == Difficulty::Hard {
            weight *= 2;
        }
        if matches!(
            rule.required_level,
            RequiredLevel::Critical | RequiredLevel::Required
        ) {
            weight += u32::from(rule.effort);
        }
        profile.contract_effort += weight;
    }
    profile
}

/// Configuration for one round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundConfig {
    pub round: u32,
    pub discovery_enabled: bool,
    pub max_urls: usize,
    pub llm_enabled: bool,
    pub llm_max_calls: u32,
    pub model_tier: ModelTier,
}

/// Derive the round's config.
///
/// Round 0 is the fast pass: discovery off, no search provider, small URL
/// cap, minimal LLM. Later rounds scale with the category's availability and
/// contract effort; escalated fields push the model tier from fast to deep.
#[must_use]
pub fn derive_round_config(
    mode: RunMode,
    round: u32,
    profile: &EffortProfile,
    escalated: bool,
) -> RoundConfig {
    if round == 0 {
        return RoundConfig {
            round,
            discovery_enabled: false,
            max_urls: 4,
            llm_enabled: false,
            llm_max_calls: 0,
            model_tier: ModelTier::Fast,
        };
    }

    let effort_scale = 1.0
        + (profile.sometimes + profile.rare) as f64 / 12.0
        + f64::from(profile.contract_effort) / 200.0;
    let base_urls = (8.0 * effort_scale * mode.cap_multiplier()).round() as usize;
    let llm_calls = (4.0 * effort_scale * mode.cap_multiplier()).round() as u32;

    RoundConfig {
        round,
        discovery_enabled: true,
        max_urls: base_urls.clamp(6, 40),
        llm_enabled: true,
        llm_max_calls: llm_calls.clamp(2, 24),
        model_tier: if escalated {
            ModelTier::Deep
        } else {
            ModelTier::Fast
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> EffortProfile {
        EffortProfile {
            expected: 10,
            sometimes: 4,
            rare: 2,
            contract_effort: 60,
        }
    }

    #[test]
    fn round_zero_is_the_fast_pass() {
        let config = derive_round_config(RunMode::Balanced, 0, &profile(), false);
        assert!(!config.discovery_enabled);
        assert!(!config.llm_enabled);
        assert_eq!(config.max_urls, 4);
        assert_eq!(config.model_tier, ModelTier::Fast);
    }

    #[test]
    fn later_rounds_enable_discovery_and_scale() {
        let balanced = derive_round_config(RunMode::Balanced, 1, &profile(), false);
        assert!(balanced.discovery_enabled);
        assert!(balanced.llm_enabled);
        assert!(balanced.max_urls > 4);

        let aggressive = derive_round_config(RunMode::UberAggressive, 1, &profile(), false);
        assert!(aggressive.max_urls > balanced.max_urls);
        assert!(aggressive.llm_max_calls > balanced.llm_max_calls);
    }

    #[test]
    fn escalation_selects_the_deep_tier() {
        let config = derive_round_config(RunMode::Balanced, 2, &profile(), true);
        assert_eq!(config.model_tier, ModelTier::Deep);
    }

    #[test]
    fn caps_are_bounded() {
        let heavy = EffortProfile {
            expected: 50,
            sometimes: 40,
            rare: 30,
            contract_effort: 900,
        };
        let config = derive_round_config(RunMode::UberAggressive, 1, &heavy, false);
        assert!(config.max_urls <= 40);
        assert!(config.llm_max_calls <= 24);
    }
}
