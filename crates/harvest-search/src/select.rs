//! Deterministic per-round provider selection with audit reason codes.

use serde::{Deserialize, Serialize};

use crate::provider::{Provider, SearchConfig};

/// Round-level toggles feeding the decision tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectionInputs {
    pub discovery_enabled: bool,
    pub missing_required_count: usize,
    /// How many rounds have already searched for the still-missing required
    /// fields.
    pub required_search_iteration: u32,
    /// When set, Google CSE is reserved for rescue: free providers first,
    /// CSE only past the iteration threshold.
    pub cse_rescue_only_mode: bool,
    pub cse_rescue_required_iteration: u32,
}

/// The chosen provider plus the branch that chose it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionDecision {
    pub provider: Provider,
    pub reason_code: String,
}

fn decision(provider: Provider, reason_code: &str) -> SelectionDecision {
    SelectionDecision {
        provider,
        reason_code: reason_code.to_string(),
    }
}

/// Walk the decision tree. Pure function of its inputs.
#[must_use]
pub fn select_provider(inputs: &SelectionInputs, config: &SearchConfig) -> SelectionDecision {
    if !inputs.discovery_enabled {
        return decision(Provider::None, "discovery_disabled");
    }
    if inputs.missing_required_count == 0 {
        return decision(Provider::None, "no_missing_required");
    }

    if inputs.cse_rescue_only_mode {
        if config.has_google()
            && inputs.required_search_iteration >= inputs.cse_rescue_required_iteration
        {
            return decision(Provider::Google, "cse_rescue_threshold_met");
        }
        if config.has_searxng() {
            return decision(Provider::Searxng, "rescue_free_searxng");
        }
        return decision(Provider::Duckduckgo, "rescue_free_public");
    }

    if config.has_bing() {
        return decision(Provider::Bing, "paid_bing_available");
    }
    if config.has_google() {
        return decision(Provider::Google, "paid_google_available");
    }
    if config.has_searxng() {
        return decision(Provider::Searxng, "searxng_configured");
    }
    decision(Provider::Duckduckgo, "public_fallback")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(missing: usize) -> SelectionInputs {
        SelectionInputs {
            discovery_enabled: true,
            missing_required_count: missing,
            required_search_iteration: 0,
            cse_rescue_only_mode: false,
            cse_rescue_required_iteration: 2,
        }
    }

    #[test]
    fn discovery_disabled_short_circuits() {
        let decision = select_provider(
            &SelectionInputs::default(),
            &SearchConfig::default(),
        );
        assert_eq!(decision.provider, Provider::None);
        assert_eq!(decision.reason_code, "discovery_disabled");
    }

    #[test]
    fn nothing_missing_means_no_search() {
        let decision = select_provider(&inputs(0), &SearchConfig::default());
        assert_eq!(decision.provider, Provider::None);
        assert_eq!(decision.reason_code, "no_missing_required");
    }

    #[test]
    fn paid_providers_win_when_credentialed() {
        let mut config = SearchConfig::default();
        config.bing_api_key = Some("k".into());
        let decision = select_provider(&inputs(2), &config);
        assert_eq!(decision.provider, Provider::Bing);
        assert_eq!(decision.reason_code, "paid_bing_available");
    }

    #[test]
    fn public_fallback_without_credentials() {
        let decision = select_provider(&inputs(2), &SearchConfig::default());
        assert_eq!(decision.provider, Provider::Duckduckgo);
        assert_eq!(decision.reason_code, "public_fallback");
    }

    #[test]
    fn rescue_mode_holds_cse_until_threshold() {
        let mut config = SearchConfig::default();
        config.google_api_key = Some("k".into());
        config.google_cx = Some("cx".into());

        let mut rescue = inputs(3);
        rescue.cse_rescue_only_mode = true;
        rescue.required_search_iteration = 1;
        let decision = select_provider(&rescue, &config);
        assert_eq!(decision.provider, Provider::Duckduckgo);
        assert_eq!(decision.reason_code, "rescue_free_public");

        rescue.required_search_iteration = 2;
        let decision = select_provider(&rescue, &config);
        assert_eq!(decision.provider, Provider::Google);
        assert_eq!(decision.reason_code, "cse_rescue_threshold_met");
    }
}
