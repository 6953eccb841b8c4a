//! Ordered stop conditions for the convergence loop.

use serde::{Deserialize, Serialize};

use harvest_consensus::IDENTITY_PUBLISH_THRESHOLD;
use harvest_rules::RulePack;
use harvest_rules::model::{Availability, RequiredLevel};

use crate::summary::{RoundSummary, improvement_reasons};

/// Why the loop stopped. The no-progress variant carries the round window
/// that tripped it, so the wire token reads `no_progress_{N}_rounds`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Complete,
    BudgetExhausted,
    MaxRoundsReached,
    IdentityGateStuck,
    NoProgressRounds(u32),
    RepeatedLowQuality,
    RequiredSearchExhaustedNoNewUrlsOrFields,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete => write!(f, "complete"),
            Self::BudgetExhausted => write!(f, "budget_exhausted"),
            Self::MaxRoundsReached => write!(f, "max_rounds_reached"),
            Self::IdentityGateStuck => write!(f, "identity_gate_stuck"),
            Self::NoProgressRounds(window) => write!(f, "no_progress_{window}_rounds"),
            Self::RepeatedLowQuality => write!(f, "repeated_low_quality"),
            Self::RequiredSearchExhaustedNoNewUrlsOrFields => {
                write!(f, "required_search_exhausted_no_new_urls_or_fields")
            }
        }
    }
}

/// Thresholds for the non-terminal stop conditions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StopPolicy {
    pub max_rounds: u32,
    pub no_progress_rounds: u32,
    pub identity_stuck_rounds: u32,
    pub identity_stuck_delta: f64,
    pub max_low_quality_rounds: u32,
    pub low_quality_confidence: f64,
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            no_progress_rounds: 3,
            identity_stuck_rounds: 2,
            identity_stuck_delta: 0.05,
            max_low_quality_rounds: 2,
            low_quality_confidence: 0.2,
        }
    }
}

/// Evaluate the stop conditions in priority order after a round. `None`
/// means keep going.
#[must_use]
pub fn evaluate_stop(
    history: &[RoundSummary],
    policy: &StopPolicy,
    llm_budget_blocked: bool,
) -> Option<StopReason> {
    let current = history.last()?;
    let round = current.round;

    if current.validated
        && current.missing_required_fields.is_empty()
        && current.critical_fields_below_pass_target.is_empty()
    {
        return Some(StopReason::Complete);
    }

    if llm_budget_blocked && round >= 1 {
        return Some(StopReason::BudgetExhausted);
    }

    if round + 1 >= policy.max_rounds {
        return Some(StopReason::MaxRoundsReached);
    }

    if identity_stuck(history, policy) {
        return Some(StopReason::IdentityGateStuck);
    }

    if no_progress(history, policy) {
        return Some(StopReason::NoProgressRounds(policy.no_progress_rounds));
    }

    if repeated_low_quality(history, policy) {
        return Some(StopReason::RepeatedLowQuality);
    }

    if required_search_exhausted(history) {
        return Some(StopReason::RequiredSearchExhaustedNoNewUrlsOrFields);
    }

    None
}

fn identity_stuck(history: &[RoundSummary], policy: &StopPolicy) -> bool {
    let window = policy.identity_stuck_rounds as usize + 1;
    if history.len() < window {
        return false;
    }
    let recent = &history[history.len() - window..];
    let first = recent.first().map_or(0.0, |s| s.identity_context.certainty);
    let last = recent.last().map_or(0.0, |s| s.identity_context.certainty);
    last < IDENTITY_PUBLISH_THRESHOLD && (last - first) < policy.identity_stuck_delta
}

fn no_progress(history: &[RoundSummary], policy: &StopPolicy) -> bool {
    let window = policy.no_progress_rounds as usize;
    if history.len() <= window {
        return false;
    }
    history
        .windows(2)
        .rev()
        .take(window)
        .all(|pair| improvement_reasons(&pair[0], &pair[1]).is_empty())
}

fn repeated_low_quality(history: &[RoundSummary], policy: &StopPolicy) -> bool {
    let window = policy.max_low_quality_rounds as usize;
    if history.len() < window {
        return false;
    }
    history[history.len() - window..].iter().all(|summary| {
        summary.sources_identity_matched == 0 || summary.confidence < policy.low_quality_confidence
    })
}

/// Required fields still missing while the last round's search produced no
/// new URLs and nothing new was learned.
fn required_search_exhausted(history: &[RoundSummary]) -> bool {
    let Some(current) = history.last() else {
        return false;
    };
    current.round >= 1
        && !current.missing_required_fields.is_empty()
        && current.new_urls_discovered == 0
        && history
            .len()
            .checked_sub(2)
            .and_then(|i| history.get(i))
            .is_some_and(|previous| improvement_reasons(previous, current).is_empty())
}

/// Expected-field retry override: when the loop wants to stop for a
/// non-budget, non-identity reason while some required expected field is
/// still only `not_found_after_search`, force one more round targeting
/// exactly those fields. Fires at most once per run.
#[must_use]
pub fn expected_retry_fields(
    reason: &StopReason,
    summary: &RoundSummary,
    pack: &RulePack,
    already_fired: bool,
) -> Vec<String> {
    if already_fired {
        return Vec::new();
    }
    if matches!(
        reason,
        StopReason::Complete | StopReason::BudgetExhausted | StopReason::IdentityGateStuck
    ) {
        return Vec::new();
    }

    summary
        .missing_required_fields
        .iter()
        .filter(|field| {
            pack.field_rules.fields.get(*field).is_some_and(|rule| {
                rule.availability == Availability::Expected
                    && matches!(
                        rule.required_level,
                        RequiredLevel::Required | RequiredLevel::Expected | RequiredLevel::Critical
                    )
                    && rule.unknown_reason_default == "not_found_after_search"
            })
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summary::IdentityContext;

    fn summary(round: u32) -> RoundSummary {
        RoundSummary {
            round,
            identity_context: IdentityContext {
                certainty: 1.0,
                ..IdentityContext::default()
            },
            sources_identity_matched: 1,
            confidence: 0.8,
            new_urls_discovered: 3,
            ..RoundSummary::default()
        }
    }

    #[test]
    fn complete_wins_first() {
        let mut current = summary(0);
        current.validated = true;
        let reason = evaluate_stop(&[current], &StopPolicy::default(), true);
        assert_eq!(reason, Some(StopReason::Complete));
    }

    #[test]
    fn budget_block_stops_from_round_one() {
        let mut r0 = summary(0);
        r0.missing_required_fields = vec!["dpi".to_string()];
        assert_eq!(
            evaluate_stop(&[r0.clone()], &StopPolicy::default(), true),
            None
        );

        let mut r1 = summary(1);
        r1.missing_required_fields = vec!["dpi".to_string()];
        assert_eq!(
            evaluate_stop(&[r0, r1], &StopPolicy::default(), true),
            Some(StopReason::BudgetExhausted)
        );
    }

    #[test]
    fn max_rounds_reached() {
        let history: Vec<RoundSummary> = (0..5)
            .map(|i| {
                let mut s = summary(i);
                s.missing_required_fields = vec!["dpi".to_string()];
                s.confidence = 0.5 + f64::from(i) * 0.02; // keeps making progress
                s
            })
            .collect();
        assert_eq!(
            evaluate_stop(&history, &StopPolicy::default(), false),
            Some(StopReason::MaxRoundsReached)
        );
    }

    #[test]
    fn identity_stuck_detection() {
        let mut history = Vec::new();
        for round in 0..3 {
            let mut s = summary(round);
            s.missing_required_fields = vec!["dpi".to_string()];
            s.identity_context.certainty = 0.6 + f64::from(round) * 0.01;
            s.confidence = 0.5 + f64::from(round) * 0.05;
            history.push(s);
        }
        assert_eq!(
            evaluate_stop(&history, &StopPolicy::default(), false),
            Some(StopReason::IdentityGateStuck)
        );
    }

    #[test]
    fn no_progress_detection() {
        let mut history = Vec::new();
        for round in 0..4 {
            let mut s = summary(round);
            s.missing_required_fields = vec!["dpi".to_string()];
            history.push(s);
        }
        let policy = StopPolicy {
            max_rounds: 10,
            ..StopPolicy::default()
        };
        let reason = evaluate_stop(&history, &policy, false).unwrap();
        assert_eq!(reason, StopReason::NoProgressRounds(3));
        assert_eq!(reason.to_string(), "no_progress_3_rounds");
    }

    #[test]
    fn repeated_low_quality_detection() {
        let mut history = Vec::new();
        for round in 0..2 {
            let mut s = summary(round);
            s.missing_required_fields = vec!["dpi".to_string()];
            s.sources_identity_matched = 0;
            s.confidence = 0.1 + f64::from(round) * 0.05;
            history.push(s);
        }
        let policy = StopPolicy {
            max_rounds: 10,
            no_progress_rounds: 5,
            ..StopPolicy::default()
        };
        assert_eq!(
            evaluate_stop(&history, &policy, false),
            Some(StopReason::RepeatedLowQuality)
        );
    }

    fn retry_pack() -> (tempfile::TempDir, std::sync::Arc<RulePack>) {
        let dir = tempfile::TempDir::new().unwrap();
        let root = camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let source = root.join("mouse-stop/_source");
        std::fs::create_dir_all(source.as_std_path()).unwrap();
        std::fs::write(
            source.join("workbook_fields.json").as_std_path(),
            r#"{"fields": [
                {"key": "weight", "required_level": "required", "availability": "expected"},
                {"key": "cable", "required_level": "required", "availability": "rare"}
            ]}"#,
        )
        .unwrap();
        harvest_rules::compile(&root, "mouse-stop", false).unwrap();
        harvest_rules::invalidate_cache(None);
        let pack = harvest_rules::load_rule_pack(&root, "mouse-stop").unwrap();
        (dir, pack)
    }

    #[test]
    fn expected_retry_targets_only_expected_not_found() {
        let (_dir, pack) = retry_pack();
        let mut s = summary(2);
        s.missing_required_fields = vec!["weight".to_string(), "cable".to_string()];

        let fields =
            expected_retry_fields(&StopReason::NoProgressRounds(3), &s, &pack, false);
        assert_eq!(fields, vec!["weight"]);

        // Never fires twice, and never for budget/identity stops.
        assert!(
            expected_retry_fields(&StopReason::NoProgressRounds(3), &s, &pack, true).is_empty()
        );
        assert!(expected_retry_fields(&StopReason::BudgetExhausted, &s, &pack, false).is_empty());
    }
}
