//! Target-field selection between rounds.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use harvest_evidence::AiBudget;
use harvest_rules::RulePack;
use harvest_rules::model::RequiredLevel;

use crate::round::RunMode;
use crate::summary::RoundSummary;

/// Cap on widened target lists in aggressive modes.
const AGGRESSIVE_TARGET_CAP: usize = 24;

/// This round's field targets plus those escalated to a deeper LLM tier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetSelection {
    pub targets: Vec<String>,
    /// Targeted last round and still missing.
    pub escalated_fields: Vec<String>,
}

/// Select target fields from the previous round's summary:
/// missing-required ∪ critical-below ∪ top uncertain-from-constraints; fall
/// back to the required/critical baseline when empty; widen under aggressive
/// modes; drop AI-exhausted fields.
#[must_use]
pub fn select_targets(
    previous: Option<&RoundSummary>,
    previous_targets: &[String],
    pack: &RulePack,
    mode: RunMode,
    budget: &AiBudget,
    locked: &BTreeSet<String>,
) -> TargetSelection {
    let mut targets: Vec<String> = Vec::new();
    let mut push = |field: &str, targets: &mut Vec<String>| {
        if !locked.contains(field) && !targets.iter().any(|t| t == field) {
            targets.push(field.to_string());
        }
    };

    if let Some(summary) = previous {
        for field in &summary.missing_required_fields {
            push(field, &mut targets);
        }
        for field in &summary.critical_fields_below_pass_target {
            push(field, &mut targets);
        }
        for field in &summary.constraint_analysis.uncertain_fields {
            push(field, &mut targets);
        }
    }

    if targets.is_empty() {
        for (field, rule) in &pack.field_rules.fields {
            if rule.required_level.is_required() {
                push(field, &mut targets);
            }
        }
    }

    if mode.is_aggressive() {
        if let Some(summary) = previous {
            for field in &summary.fields_below_pass_target {
                push(field, &mut targets);
            }
        }
        for (field, rule) in &pack.field_rules.fields {
            if targets.len() >= AGGRESSIVE_TARGET_CAP {
                break;
            }
            if rule.required_level != RequiredLevel::Editorial {
                push(field, &mut targets);
            }
        }
        targets.truncate(AGGRESSIVE_TARGET_CAP);
    }

    let targets = budget.filter_targets(&targets);

    // Fields we already chased last round and still need get deep-tier
    // escalation.
    let still_missing: BTreeSet<&str> = previous
        .map(|s| {
            s.missing_required_fields
                .iter()
                .chain(&s.critical_fields_below_pass_target)
                .map(String::as_str)
                .collect()
        })
        .unwrap_or_default();
    let escalated_fields: Vec<String> = previous_targets
        .iter()
        .filter(|t| still_missing.contains(t.as_str()) && targets.contains(*t))
        .cloned()
        .collect();

    TargetSelection {
        targets,
        escalated_fields,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summary::ConstraintAnalysis;

    fn pack() -> (tempfile::TempDir, std::sync::Arc<RulePack>) {
        let dir = tempfile::TempDir::new().unwrap();
        let root = camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let source = root.join("mouse-tgt/_source");
        std::fs::create_dir_all(source.as_std_path()).unwrap();
        std::fs::write(
            source.join("workbook_fields.json").as_std_path(),
            r#"{"fields": [
                {"key": "weight", "required_level": "required"},
                {"key": "sensor", "required_level": "critical"},
                {"key": "dpi", "required_level": "critical", "ai_max_calls": 1},
                {"key": "color", "required_level": "optional"},
                {"key": "blurb", "required_level": "editorial"}
            ]}"#,
        )
        .unwrap();
        harvest_rules::compile(&root, "mouse-tgt", false).unwrap();
        harvest_rules::invalidate_cache(None);
        let pack = harvest_rules::load_rule_pack(&root, "mouse-tgt").unwrap();
        (dir, pack)
    }

    fn summary(missing: &[&str], critical: &[&str]) -> RoundSummary {
        RoundSummary {
            missing_required_fields: missing.iter().map(|s| (*s).to_string()).collect(),
            critical_fields_below_pass_target: critical.iter().map(|s| (*s).to_string()).collect(),
            constraint_analysis: ConstraintAnalysis::default(),
            ..RoundSummary::default()
        }
    }

    #[test]
    fn previous_shortfalls_drive_targets() {
        let (_dir, pack) = pack();
        let budget = AiBudget::from_pack(&pack, 3);
        let selection = select_targets(
            Some(&summary(&["weight"], &["sensor"])),
            &[],
            &pack,
            RunMode::Balanced,
            &budget,
            &BTreeSet::new(),
        );
        assert_eq!(selection.targets, vec!["weight", "sensor"]);
        assert!(selection.escalated_fields.is_empty());
    }

    #[test]
    fn empty_summary_falls_back_to_required_baseline() {
        let (_dir, pack) = pack();
        let budget = AiBudget::from_pack(&pack, 3);
        let selection = select_targets(
            None,
            &[],
            &pack,
            RunMode::Balanced,
            &budget,
            &BTreeSet::new(),
        );
        assert_eq!(selection.targets, vec!["dpi", "sensor", "weight"]);
    }

    #[test]
    fn aggressive_mode_widens_past_editorial() {
        let (_dir, pack) = pack();
        let budget = AiBudget::from_pack(&pack, 3);
        let selection = select_targets(
            Some(&summary(&["weight"], &[])),
            &[],
            &pack,
            RunMode::Aggressive,
            &budget,
            &BTreeSet::new(),
        );
        assert!(selection.targets.contains(&"color".to_string()));
        assert!(!selection.targets.contains(&"blurb".to_string()));
    }

    #[test]
    fn exhausted_fields_drop_out() {
        let (_dir, pack) = pack();
        let mut budget = AiBudget::from_pack(&pack, 3);
        budget.consume_round(&["dpi".to_string()]); // dpi had ai_max_calls 1
        let selection = select_targets(
            Some(&summary(&[], &["dpi", "sensor"])),
            &[],
            &pack,
            RunMode::Balanced,
            &budget,
            &BTreeSet::new(),
        );
        assert_eq!(selection.targets, vec!["sensor"]);
    }

    #[test]
    fn repeat_targets_still_missing_escalate() {
        let (_dir, pack) = pack();
        let budget = AiBudget::from_pack(&pack, 3);
        let selection = select_targets(
            Some(&summary(&["weight"], &[])),
            &["weight".to_string()],
            &pack,
            RunMode::Balanced,
            &budget,
            &BTreeSet::new(),
        );
        assert_eq!(selection.escalated_fields, vec!["weight"]);
    }

    #[test]
    fn locked_fields_never_targeted() {
        let (_dir, pack) = pack();
        let budget = AiBudget::from_pack(&pack, 3);
        let locked: BTreeSet<String> = ["weight".to_string()].into();
        let selection = select_targets(
            Some(&summary(&["weight"], &["sensor"])),
            &[],
            &pack,
            RunMode::Balanced,
            &budget,
            &locked,
        );
        assert_eq!(selection.targets, vec!["sensor"]);
    }
}
