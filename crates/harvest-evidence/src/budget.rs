//! Per-field AI call budgets.
//!
//! Each field rule may carry `ai_max_calls`; the engine decrements one call
//! per targeted round. Exhausted fields drop out of the round's target list
//! and an exhaustion event is recorded once.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use harvest_rules::RulePack;

/// Exhaustion event for observability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetEvent {
    pub field: String,
    pub max_calls: u32,
}

/// Tracks remaining AI calls per field across rounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiBudget {
    remaining: BTreeMap<String, u32>,
    max_calls: BTreeMap<String, u32>,
    default_max: u32,
    events: Vec<BudgetEvent>,
}

impl AiBudget {
    /// Seed from the rule pack; fields without `ai_max_calls` get
    /// `default_max`.
    #[must_use]
    pub fn from_pack(pack: &RulePack, default_max: u32) -> Self {
        let mut remaining = BTreeMap::new();
        let mut max_calls = BTreeMap::new();
        for (key, rule) in &pack.field_rules.fields {
            let max = rule.ai_max_calls_or(default_max);
            remaining.insert(key.clone(), max);
            max_calls.insert(key.clone(), max);
        }
        Self {
            remaining,
            max_calls,
            default_max,
            events: Vec::new(),
        }
    }

    /// Remaining calls for a field (unknown fields get the default).
    #[must_use]
    pub fn remaining(&self, field: &str) -> u32 {
        self.remaining.get(field).copied().unwrap_or(self.default_max)
    }

    /// True once a field has no calls left.
    #[must_use]
    pub fn is_exhausted(&self, field: &str) -> bool {
        self.remaining(field) == 0
    }

    /// Consume one call for each field actually targeted this round.
    /// Returns the fields that just crossed into exhaustion.
    pub fn consume_round(&mut self, targeted: &[String]) -> Vec<String> {
        let mut newly_exhausted = Vec::new();
        for field in targeted {
            let slot = self
                .remaining
                .entry(field.clone())
                .or_insert(self.default_max);
            if *slot == 0 {
                continue;
            }
            *slot -= 1;
            if *slot == 0 {
                let max = self
                    .max_calls
                    .get(field)
                    .copied()
                    .unwrap_or(self.default_max);
                self.events.push(BudgetEvent {
                    field: field.clone(),
                    max_calls: max,
                });
                newly_exhausted.push(field.clone());
            }
        }
        newly_exhausted
    }

    /// Drop exhausted fields from a prospective target list.
    #[must_use]
    pub fn filter_targets(&self, targets: &[String]) -> Vec<String> {
        targets
            .iter()
            .filter(|f| !self.is_exhausted(f))
            .cloned()
            .collect()
    }

    /// All exhaustion events so far.
    #[must_use]
    pub fn events(&self) -> &[BudgetEvent] {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_rules::compile::compile;
    use harvest_rules::loader::{invalidate_cache, load_rule_pack};
    use tempfile::TempDir;

    fn budget() -> AiBudget {
        let dir = TempDir::new().unwrap();
        let root = camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let source = root.join("mouse-budget/_source");
        std::fs::create_dir_all(source.as_std_path()).unwrap();
        std::fs::write(
            source.join("workbook_fields.json").as_std_path(),
            r#"{"fields": [
                {"key": "weight", "ai_max_calls": 2},
                {"key": "sensor"}
            ]}"#,
        )
        .unwrap();
        compile(&root, "mouse-budget", false).unwrap();
        invalidate_cache(None);
        let pack = load_rule_pack(&root, "mouse-budget").unwrap();
        let b = AiBudget::from_pack(&pack, 3);
        invalidate_cache(Some("mouse-budget"));
        b
    }

    #[test]
    fn per_field_budget_decrements_and_exhausts() {
        let mut budget = budget();
        assert_eq!(budget.remaining("weight"), 2);
        assert_eq!(budget.remaining("sensor"), 3);

        let targets = vec!["weight".to_string()];
        assert!(budget.consume_round(&targets).is_empty());
        let exhausted = budget.consume_round(&targets);
        assert_eq!(exhausted, vec!["weight"]);
        assert!(budget.is_exhausted("weight"));
        assert_eq!(budget.events().len(), 1);
        assert_eq!(budget.events()[0].max_calls, 2);

        // Further consumption neither underflows nor re-emits.
        assert!(budget.consume_round(&targets).is_empty());
        assert_eq!(budget.events().len(), 1);
    }

    #[test]
    fn exhausted_fields_leave_the_target_list() {
        let mut budget = budget();
        let targets = vec!["weight".to_string(), "sensor".to_string()];
        budget.consume_round(&["weight".to_string()]);
        budget.consume_round(&["weight".to_string()]);

        let filtered = budget.filter_targets(&targets);
        assert_eq!(filtered, vec!["sensor"]);
    }
}
