//! Anchor evaluation: pre-known field values reject mismatching sources.
//!
//! Anchored fields never enter consensus; instead each source's best
//! candidate map is compared against the anchors. Numeric comparisons use
//! small-diff/large-diff thresholds; list-like fields compare maxima;
//! strings compare exactly (case-insensitive).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use harvest_extract::{Candidate, parse_leading_number};

/// Conflict severity. Major conflicts block validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Minor,
    Major,
}

/// One anchor disagreement from one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorConflict {
    pub field: String,
    pub anchor_value: String,
    pub observed_value: String,
    pub severity: Severity,
    pub source_index: usize,
}

/// Absolute-difference threshold separating minor from major for weight- and
/// dimension-like fields.
const NUMERIC_MAJOR_DIFF: f64 = 2.0;

/// Compare one source's best-candidate field map against the anchors.
#[must_use]
pub fn evaluate_anchors(
    anchors: &BTreeMap<String, String>,
    best_per_field: &BTreeMap<String, Candidate>,
    source_index: usize,
) -> Vec<AnchorConflict> {
    let mut conflicts = Vec::new();

    for (field, anchor_value) in anchors {
        let Some(candidate) = best_per_field.get(field) else {
            continue;
        };
        let Some(severity) = compare_anchor(field, anchor_value, &candidate.value) else {
            continue;
        };
        conflicts.push(AnchorConflict {
            field: field.clone(),
            anchor_value: anchor_value.clone(),
            observed_value: candidate.value.clone(),
            severity,
            source_index,
        });
    }
    conflicts
}

/// `None` means agreement.
#[must_use]
pub fn compare_anchor(field: &str, anchor: &str, observed: &str) -> Option<Severity> {
    if is_list_max_field(field) {
        let anchor_max = list_max(anchor);
        let observed_max = list_max(observed);
        return match (anchor_max, observed_max) {
            (Some(a), Some(o)) if (a - o).abs() < f64::EPSILON => None,
            (Some(_), Some(_)) => Some(Severity::Major),
            _ => string_compare(anchor, observed),
        };
    }

    match (parse_leading_number(anchor), parse_leading_number(observed)) {
        (Some(a), Some(o)) => {
            let diff = (a - o).abs();
            if diff < f64::EPSILON {
                None
            } else if diff <= NUMERIC_MAJOR_DIFF {
                Some(Severity::Minor)
            } else {
                Some(Severity::Major)
            }
        }
        _ => string_compare(anchor, observed),
    }
}

fn string_compare(anchor: &str, observed: &str) -> Option<Severity> {
    if anchor.trim().eq_ignore_ascii_case(observed.trim()) {
        None
    } else {
        Some(Severity::Major)
    }
}

/// DPI and polling-rate style fields compare the maximum of their value
/// lists (`"100-25600"`, `"125/500/1000"`).
fn is_list_max_field(field: &str) -> bool {
    let field = field.to_ascii_lowercase();
    field.contains("dpi") || field.contains("polling")
}

fn list_max(value: &str) -> Option<f64> {
    value
        .split(|c: char| !c.is_ascii_digit() && c != '.')
        .filter_map(|token| token.parse::<f64>().ok())
        .fold(None, |acc, n| Some(acc.map_or(n, |a: f64| a.max(n))))
}

/// Count major conflicts across all sources.
#[must_use]
pub fn major_conflict_count(conflicts: &[AnchorConflict]) -> usize {
    conflicts
        .iter()
        .filter(|c| c.severity == Severity::Major)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_extract::Method;

    fn best(field: &str, value: &str) -> BTreeMap<String, Candidate> {
        let mut map = BTreeMap::new();
        map.insert(
            field.to_string(),
            Candidate {
                field: field.to_string(),
                value: value.to_string(),
                method: Method::Dom,
                key_path: "dom".into(),
                quote: None,
                source_index: 0,
            },
        );
        map
    }

    fn anchors(field: &str, value: &str) -> BTreeMap<String, String> {
        [(field.to_string(), value.to_string())].into()
    }

    #[test]
    fn small_weight_diff_is_minor_large_is_major() {
        assert_eq!(compare_anchor("weight", "63", "64"), Some(Severity::Minor));
        assert_eq!(compare_anchor("weight", "63", "65"), Some(Severity::Minor));
        assert_eq!(compare_anchor("weight", "63", "80"), Some(Severity::Major));
        assert_eq!(compare_anchor("weight", "63", "63"), None);
    }

    #[test]
    fn dpi_compares_list_max() {
        assert_eq!(compare_anchor("dpi", "25600", "100-25600"), None);
        assert_eq!(
            compare_anchor("dpi", "25600", "100-16000"),
            Some(Severity::Major)
        );
        assert_eq!(compare_anchor("polling_rate", "1000", "125/500/1000"), None);
    }

    #[test]
    fn sensor_compares_exact_string() {
        assert_eq!(compare_anchor("sensor", "HERO 25K", "hero 25k"), None);
        assert_eq!(
            compare_anchor("sensor", "HERO 25K", "PAW3395"),
            Some(Severity::Major)
        );
    }

    #[test]
    fn evaluation_flags_conflicting_source() {
        let conflicts = evaluate_anchors(&anchors("weight", "63"), &best("weight", "80"), 4);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].severity, Severity::Major);
        assert_eq!(conflicts[0].source_index, 4);
        assert_eq!(major_conflict_count(&conflicts), 1);
    }

    #[test]
    fn sources_without_the_field_do_not_conflict() {
        let conflicts = evaluate_anchors(&anchors("weight", "63"), &BTreeMap::new(), 0);
        assert!(conflicts.is_empty());
    }
}
