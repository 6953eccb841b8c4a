//! Traffic-light provenance: per-field evidence quality mapped to a color.

use serde::{Deserialize, Serialize};

use harvest_extract::Method;
use harvest_plan::Tier;
use harvest_rules::RulePack;
use harvest_rules::model::DataType;

use crate::reconcile::{FieldProvenance, UNK};

/// Evidence quality color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficColor {
    Green,
    Yellow,
    Red,
}

/// Per-field traffic light attached to the normalized record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficLight {
    pub color: TrafficColor,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_tier: Option<Tier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_method: Option<Method>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unknown_reason: Option<String>,
}

/// Map one field's provenance to its traffic light:
/// green for tier-1 or component-library-backed evidence, yellow for tier-2,
/// red otherwise or when the value is `unk`.
#[must_use]
pub fn traffic_light(field: &str, provenance: &FieldProvenance, pack: &RulePack) -> TrafficLight {
    let rule = pack.field_rules.fields.get(field);

    if provenance.value == UNK {
        return TrafficLight {
            color: TrafficColor::Red,
            reason: "no accepted value".to_string(),
            source_tier: None,
            source_method: None,
            source_url: None,
            unknown_reason: rule.map(|r| r.unknown_reason_default.clone()),
        };
    }

    let top = provenance.evidence.first();
    let source_tier = top.map(|row| row.tier);
    let source_method = top.map(|row| row.method);
    let source_url = top.map(|row| row.url.clone());

    let library_backed = rule.is_some_and(|r| r.data_type == DataType::Enum)
        && pack
            .components
            .resolve(&provenance.value)
            .is_some_and(|c| c.component_type == field);

    let (color, reason) = match source_tier {
        _ if library_backed => (
            TrafficColor::Green,
            "value matches the component library".to_string(),
        ),
        Some(Tier::One) => (TrafficColor::Green, "tier-1 evidence".to_string()),
        Some(Tier::Two) => (TrafficColor::Yellow, "tier-2 evidence".to_string()),
        Some(tier) => (
            TrafficColor::Red,
            format!("best evidence is {}", tier.name()),
        ),
        None => (TrafficColor::Red, "no evidence rows".to_string()),
    };

    TrafficLight {
        color,
        reason,
        source_tier,
        source_method,
        source_url,
        unknown_reason: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::EvidenceRow;

    fn pack() -> (tempfile::TempDir, std::sync::Arc<RulePack>) {
        let dir = tempfile::TempDir::new().unwrap();
        let root = camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let source = root.join("mouse-tl/_source");
        std::fs::create_dir_all(source.as_std_path()).unwrap();
        std::fs::write(
            source.join("workbook_fields.json").as_std_path(),
            r#"{
                "fields": [
                    {"key": "weight", "data_type": "number"},
                    {"key": "sensor", "data_type": "enum"}
                ],
                "components": {"sensor": [{"canonical_name": "HERO 25K", "maker": "Logitech"}]}
            }"#,
        )
        .unwrap();
        harvest_rules::compile(&root, "mouse-tl", false).unwrap();
        harvest_rules::invalidate_cache(None);
        let pack = harvest_rules::load_rule_pack(&root, "mouse-tl").unwrap();
        (dir, pack)
    }

    fn provenance(value: &str, tier: Option<Tier>) -> FieldProvenance {
        FieldProvenance {
            value: value.to_string(),
            confirmations: 1,
            approved_confirmations: 1,
            pass_target: 1,
            meets_pass_target: value != UNK,
            confidence: 0.8,
            evidence: tier
                .map(|tier| {
                    vec![EvidenceRow {
                        tier,
                        tier_name: tier.name().to_string(),
                        method: Method::Dom,
                        url: "https://x.example/p".to_string(),
                        quote: None,
                    }]
                })
                .unwrap_or_default(),
        }
    }

    #[test]
    fn tier_one_is_green() {
        let (_dir, pack) = pack();
        let light = traffic_light("weight", &provenance("63", Some(Tier::One)), &pack);
        assert_eq!(light.color, TrafficColor::Green);
        assert_eq!(light.source_tier, Some(Tier::One));
        assert_eq!(light.source_url.as_deref(), Some("https://x.example/p"));
    }

    #[test]
    fn tier_two_is_yellow_tier_three_red() {
        let (_dir, pack) = pack();
        assert_eq!(
            traffic_light("weight", &provenance("63", Some(Tier::Two)), &pack).color,
            TrafficColor::Yellow
        );
        assert_eq!(
            traffic_light("weight", &provenance("63", Some(Tier::Three)), &pack).color,
            TrafficColor::Red
        );
    }

    #[test]
    fn component_library_backed_is_green_regardless_of_tier() {
        let (_dir, pack) = pack();
        let light = traffic_light("sensor", &provenance("HERO 25K", Some(Tier::Three)), &pack);
        assert_eq!(light.color, TrafficColor::Green);
        assert!(light.reason.contains("component library"));
    }

    #[test]
    fn unk_is_red_with_unknown_reason() {
        let (_dir, pack) = pack();
        let light = traffic_light("weight", &provenance(UNK, None), &pack);
        assert_eq!(light.color, TrafficColor::Red);
        assert_eq!(
            light.unknown_reason.as_deref(),
            Some("not_found_after_search")
        );
    }
}
