//! Evidence-pack assembly: the structured prompt payload for LLM extraction.
//!
//! The send policy is accuracy-max: every target field gets its contract
//! slice; high-stakes fields additionally get prime-source snippets across
//! distinct hosts and tiers, current state when repairing, and full
//! constraint slices. Raw HTML is never sent.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use harvest_plan::{Source, Tier};
use harvest_rules::model::{CrossValidationRule, Range, RequiredLevel};
use harvest_rules::RulePack;

use crate::llm::Message;

/// Cap on enum options sent per field.
const MAX_ENUM_OPTIONS: usize = 24;
/// Cap on known component entities sent per field.
const MAX_KNOWN_ENTITIES: usize = 24;
/// Cap on prime snippets per pack.
const MAX_SNIPPETS: usize = 8;

/// Contract slice for one target field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSlice {
    pub field: String,
    pub data_type: String,
    pub output_shape: String,
    pub required_level: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub evidence: EvidenceRequirement,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enum_options: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub known_entities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EvidenceRequirement {
    pub required: bool,
    pub min_refs: u32,
}

/// A text snippet from a prime source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimeSnippet {
    pub url: String,
    pub host: String,
    pub tier: Tier,
    pub text: String,
}

/// Current accepted state for a field, sent when repairing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldState {
    pub value: String,
    pub confidence: f64,
    pub evidence_count: u32,
}

/// The structured payload handed to the LLM adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvidencePack {
    pub fields: Vec<FieldSlice>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub snippets: Vec<PrimeSnippet>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub state: BTreeMap<String, FieldState>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<CrossValidationRule>,
}

/// Candidate snippet input: text already extracted from a source (never raw
/// HTML).
#[derive(Debug, Clone)]
pub struct SnippetInput {
    pub source: Source,
    pub text: String,
}

/// Build the evidence pack for this round's target fields.
#[must_use]
pub fn build_evidence_pack(
    rule_pack: &RulePack,
    target_fields: &[String],
    snippets: &[SnippetInput],
    state: &BTreeMap<String, FieldState>,
) -> EvidencePack {
    let mut fields = Vec::new();
    let mut high_stakes = false;

    for field in target_fields {
        let Some(rule) = rule_pack.field_rules.fields.get(field) else {
            continue;
        };

        let enum_options: Vec<String> = rule_pack
            .known_values
            .enums
            .get(field)
            .map(|set| set.values.iter().take(MAX_ENUM_OPTIONS).cloned().collect())
            .unwrap_or_default();

        // Component-backed fields get the library's canonical names.
        let known_entities: Vec<String> = rule_pack
            .components
            .canonical_names(field)
            .into_iter()
            .take(MAX_KNOWN_ENTITIES)
            .collect();

        if rule.required_level.is_required() || rule.evidence.min_refs >= 2 {
            high_stakes = true;
        }

        fields.push(FieldSlice {
            field: field.clone(),
            data_type: tag(&rule.data_type),
            output_shape: tag(&rule.output_shape),
            required_level: tag(&rule.required_level),
            description: rule.display_name.clone(),
            unit: rule.parse.as_ref().and_then(|p| p.unit.clone()),
            evidence: EvidenceRequirement {
                required: rule.evidence.required,
                min_refs: rule.evidence.min_refs,
            },
            enum_options,
            known_entities,
            range: rule.contract.range,
        });
    }

    let snippets = if high_stakes {
        select_prime_snippets(snippets)
    } else {
        Vec::new()
    };

    let constraints = if high_stakes {
        let targets: std::collections::BTreeSet<&str> =
            target_fields.iter().map(String::as_str).collect();
        rule_pack
            .cross_validation
            .rules
            .iter()
            .filter(|r| {
                targets.contains(r.trigger_field.as_str())
                    || r.fields.iter().any(|f| targets.contains(f.as_str()))
            })
            .cloned()
            .collect()
    } else {
        Vec::new()
    };

    let state = state
        .iter()
        .filter(|(field, _)| target_fields.contains(field))
        .map(|(field, s)| (field.clone(), s.clone()))
        .collect();

    EvidencePack {
        fields,
        snippets,
        state,
        constraints,
    }
}

/// Prime-snippet selection: one per host first (diversity), better tiers
/// first, bounded.
fn select_prime_snippets(inputs: &[SnippetInput]) -> Vec<PrimeSnippet> {
    let mut ordered: Vec<&SnippetInput> = inputs.iter().collect();
    ordered.sort_by(|a, b| {
        b.source
            .tier
            .rank()
            .cmp(&a.source.tier.rank())
            .then_with(|| a.source.host.cmp(&b.source.host))
    });

    let mut seen_hosts = std::collections::HashSet::new();
    let mut picked: Vec<PrimeSnippet> = Vec::new();

    for input in &ordered {
        if picked.len() >= MAX_SNIPPETS {
            break;
        }
        if seen_hosts.insert(input.source.host.clone()) {
            picked.push(to_snippet(input));
        }
    }
    // Second pass fills remaining slots with repeat hosts.
    for input in &ordered {
        if picked.len() >= MAX_SNIPPETS {
            break;
        }
        let snippet = to_snippet(input);
        if !picked
            .iter()
            .any(|p| p.url == snippet.url && p.text == snippet.text)
        {
            picked.push(snippet);
        }
    }
    picked
}

fn to_snippet(input: &SnippetInput) -> PrimeSnippet {
    PrimeSnippet {
        url: input.source.url.clone(),
        host: input.source.host.clone(),
        tier: input.source.tier,
        text: input.text.clone(),
    }
}

/// Render the pack as adapter messages: a fixed system preamble plus the
/// JSON payload.
#[must_use]
pub fn render_messages(pack: &EvidencePack) -> Vec<Message> {
    let payload = serde_json::to_string_pretty(pack).unwrap_or_else(|_| "{}".to_string());
    vec![
        Message::system(
            "You extract product specification fields. Answer with a JSON array of \
             {field, value, quote, key_path} objects. Every value must be backed by a \
             verbatim quote from the provided snippets. Only use the listed fields.",
        ),
        Message::user(payload),
    ]
}

fn tag<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

/// High-stakes shorthand used by callers assembling repair rounds.
#[must_use]
pub fn is_high_stakes(rule_pack: &RulePack, field: &str) -> bool {
    rule_pack.field_rules.fields.get(field).is_some_and(|rule| {
        matches!(
            rule.required_level,
            RequiredLevel::Required | RequiredLevel::Critical
        ) || rule.evidence.min_refs >= 2
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_plan::SourceRegistry;
    use harvest_rules::compile::compile;
    use harvest_rules::loader::{invalidate_cache, load_rule_pack};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn pack() -> (TempDir, Arc<RulePack>) {
        let dir = TempDir::new().unwrap();
        let root = camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let source = root.join("mouse-pack/_source");
        std::fs::create_dir_all(source.as_std_path()).unwrap();
        std::fs::write(
            source.join("workbook_fields.json").as_std_path(),
            r#"{
                "fields": [
                    {"key": "sensor", "data_type": "enum", "required_level": "critical"},
                    {"key": "weight", "data_type": "number", "required_level": "required",
                     "range": {"min": 20, "max": 250}},
                    {"key": "color", "required_level": "optional"}
                ],
                "enums": {"fields": {"sensor": ["HERO 25K", "Focus Pro 30K"]}},
                "components": {"sensor": [{"canonical_name": "HERO 25K", "maker": "Logitech"}]}
            }"#,
        )
        .unwrap();
        compile(&root, "mouse-pack", false).unwrap();
        invalidate_cache(None);
        let p = load_rule_pack(&root, "mouse-pack").unwrap();
        (dir, p)
    }

    fn snippet(url: &str, tier: Tier, text: &str) -> SnippetInput {
        let registry = SourceRegistry::default();
        let mut source = Source::from_url(url, &registry).unwrap();
        source.tier = tier;
        SnippetInput {
            source,
            text: text.to_string(),
        }
    }

    #[test]
    fn high_stakes_fields_pull_snippets_and_constraints() {
        let (_dir, rule_pack) = pack();
        let snippets = vec![
            snippet("https://a.example/specs", Tier::Two, "Weight: 63 g"),
            snippet("https://b.example/review", Tier::One, "weighs 63 grams"),
        ];
        let evidence = build_evidence_pack(
            &rule_pack,
            &["weight".to_string(), "sensor".to_string()],
            &snippets,
            &BTreeMap::new(),
        );

        assert_eq!(evidence.fields.len(), 2);
        // Tier 1 host leads the snippet list.
        assert_eq!(evidence.snippets[0].host, "b.example");
        // weight's range rule rides along.
        assert!(evidence.constraints.iter().any(|r| r.rule_id == "range_weight"));

        let sensor = evidence.fields.iter().find(|f| f.field == "sensor").unwrap();
        assert_eq!(sensor.enum_options.len(), 2);
        assert_eq!(sensor.known_entities, vec!["HERO 25K"]);
        assert_eq!(sensor.evidence.min_refs, 2);
    }

    #[test]
    fn low_stakes_packs_stay_lean() {
        let (_dir, rule_pack) = pack();
        let snippets = vec![snippet("https://a.example/p", Tier::Two, "colour: black")];
        let evidence = build_evidence_pack(
            &rule_pack,
            &["color".to_string()],
            &snippets,
            &BTreeMap::new(),
        );
        assert!(evidence.snippets.is_empty());
        assert!(evidence.constraints.is_empty());
    }

    #[test]
    fn repair_state_rides_only_for_targets() {
        let (_dir, rule_pack) = pack();
        let mut state = BTreeMap::new();
        state.insert(
            "weight".to_string(),
            FieldState {
                value: "63".into(),
                confidence: 0.4,
                evidence_count: 1,
            },
        );
        state.insert(
            "sensor".to_string(),
            FieldState {
                value: "HERO 25K".into(),
                confidence: 0.9,
                evidence_count: 2,
            },
        );

        let evidence =
            build_evidence_pack(&rule_pack, &["weight".to_string()], &[], &state);
        assert!(evidence.state.contains_key("weight"));
        assert!(!evidence.state.contains_key("sensor"));
    }

    #[test]
    fn rendered_messages_carry_no_html() {
        let (_dir, rule_pack) = pack();
        let snippets = vec![snippet(
            "https://a.example/specs",
            Tier::One,
            "Weight: 63 g",
        )];
        let evidence = build_evidence_pack(
            &rule_pack,
            &["weight".to_string()],
            &snippets,
            &BTreeMap::new(),
        );
        let messages = render_messages(&evidence);
        assert_eq!(messages.len(), 2);
        assert!(!messages[1].content.contains('<'));
        assert!(messages[1].content.contains("Weight: 63 g"));
    }

    #[test]
    fn high_stakes_classifier() {
        let (_dir, rule_pack) = pack();
        assert!(is_high_stakes(&rule_pack, "sensor"));
        assert!(is_high_stakes(&rule_pack, "weight"));
        assert!(!is_high_stakes(&rule_pack, "color"));
    }
}
