//! Normalized-record assembly, including the aborted form for failed
//! identity.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use harvest_rules::RulePack;
use harvest_rules::model::RequiredLevel;

use crate::gates::{GateOutcome, reason};
use crate::job::Job;
use crate::reconcile::{ConsensusResult, UNK};
use crate::traffic::{TrafficLight, traffic_light};

/// Quality block of a normalized record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quality {
    pub validated: bool,
    pub confidence: f64,
    pub completeness_required: f64,
    pub coverage_overall: f64,
    pub notes: Vec<String>,
}

/// Per-run source accounting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceSummary {
    pub total: usize,
    pub approved: usize,
    pub identity_matched: usize,
}

/// The final artifact for one product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub id: String,
    pub brand: String,
    pub model: String,
    pub base_model: String,
    pub variant: String,
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    pub quality: Quality,
    pub fields: BTreeMap<String, String>,
    pub traffic_light: BTreeMap<String, TrafficLight>,
    #[serde(rename = "sourceSummary")]
    pub source_summary: SourceSummary,
}

/// Note attached when identity could not be locked to the requested product.
pub const MODEL_AMBIGUITY_ALERT: &str = "MODEL_AMBIGUITY_ALERT";

/// Assemble the record. When the identity gate failed, every spec field is
/// withheld (`unk`) and the ambiguity alert is attached; the identity block
/// itself always echoes the job's lock, which extraction can never overwrite.
#[must_use]
pub fn build_record(
    job: &Job,
    pack: &RulePack,
    consensus: &ConsensusResult,
    gates: &GateOutcome,
    aggregate_confidence: f64,
    completeness: f64,
    source_summary: SourceSummary,
) -> NormalizedRecord {
    let identity_failed = !gates.validated && gates.validated_reason == reason::IDENTITY_MISMATCH;

    let mut fields = BTreeMap::new();
    let mut lights = BTreeMap::new();
    let mut covered = 0usize;
    let mut total = 0usize;

    for (field, rule) in &pack.field_rules.fields {
        if rule.required_level == RequiredLevel::Editorial {
            continue;
        }
        total += 1;

        // Anchored values publish as-is; they were never up for vote. A
        // failed identity gate withholds them like every other spec field.
        if !identity_failed {
            if let Some(anchor) = job.anchors.get(field) {
                fields.insert(field.clone(), anchor.clone());
                covered += 1;
                continue;
            }
        }

        let value = if identity_failed {
            UNK.to_string()
        } else {
            consensus
                .fields
                .get(field)
                .map_or_else(|| UNK.to_string(), |p| p.value.clone())
        };
        if value != UNK {
            covered += 1;
        }
        if let Some(provenance) = consensus.fields.get(field) {
            lights.insert(field.clone(), traffic_light(field, provenance, pack));
        }
        fields.insert(field.clone(), value);
    }

    // Anchors outside the pack's field set still publish verbatim, under
    // the same identity-gate condition.
    if !identity_failed {
        for (field, anchor) in &job.anchors {
            fields
                .entry(field.clone())
                .or_insert_with(|| anchor.clone());
        }
    }

    let mut notes = gates.validation_reasons.clone();
    if identity_failed {
        notes.push(MODEL_AMBIGUITY_ALERT.to_string());
    }
    notes.extend(gates.contradictions.iter().cloned());

    let coverage_overall = if total == 0 {
        0.0
    } else {
        covered as f64 / total as f64
    };

    NormalizedRecord {
        id: job.product_id.clone(),
        brand: job.identity_lock.brand.clone(),
        model: job.identity_lock.model.clone(),
        base_model: job.identity_lock.model.clone(),
        variant: job.identity_lock.variant.clone(),
        category: job.category.clone(),
        sku: job.identity_lock.sku.clone(),
        quality: Quality {
            validated: gates.validated,
            confidence: aggregate_confidence,
            completeness_required: completeness,
            coverage_overall,
            notes,
        },
        fields,
        traffic_light: lights,
        source_summary,
    }
}

/// Required-field list for a job: explicit requirement override, else every
/// required/critical field in the pack (anchored fields count as covered, so
/// they stay in the list).
#[must_use]
pub fn required_fields(job: &Job, pack: &RulePack) -> Vec<String> {
    if let Some(explicit) = &job.requirements.required_fields {
        return explicit.clone();
    }
    pack.field_rules
        .fields
        .iter()
        .filter(|(_, rule)| rule.required_level.is_required())
        .map(|(key, _)| key.clone())
        .collect()
}

/// Mean confidence across the required set (anchored fields count as 1.0).
#[must_use]
pub fn aggregate_confidence(job: &Job, consensus: &ConsensusResult, required: &[String]) -> f64 {
    if required.is_empty() {
        return 1.0;
    }
    let total: f64 = required
        .iter()
        .map(|field| {
            if job.anchors.contains_key(field) {
                1.0
            } else {
                consensus.fields.get(field).map_or(0.0, |p| p.confidence)
            }
        })
        .sum();
    total / required.len() as f64
}
