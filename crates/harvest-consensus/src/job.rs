//! Job input: the identity lock, anchors, and run requirements.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// The brand/model/variant (and optional SKU) the pipeline must not mutate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityLock {
    pub brand: String,
    pub model: String,
    #[serde(default)]
    pub variant: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
}

impl IdentityLock {
    /// Field keys the lock protects from extraction.
    #[must_use]
    pub fn locked_fields(&self) -> BTreeSet<String> {
        let mut fields: BTreeSet<String> = ["brand", "model", "variant", "base_model"]
            .into_iter()
            .map(str::to_string)
            .collect();
        if self.sku.is_some() {
            fields.insert("sku".to_string());
        }
        fields
    }
}

/// Per-job quality targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Requirements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_fields: Option<Vec<String>>,
    #[serde(default = "default_completeness")]
    pub target_completeness: f64,
    #[serde(default = "default_confidence")]
    pub target_confidence: f64,
}

fn default_completeness() -> f64 {
    0.8
}

fn default_confidence() -> f64 {
    0.7
}

impl Default for Requirements {
    fn default() -> Self {
        Self {
            required_fields: None,
            target_completeness: default_completeness(),
            target_confidence: default_confidence(),
        }
    }
}

/// One extraction job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub product_id: String,
    pub category: String,
    pub identity_lock: IdentityLock,
    #[serde(default)]
    pub anchors: BTreeMap<String, String>,
    #[serde(default)]
    pub requirements: Requirements,
}

impl Job {
    /// Fields excluded from the consensus input set: identity-locked plus
    /// anchor-locked.
    #[must_use]
    pub fn locked_fields(&self) -> BTreeSet<String> {
        let mut fields = self.identity_lock.locked_fields();
        fields.extend(self.anchors.keys().cloned());
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_json_round_trips_camel_case() {
        let raw = r#"{
            "productId": "m1",
            "category": "mouse",
            "identityLock": {"brand": "Logitech", "model": "G Pro X", "variant": "Superlight"},
            "anchors": {"weight": "63"},
            "requirements": {"targetCompleteness": 0.9}
        }"#;
        let job: Job = serde_json::from_str(raw).unwrap();
        assert_eq!(job.product_id, "m1");
        assert_eq!(job.identity_lock.variant, "Superlight");
        assert!((job.requirements.target_completeness - 0.9).abs() < 1e-9);
        assert!((job.requirements.target_confidence - 0.7).abs() < 1e-9);

        let locked = job.locked_fields();
        assert!(locked.contains("brand"));
        assert!(locked.contains("weight"));
        assert!(!locked.contains("sku"));
    }
}
