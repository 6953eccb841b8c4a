//! Identity observation and certainty.
//!
//! Each source's page text yields an [`IdentityObservation`]; certainty
//! combines brand match, model-phrase match, SKU match, and variant token
//! coverage across approved sources. Fixed weights: brand 0.40, model 0.35,
//! SKU 0.15, variant 0.10 (SKU weight folds into brand/model when the lock
//! carries no SKU).

use serde::{Deserialize, Serialize};

use crate::job::IdentityLock;

/// What one source said about the product's identity.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct IdentityObservation {
    pub approved: bool,
    pub brand_match: bool,
    pub model_match: bool,
    /// `None` when the lock carries no SKU.
    pub sku_match: Option<bool>,
    /// Fraction of variant tokens present, zeroed on a successor-version hit.
    pub variant_coverage: f64,
}

/// Observe identity signals in one page's text.
#[must_use]
pub fn observe_identity(text: &str, approved: bool, lock: &IdentityLock) -> IdentityObservation {
    let haystack = text.to_ascii_lowercase();

    let brand = lock.brand.to_ascii_lowercase();
    let brand_match = !brand.is_empty() && haystack.contains(&brand);

    let model = lock.model.to_ascii_lowercase();
    let model_match = !model.is_empty() && haystack.contains(&model);

    let sku_match = lock.sku.as_ref().map(|sku| {
        let sku = sku.to_ascii_lowercase();
        !sku.is_empty() && haystack.contains(&sku)
    });

    let variant_coverage = variant_coverage(&haystack, &lock.variant);

    IdentityObservation {
        approved,
        brand_match,
        model_match,
        sku_match,
        variant_coverage,
    }
}

/// Token coverage of the variant phrase, with a successor guard: a variant
/// phrase immediately followed by a digit (`"Superlight 2"` when the lock
/// says `"Superlight"`) counts as zero: that page is a different product.
fn variant_coverage(haystack: &str, variant: &str) -> f64 {
    let variant = variant.trim().to_ascii_lowercase();
    if variant.is_empty() {
        return 1.0;
    }

    if let Some(pos) = haystack.find(&variant) {
        let tail = &haystack[pos + variant.len()..];
        let next = tail.trim_start().chars().next();
        if next.is_some_and(|c| c.is_ascii_digit()) {
            return 0.0;
        }
    }

    let tokens: Vec<&str> = variant.split_whitespace().collect();
    if tokens.is_empty() {
        return 1.0;
    }
    let hit = tokens
        .iter()
        .filter(|token| haystack.contains(*token))
        .count();
    hit as f64 / tokens.len() as f64
}

const W_BRAND: f64 = 0.40;
const W_MODEL: f64 = 0.35;
const W_SKU: f64 = 0.15;
const W_VARIANT: f64 = 0.10;

/// Combine observations into the run's identity certainty. Only approved
/// sources contribute; each component takes its best value across them.
#[must_use]
pub fn identity_certainty(observations: &[IdentityObservation]) -> f64 {
    let approved: Vec<&IdentityObservation> =
        observations.iter().filter(|o| o.approved).collect();
    if approved.is_empty() {
        return 0.0;
    }

    let brand = approved.iter().any(|o| o.brand_match);
    let model = approved.iter().any(|o| o.model_match);
    let variant = approved
        .iter()
        .map(|o| o.variant_coverage)
        .fold(0.0_f64, f64::max);

    let has_sku = approved.iter().any(|o| o.sku_match.is_some());
    let certainty = if has_sku {
        let sku = approved.iter().any(|o| o.sku_match == Some(true));
        W_BRAND * f64::from(brand as u8)
            + W_MODEL * f64::from(model as u8)
            + W_SKU * f64::from(sku as u8)
            + W_VARIANT * variant
    } else {
        // No SKU in the lock: its weight folds into brand and model.
        (W_BRAND + 0.05) * f64::from(brand as u8)
            + (W_MODEL + 0.10) * f64::from(model as u8)
            + W_VARIANT * variant
    };
    certainty.clamp(0.0, 1.0)
}

/// Count approved sources whose observation fully matches the identity.
#[must_use]
pub fn sources_identity_matched(observations: &[IdentityObservation]) -> usize {
    observations
        .iter()
        .filter(|o| o.approved && o.brand_match && o.model_match && o.variant_coverage >= 1.0)
        .count()
}
