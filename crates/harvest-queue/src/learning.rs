//! Learning stores: URL memory, domain-field yield, field anchors, and the
//! component lexicon. Append-only JSON documents with upsert semantics.

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use harvest_engine::LearningSignal;
use harvest_util::{to_canonical_json, write_file_atomic};

/// URL memory row: which fields a URL has yielded, across which runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UrlMemoryEntry {
    pub field_counts: BTreeMap<String, u32>,
    pub categories: BTreeSet<String>,
    pub runs_seen: u32,
}

/// Domain × field yield counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct YieldRow {
    pub seen: u32,
    pub used: u32,
}

impl YieldRow {
    /// Yield score in `[0,1]`, consumed by the planner's ordering.
    #[must_use]
    pub fn score(self) -> f64 {
        if self.seen == 0 {
            0.0
        } else {
            f64::from(self.used) / f64::from(self.seen)
        }
    }
}

/// Alias row in the component lexicon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AliasRow {
    pub canonical: String,
    pub count: u32,
}

/// All four stores, file-backed under one directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearningState {
    /// url → memory entry.
    pub url_memory: BTreeMap<String, UrlMemoryEntry>,
    /// `domain|field` → counters.
    pub domain_field_yield: BTreeMap<String, YieldRow>,
    /// `field|category` → phrase frequencies.
    pub field_anchors: BTreeMap<String, BTreeMap<String, u32>>,
    /// component type → alias rows.
    pub component_lexicon: BTreeMap<String, BTreeMap<String, AliasRow>>,
}

impl LearningState {
    /// Apply one batch of run signals; upsert-only, nothing is removed.
    pub fn apply(&mut self, signals: &[LearningSignal]) {
        for signal in signals {
            match signal {
                LearningSignal::UrlYield {
                    url,
                    field,
                    category,
                } => {
                    let entry = self.url_memory.entry(url.clone()).or_default();
                    *entry.field_counts.entry(field.clone()).or_insert(0) += 1;
                    entry.categories.insert(category.clone());
                    entry.runs_seen += 1;
                }
                LearningSignal::DomainFieldYield {
                    domain,
                    field,
                    used,
                } => {
                    let row = self
                        .domain_field_yield
                        .entry(format!("{domain}|{field}"))
                        .or_default();
                    row.seen += 1;
                    if *used {
                        row.used += 1;
                    }
                }
                LearningSignal::FieldAnchorPhrase {
                    field,
                    category,
                    phrase,
                } => {
                    *self
                        .field_anchors
                        .entry(format!("{field}|{category}"))
                        .or_default()
                        .entry(phrase.clone())
                        .or_insert(0) += 1;
                }
                LearningSignal::ComponentAlias {
                    component_type,
                    alias,
                    canonical,
                } => {
                    let row = self
                        .component_lexicon
                        .entry(component_type.clone())
                        .or_default()
                        .entry(alias.clone())
                        .or_insert_with(|| AliasRow {
                            canonical: canonical.clone(),
                            count: 0,
                        });
                    row.count += 1;
                }
            }
        }
    }

    /// Aggregate yield score for a root domain across fields, fed to the
    /// planner.
    #[must_use]
    pub fn domain_score(&self, domain: &str) -> f64 {
        let prefix = format!("{domain}|");
        let rows: Vec<&YieldRow> = self
            .domain_field_yield
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(_, row)| row)
            .collect();
        if rows.is_empty() {
            return 0.0;
        }
        rows.iter().map(|r| r.score()).sum::<f64>() / rows.len() as f64
    }
}

/// File-backed wrapper.
pub struct LearningFile {
    path: Utf8PathBuf,
}

impl LearningFile {
    #[must_use]
    pub fn new(dir: &Utf8Path, category: &str) -> Self {
        Self {
            path: dir.join(format!("learning-{category}.json")),
        }
    }

    pub fn load(&self) -> Result<LearningState> {
        if !self.path.exists() {
            return Ok(LearningState::default());
        }
        let raw = std::fs::read_to_string(self.path.as_std_path())
            .with_context(|| format!("failed to read learning state: {}", self.path))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse learning state: {}", self.path))
    }

    /// Load, apply, and atomically persist.
    pub fn record(&self, signals: &[LearningSignal]) -> Result<LearningState> {
        let mut state = self.load()?;
        state.apply(signals);
        write_file_atomic(&self.path, &to_canonical_json(&state)?)?;
        debug!(path = %self.path, signals = signals.len(), "learning state updated");
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn signals() -> Vec<LearningSignal> {
        vec![
            LearningSignal::UrlYield {
                url: "https://maker.example/specs".into(),
                field: "weight".into(),
                category: "mouse".into(),
            },
            LearningSignal::DomainFieldYield {
                domain: "maker.example".into(),
                field: "weight".into(),
                used: true,
            },
            LearningSignal::DomainFieldYield {
                domain: "blog.example".into(),
                field: "*".into(),
                used: false,
            },
            LearningSignal::FieldAnchorPhrase {
                field: "weight".into(),
                category: "mouse".into(),
                phrase: "Weight: 63 g".into(),
            },
            LearningSignal::ComponentAlias {
                component_type: "sensor".into(),
                alias: "Hero25K".into(),
                canonical: "HERO 25K".into(),
            },
        ]
    }

    #[test]
    fn apply_upserts_all_four_stores() {
        let mut state = LearningState::default();
        state.apply(&signals());
        state.apply(&signals());

        let url = &state.url_memory["https://maker.example/specs"];
        assert_eq!(url.field_counts["weight"], 2);
        assert_eq!(url.runs_seen, 2);

        let yield_row = state.domain_field_yield["maker.example|weight"];
        assert_eq!(yield_row.seen, 2);
        assert_eq!(yield_row.used, 2);
        assert_eq!(yield_row.score(), 1.0);
        assert_eq!(state.domain_field_yield["blog.example|*"].score(), 0.0);

        assert_eq!(state.field_anchors["weight|mouse"]["Weight: 63 g"], 2);
        assert_eq!(
            state.component_lexicon["sensor"]["Hero25K"].canonical,
            "HERO 25K"
        );
    }

    #[test]
    fn domain_score_aggregates_fields() {
        let mut state = LearningState::default();
        state.apply(&signals());
        assert_eq!(state.domain_score("maker.example"), 1.0);
        assert_eq!(state.domain_score("blog.example"), 0.0);
        assert_eq!(state.domain_score("unseen.example"), 0.0);
    }

    #[test]
    fn file_round_trip_persists_counts() {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let file = LearningFile::new(&root, "mouse");

        file.record(&signals()).unwrap();
        let state = file.record(&signals()).unwrap();
        assert_eq!(state.url_memory["https://maker.example/specs"].runs_seen, 2);

        let reloaded = file.load().unwrap();
        assert_eq!(
            reloaded.domain_field_yield["maker.example|weight"].seen,
            2
        );
    }
}
