//! Run-artifact storage.
//!
//! The object-store backend is external; [`RunStore`] is the seam and the
//! filesystem implementation ships for local runs and tests. Artifacts land
//! under `final/<category>/<brand>/<model>/runs/<run_id>/`.

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use std::collections::BTreeMap;

use harvest_consensus::{ConsensusResult, NormalizedRecord};
use harvest_util::{to_canonical_json, write_file_atomic};

use crate::summary::RoundSummary;

/// One source line for `evidence/sources.jsonl`.
#[derive(Debug, Clone, Serialize)]
pub struct SourceLine {
    pub index: usize,
    pub url: String,
    pub host: String,
    pub tier: harvest_plan::Tier,
    pub role: harvest_plan::Role,
    pub approved: bool,
    pub outcome: String,
    pub candidates: usize,
}

/// Everything written at the end of a run.
#[derive(Debug, Clone)]
pub struct RunArtifacts {
    pub record: NormalizedRecord,
    pub consensus: ConsensusResult,
    pub summary: RoundSummary,
    pub sources: Vec<SourceLine>,
    pub field_order: Vec<String>,
}

/// Storage seam for run artifacts.
pub trait RunStore: Send + Sync {
    fn write_run(
        &self,
        category: &str,
        brand: &str,
        model: &str,
        run_id: &str,
        artifacts: &RunArtifacts,
    ) -> Result<()>;
}

/// Filesystem store rooted at a local directory.
pub struct FsRunStore {
    root: Utf8PathBuf,
}

impl FsRunStore {
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `final/<category>/<brand>/<model>/runs/<run_id>/`.
    #[must_use]
    pub fn run_dir(&self, category: &str, brand: &str, model: &str, run_id: &str) -> Utf8PathBuf {
        self.root
            .join("final")
            .join(slug(category))
            .join(slug(brand))
            .join(slug(model))
            .join("runs")
            .join(run_id)
    }
}

impl RunStore for FsRunStore {
    fn write_run(
        &self,
        category: &str,
        brand: &str,
        model: &str,
        run_id: &str,
        artifacts: &RunArtifacts,
    ) -> Result<()> {
        let dir = self.run_dir(category, brand, model, run_id);

        write_json(&dir.join("normalized.json"), &artifacts.record)?;
        write_json(
            &dir.join("provenance.json"),
            &artifacts.consensus.fields,
        )?;
        write_json(
            &dir.join("candidates.json"),
            &artifacts.consensus.candidates_by_field,
        )?;
        write_json(&dir.join("summary.json"), &artifacts.summary)?;

        let mut jsonl = String::new();
        for line in &artifacts.sources {
            jsonl.push_str(&serde_json::to_string(line).context("failed to serialize source line")?);
            jsonl.push('\n');
        }
        write_file_atomic(&dir.join("evidence").join("sources.jsonl"), &jsonl)?;

        write_file_atomic(&dir.join("summary.md"), &render_summary_md(artifacts))?;
        write_file_atomic(
            &dir.join("record.tsv"),
            &render_tsv_row(&artifacts.record.fields, &artifacts.field_order),
        )?;

        Ok(())
    }
}

fn write_json<T: Serialize>(path: &Utf8Path, value: &T) -> Result<()> {
    write_file_atomic(path, &to_canonical_json(value)?)
}

fn slug(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    let mut last_dash = false;
    for ch in part.chars() {
        let lower = ch.to_ascii_lowercase();
        if lower.is_ascii_alphanumeric() {
            out.push(lower);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out.trim_matches('-').to_string()
}

/// Single TSV line in field order; `unk` for absent fields.
#[must_use]
pub fn render_tsv_row(fields: &BTreeMap<String, String>, field_order: &[String]) -> String {
    let mut row: Vec<&str> = Vec::with_capacity(field_order.len());
    for field in field_order {
        row.push(fields.get(field).map_or("unk", String::as_str));
    }
    let mut line = row.join("\t");
    line.push('\n');
    line
}

fn render_summary_md(artifacts: &RunArtifacts) -> String {
    let record = &artifacts.record;
    let mut out = String::new();
    out.push_str(&format!(
        "# {} {} {}\n\n",
        record.brand, record.model, record.variant
    ));
    out.push_str(&format!(
        "- validated: {} ({})\n- confidence: {:.2}\n- completeness: {:.2}\n- sources: {} ({} approved)\n\n",
        record.quality.validated,
        artifacts.summary.validated_reason,
        record.quality.confidence,
        record.quality.completeness_required,
        record.source_summary.total,
        record.source_summary.approved,
    ));
    out.push_str("| field | value |\n|---|---|\n");
    for field in &artifacts.field_order {
        if let Some(value) = record.fields.get(field) {
            out.push_str(&format!("| {field} | {value} |\n"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_consensus::{GateInputs, Quality, SourceSummary, run_gate_stack};

    fn record() -> NormalizedRecord {
        NormalizedRecord {
            id: "m1".into(),
            brand: "Logitech".into(),
            model: "G Pro X".into(),
            base_model: "G Pro X".into(),
            variant: "Superlight".into(),
            category: "mouse".into(),
            sku: None,
            quality: Quality {
                validated: true,
                confidence: 0.9,
                completeness_required: 1.0,
                coverage_overall: 1.0,
                notes: Vec::new(),
            },
            fields: [
                ("weight".to_string(), "63".to_string()),
                ("sensor".to_string(), "HERO 25K".to_string()),
            ]
            .into(),
            traffic_light: BTreeMap::new(),
            source_summary: SourceSummary {
                total: 2,
                approved: 2,
                identity_matched: 2,
            },
        }
    }

    #[test]
    fn run_layout_and_artifacts() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let store = FsRunStore::new(root.clone());

        let gates = run_gate_stack(&GateInputs {
            identity_certainty: 1.0,
            completeness_required: 1.0,
            target_completeness: 0.8,
            confidence: 0.9,
            target_confidence: 0.7,
            ..GateInputs::default()
        });
        assert!(gates.validated);

        let artifacts = RunArtifacts {
            record: record(),
            consensus: ConsensusResult::default(),
            summary: RoundSummary::default(),
            sources: vec![],
            field_order: vec!["sensor".to_string(), "weight".to_string()],
        };
        store
            .write_run("mouse", "Logitech", "G Pro X", "run-0001", &artifacts)
            .unwrap();

        let run_dir = root.join("final/mouse/logitech/g-pro-x/runs/run-0001");
        for name in [
            "normalized.json",
            "provenance.json",
            "candidates.json",
            "summary.json",
            "summary.md",
            "record.tsv",
        ] {
            assert!(run_dir.join(name).exists(), "missing {name}");
        }
        assert!(run_dir.join("evidence/sources.jsonl").exists());

        let tsv = std::fs::read_to_string(run_dir.join("record.tsv").as_std_path()).unwrap();
        assert_eq!(tsv, "HERO 25K\t63\n");
    }

    #[test]
    fn tsv_uses_field_order_with_unk_fill() {
        let fields: BTreeMap<String, String> = [("weight".to_string(), "63".to_string())].into();
        let order = vec!["sensor".to_string(), "weight".to_string()];
        assert_eq!(render_tsv_row(&fields, &order), "unk\t63\n");
    }

    #[test]
    fn slugs_are_path_safe() {
        assert_eq!(slug("G Pro X"), "g-pro-x");
        assert_eq!(slug("Logitech"), "logitech");
        assert_eq!(slug("  weird//name  "), "weird-name");
    }
}
