//! Workbook contract: the parsed output of the external workbook parser.
//!
//! The parser itself lives outside this repo. What it emits, and what
//! `compile` consumes, is the JSON under `_source/`:
//!
//! - `_source/workbook_fields.json`: field rows, template library, enum
//!   seeds, component seeds (this file's [`WorkbookExtract`]).
//! - `_source/seed.json`: optional UI-catalog seed rows.
//! - `_control_plane/workbook_map.json`: sheet-role map. When missing, a
//!   bootstrap fallback map is used and surfaced as a warning.

use anyhow::{Context, Result};
use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{
    Availability, DataType, Difficulty, OutputShape, ParseSpec, Range, RequiredLevel, SearchHints,
    SelectionPolicy, TemplatePattern,
};

/// One raw field row as the parser emitted it. Every metadata cell is
/// optional; normalization fills the blanks.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawFieldRow {
    pub key: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub data_type: Option<DataType>,
    #[serde(default)]
    pub output_shape: Option<OutputShape>,
    #[serde(default)]
    pub required_level: Option<RequiredLevel>,
    #[serde(default)]
    pub availability: Option<Availability>,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
    #[serde(default)]
    pub effort: Option<u8>,
    #[serde(default)]
    pub evidence_required: Option<bool>,
    #[serde(default)]
    pub min_evidence_refs: Option<u32>,
    #[serde(default)]
    pub unknown_reason_default: Option<String>,
    #[serde(default)]
    pub range: Option<Range>,
    #[serde(default, deserialize_with = "de_parse_spec")]
    pub parse: Option<ParseSpec>,
    #[serde(default)]
    pub ai_mode: Option<String>,
    #[serde(default)]
    pub ai_max_calls: Option<u32>,
    #[serde(default)]
    pub search_hints: Option<SearchHints>,
    #[serde(default)]
    pub selection_policy: Option<SelectionPolicy>,
}

/// A template-library entry: named pattern set shared across fields.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TemplateDef {
    #[serde(default, deserialize_with = "de_patterns")]
    pub patterns: Vec<TemplatePattern>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub post_process: Option<String>,
}

/// Seed component entry (pre-normalization).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawComponentEntry {
    pub canonical_name: String,
    #[serde(default)]
    pub maker: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// Parsed workbook payload from `_source/workbook_fields.json`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WorkbookExtract {
    pub fields: Vec<RawFieldRow>,
    #[serde(default)]
    pub template_library: BTreeMap<String, TemplateDef>,
    /// Either `{enums: {field: {policy, values}}}` or the legacy
    /// `{fields: {field: [values]}}`; normalized by the loader.
    #[serde(default)]
    pub enums: serde_json::Value,
    #[serde(default)]
    pub components: BTreeMap<String, Vec<RawComponentEntry>>,
}

/// Optional UI seed rows from `_source/seed.json`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SeedFile {
    #[serde(default)]
    pub ui_field_catalog: Vec<SeedCatalogRow>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SeedCatalogRow {
    pub key: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub order: Option<u32>,
}

/// Sheet-role map from `_control_plane/workbook_map.json`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkbookMap {
    pub sheets: BTreeMap<String, SheetRole>,
    /// True when this map was synthesized because the control-plane file was
    /// missing. Surfaced as a `workbook_map_missing` warning, never an error.
    #[serde(default)]
    pub bootstrap_fallback: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SheetRole {
    pub role: String,
    #[serde(default)]
    pub header_row: Option<u32>,
    #[serde(default)]
    pub value_col_start: Option<u32>,
    /// Blank in bootstrap maps; the external parser auto-detects the end
    /// column, so this stays `None` here.
    #[serde(default)]
    pub value_col_end: Option<u32>,
}

impl WorkbookMap {
    /// The bootstrap map used when `_control_plane/workbook_map.json` does
    /// not exist.
    #[must_use]
    pub fn bootstrap() -> Self {
        let mut sheets = BTreeMap::new();
        sheets.insert(
            "fields".to_string(),
            SheetRole {
                role: "field_rules".to_string(),
                header_row: Some(1),
                value_col_start: Some(2),
                value_col_end: None,
            },
        );
        sheets.insert(
            "enums".to_string(),
            SheetRole {
                role: "known_values".to_string(),
                header_row: Some(1),
                value_col_start: Some(2),
                value_col_end: None,
            },
        );
        Self {
            sheets,
            bootstrap_fallback: true,
        }
    }
}

/// Everything `compile` needs, read off disk in one shot.
#[derive(Debug, Clone)]
pub struct CategorySources {
    pub extract: WorkbookExtract,
    pub seed: SeedFile,
    pub map: WorkbookMap,
    pub warnings: Vec<String>,
}

/// Load the category's source inputs. Missing `workbook_fields.json` is a
/// hard error; missing seed or map fall back with warnings.
pub fn load_category_sources(category_root: &Utf8Path) -> Result<CategorySources> {
    let mut warnings = Vec::new();

    let fields_path = category_root.join("_source").join("workbook_fields.json");
    let raw = std::fs::read_to_string(&fields_path)
        .with_context(|| format!("missing or invalid workbook source: {fields_path}"))?;
    let extract: WorkbookExtract = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse workbook source: {fields_path}"))?;

    let seed_path = category_root.join("_source").join("seed.json");
    let seed = if seed_path.exists() {
        let raw = std::fs::read_to_string(&seed_path)
            .with_context(|| format!("failed to read seed: {seed_path}"))?;
        serde_json::from_str(&raw).with_context(|| format!("failed to parse seed: {seed_path}"))?
    } else {
        SeedFile::default()
    };

    let map_path = category_root
        .join("_control_plane")
        .join("workbook_map.json");
    let map = if map_path.exists() {
        let raw = std::fs::read_to_string(&map_path)
            .with_context(|| format!("failed to read workbook map: {map_path}"))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse workbook map: {map_path}"))?
    } else {
        warnings.push("workbook_map_missing: using bootstrap fallback map".to_string());
        WorkbookMap::bootstrap()
    };

    Ok(CategorySources {
        extract,
        seed,
        map,
        warnings,
    })
}

fn de_patterns<'de, D>(deserializer: D) -> Result<Vec<TemplatePattern>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PatternOrString {
        Str(String),
        Obj(TemplatePattern),
    }

    let raw: Vec<PatternOrString> = Vec::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|p| match p {
            PatternOrString::Str(s) => TemplatePattern::from_regex(s),
            PatternOrString::Obj(o) => o,
        })
        .collect())
}

fn de_parse_spec<'de, D>(deserializer: D) -> Result<Option<ParseSpec>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct RawParse {
        #[serde(default)]
        template: Option<String>,
        #[serde(default, deserialize_with = "de_patterns")]
        patterns: Vec<TemplatePattern>,
        #[serde(default)]
        context_keywords: Vec<String>,
        #[serde(default)]
        negative_keywords: Vec<String>,
        #[serde(default)]
        unit: Option<String>,
        #[serde(default)]
        post_process: Option<String>,
    }

    let raw: Option<RawParse> = Option::deserialize(deserializer)?;
    Ok(raw.map(|r| ParseSpec {
        template: r.template,
        patterns: r.patterns,
        context_keywords: r.context_keywords,
        negative_keywords: r.negative_keywords,
        unit: r.unit,
        post_process: r.post_process,
    }))
}
