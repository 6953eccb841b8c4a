//! Rule-pack data model: field rules, derived artifacts, manifest, migrations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Scalar type a field's accepted value must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[default]
    String,
    Number,
    Url,
    Boolean,
    Enum,
}

/// Whether a field accepts one value or a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputShape {
    #[default]
    Scalar,
    List,
}

/// How strongly the category schema demands this field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RequiredLevel {
    Required,
    Expected,
    Critical,
    Editorial,
    Commerce,
    #[default]
    Optional,
}

impl RequiredLevel {
    /// Fields at these levels must not be `'unk'` in a validated record.
    #[must_use]
    pub fn is_required(self) -> bool {
        matches!(self, Self::Required | Self::Critical)
    }
}

/// How often real-world sources carry this field at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    #[default]
    Expected,
    EditorialOnly,
    Sometimes,
    Rare,
}

/// Extraction difficulty class, used to scale round effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[default]
    Easy,
    Medium,
    Hard,
}

/// Inclusive numeric bounds a candidate value must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

/// Value contract attached to a rule. Today only a range; shape-level list
/// rules ride on `OutputShape`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
}

/// One compiled extraction pattern. Strings in source templates are coerced
/// to `{regex, group: 1}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplatePattern {
    pub regex: String,
    pub group: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub convert: Option<String>,
}

impl TemplatePattern {
    #[must_use]
    pub fn from_regex(regex: impl Into<String>) -> Self {
        Self {
            regex: regex.into(),
            group: 1,
            unit: None,
            convert: None,
        }
    }
}

/// Parse block on a field rule: where its patterns come from and how matches
/// are post-processed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<TemplatePattern>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub negative_keywords: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_process: Option<String>,
}

/// Hints handed to the search planner for this field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchHints {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub query_terms: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preferred_content_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domain_hints: Vec<String>,
}

/// Evidence policy for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidencePolicy {
    pub required: bool,
    pub min_refs: u32,
}

impl Default for EvidencePolicy {
    fn default() -> Self {
        Self {
            required: true,
            min_refs: 1,
        }
    }
}

/// Per-category, per-field rule. Every metadata slot is filled at compile
/// time; absent workbook cells get deterministic defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    pub field_key: String,
    pub display_name: String,
    pub group: String,
    pub data_type: DataType,
    pub output_shape: OutputShape,
    pub required_level: RequiredLevel,
    pub availability: Availability,
    pub difficulty: Difficulty,
    pub effort: u8,
    pub evidence: EvidencePolicy,
    pub unknown_reason_default: String,
    #[serde(default, skip_serializing_if = "is_default_contract")]
    pub contract: Contract,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse: Option<ParseSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_max_calls: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_hints: Option<SearchHints>,
    #[serde(default, skip_serializing_if = "is_default_selection")]
    pub selection_policy: SelectionPolicy,
}

fn is_default_selection(policy: &SelectionPolicy) -> bool {
    *policy == SelectionPolicy::Default
}

/// Rule-defined winner-selection override applied at consensus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Confirmation-count voting with the standard tie-breaks.
    #[default]
    Default,
    /// On a confirmation tie, prefer the group whose best evidence carries
    /// the higher trust tier.
    PreferTier,
}

fn is_default_contract(contract: &Contract) -> bool {
    contract.range.is_none()
}

impl FieldRule {
    /// Per-field AI call ceiling; unset rules fall back to the engine default.
    #[must_use]
    pub fn ai_max_calls_or(&self, default: u32) -> u32 {
        self.ai_max_calls.unwrap_or(default)
    }
}

/// The `field_rules.json` artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldRulesArtifact {
    pub category: String,
    pub generated_at: String,
    pub fields: BTreeMap<String, FieldRule>,
}

/// UI catalog entry; drives field ordering and grouping in review surfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiCatalogEntry {
    pub key: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    pub order: u32,
}

/// The `ui_field_catalog.json` artifact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UiFieldCatalog {
    pub generated_at: String,
    pub fields: Vec<UiCatalogEntry>,
}

/// Policy for values outside the known set of an enum field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EnumPolicy {
    /// Unknown values are surfaced as `new_values_proposed` rows.
    #[default]
    Open,
    /// Unknown values are rejected at consensus.
    Closed,
}

/// Normalized known-values entry for one enum field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnownValueSet {
    pub policy: EnumPolicy,
    pub values: Vec<String>,
}

/// The `known_values.json` artifact, always in the tagged form
/// `{enums: {field: {policy, values[]}}}` after load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnownValues {
    pub generated_at: String,
    pub enums: BTreeMap<String, KnownValueSet>,
}

/// Per-field compiled parse template in `parse_templates.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompiledTemplate {
    pub patterns: Vec<TemplatePattern>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub negative_keywords: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_process: Option<String>,
}

/// The `parse_templates.json` artifact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParseTemplates {
    pub generated_at: String,
    pub templates: BTreeMap<String, CompiledTemplate>,
}

/// What happens when a cross-validation rule fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFail {
    RejectCandidate,
    FlagForReview,
}

/// One cross-validation rule in `cross_validation_rules.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossValidationRule {
    pub rule_id: String,
    pub rule_type: String,
    pub trigger_field: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    pub on_fail: OnFail,
}

/// The `cross_validation_rules.json` artifact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrossValidationRules {
    pub generated_at: String,
    pub rules: Vec<CrossValidationRule>,
}

/// The `field_groups.json` artifact: sorted group key → sorted field keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldGroups {
    pub generated_at: String,
    pub groups: BTreeMap<String, Vec<String>>,
}

/// Semver bump class for a key-migrations document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bump {
    Major,
    Minor,
    Patch,
}

/// One migration row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Migration {
    Rename { from: String, to: String },
    Merge { from: Vec<String>, to: String },
    Split { from: String, to: Vec<String> },
    Deprecate { field: String, reason: String },
}

/// The `key_migrations.json` artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyMigrations {
    pub version: String,
    pub previous_version: String,
    pub bump: Bump,
    pub summary: String,
    pub migrations: Vec<Migration>,
    pub key_map: BTreeMap<String, String>,
    pub generated_at: String,
}

/// One manifest row: `(relative_path, sha256, bytes)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

/// The `manifest.json` artifact. Written last, after every other artifact is
/// flushed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub algorithm: String,
    pub artifact_count: usize,
    pub generated_at: String,
    pub artifacts: Vec<ManifestEntry>,
}

/// One component-library entry keyed `"<canonical_name>::<maker>"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentEntry {
    pub canonical_name: String,
    pub maker: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// One `component_db/<type>.json` artifact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentDbFile {
    pub component_type: String,
    pub generated_at: String,
    pub entries: Vec<ComponentEntry>,
}

/// Artifact filenames that make up a rule pack, manifest excluded.
pub const PACK_ARTIFACTS: &[&str] = &[
    "field_rules.json",
    "ui_field_catalog.json",
    "known_values.json",
    "parse_templates.json",
    "cross_validation_rules.json",
    "field_groups.json",
    "key_migrations.json",
];

/// Manifest filename.
pub const MANIFEST_FILE: &str = "manifest.json";
