//! Field-rules compiler and loader.
//!
//! A category's rule pack is built deterministically from its workbook
//! sources into `_generated/`, inventoried by a SHA-256 manifest, and served
//! to the runtime through a signature-validated process-wide cache.

pub mod compile;
pub mod derive;
pub mod diff;
pub mod loader;
pub mod migrate;
pub mod model;
pub mod normalize;
pub mod paths;
pub mod report;
pub mod schema;
pub mod validate;
pub mod watch;
pub mod workbook;

pub use compile::{CompileReport, compile};
pub use diff::{DiffClassification, RulesDiffReport, rules_diff};
pub use loader::{ComponentDb, RulePack, invalidate_cache, load_rule_pack};
pub use migrate::apply_key_migrations;
pub use model::{
    Availability, DataType, Difficulty, FieldRule, KnownValueSet, Manifest, OutputShape, Range,
    RequiredLevel,
};
pub use normalize::normalize_field_key;
pub use validate::{ValidationReport, validate};
pub use watch::{WatchOptions, WatchSummary, watch_compile};
