//! Harvester: evidence-backed product-record extraction.
//!
//! The pipeline turns a job (`{productId, category, identityLock, anchors}`)
//! into a validated, evidence-backed record: rule packs compiled from
//! category workbooks drive multi-method extraction over planned sources,
//! consensus reconciles candidates under identity/anchor/constraint gates,
//! and a convergence loop re-plans rounds until the record completes or an
//! exhaustion condition fires.
//!
//! This crate is the thin assembly layer: the real work lives in the
//! `harvest-*` workspace crates, re-exported here.

pub use harvest_consensus as consensus;
pub use harvest_engine as engine;
pub use harvest_evidence as evidence;
pub use harvest_extract as extract;
pub use harvest_plan as plan;
pub use harvest_queue as queue;
pub use harvest_rules as rules;
pub use harvest_search as search;
pub use harvest_util as util;

pub use harvest_consensus::Job;
pub use harvest_engine::{EngineConfig, Orchestrator, RunOptions, RunOutcome, RunStatus};
pub use harvest_rules::{CompileReport, RulePack, ValidationReport};
pub use harvest_util::{Envelope, EnvelopeStatus};
