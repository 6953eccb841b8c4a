//! Consensus and quality gating: reconciliation, confidence, traffic lights,
//! the gate stack, and normalized-record assembly.

pub mod anchors;
pub mod confidence;
pub mod gates;
pub mod identity;
pub mod job;
pub mod reconcile;
pub mod record;
pub mod traffic;

pub use anchors::{AnchorConflict, Severity, compare_anchor, evaluate_anchors, major_conflict_count};
pub use confidence::{ConfidenceInputs, field_confidence};
pub use gates::{
    GateInputs, GateOutcome, IDENTITY_PUBLISH_THRESHOLD, completeness_required, run_gate_stack,
};
pub use identity::{
    IdentityObservation, identity_certainty, observe_identity, sources_identity_matched,
};
pub use job::{IdentityLock, Job, Requirements};
pub use reconcile::{
    ConsensusConfig, ConsensusResult, EvidenceRow, FieldProvenance, NewValueRow, UNK, reconcile,
};
pub use record::{
    MODEL_AMBIGUITY_ALERT, NormalizedRecord, Quality, SourceSummary, aggregate_confidence,
    build_record, required_fields,
};
pub use traffic::{TrafficColor, TrafficLight, traffic_light};
