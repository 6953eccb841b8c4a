//! Convergence orchestration: round planning, target selection, stop
//! conditions, run artifacts, and learning signals.

pub mod orchestrator;
pub mod round;
pub mod stop;
pub mod store;
pub mod summary;
pub mod target;

pub use orchestrator::{
    EngineConfig, LearningSignal, Orchestrator, RunOptions, RunOutcome, RunStatus,
};
pub use round::{EffortProfile, RoundConfig, RunMode, derive_round_config, effort_profile};
pub use stop::{StopPolicy, StopReason, evaluate_stop, expected_retry_fields};
pub use store::{FsRunStore, RunArtifacts, RunStore, SourceLine};
pub use summary::{
    ConstraintAnalysis, IdentityContext, RoundSummary, improvement_reasons, validate_summary,
};
pub use target::{TargetSelection, select_targets};
