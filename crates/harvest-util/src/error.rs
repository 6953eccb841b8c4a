//! Workspace error taxonomy.
//!
//! Per-source fetch problems are *outcomes*, not errors; they live in the
//! planner's outcome classification and never abort a run. `HarvestError` is
//! for conditions that fail an operation: unreadable inputs, schema failures,
//! manifest drift, invalid state transitions.

use thiserror::Error;

/// Primary error type returned by harvester library operations.
#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("missing or invalid input: {0}")]
    MissingOrInvalid(String),

    #[error("schema validation failed for {artifact}: {details}")]
    SchemaValidationFailed { artifact: String, details: String },

    #[error("manifest validation failed: {path} (expected {expected}, got {actual})")]
    ManifestMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("identity gate failed: certainty {certainty:.3} below publish threshold")]
    IdentityMismatch { certainty: f64 },

    #[error("anchor major conflict on field '{field}'")]
    AnchorMajorConflict { field: String },

    #[error("cross-validation contradiction: {rule_id}")]
    ConstraintContradiction { rule_id: String },

    #[error("LLM budget exhausted: {0}")]
    BudgetExhausted(String),

    #[error("invalid queue transition: {from} -> {to} for product {product_id}")]
    QueueTransitionInvalid {
        product_id: String,
        from: String,
        to: String,
    },

    #[error("no handler registered for automation job type '{0}'")]
    WorkerHandlerMissing(String),

    #[error("compile failed for category '{category}': {reason}")]
    CompileFailed { category: String, reason: String },

    #[error("watcher error: {0}")]
    WatcherError(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HarvestError {
    /// Stable machine token for the error category, used in envelopes and
    /// structured log fields.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingOrInvalid(_) => "missing_or_invalid",
            Self::SchemaValidationFailed { .. } => "schema_validation_failed",
            Self::ManifestMismatch { .. } => "manifest_mismatch",
            Self::IdentityMismatch { .. } => "identity_mismatch",
            Self::AnchorMajorConflict { .. } => "anchor_major_conflict",
            Self::ConstraintContradiction { .. } => "constraint_contradiction",
            Self::BudgetExhausted(_) => "budget_exhausted",
            Self::QueueTransitionInvalid { .. } => "queue_transition_invalid",
            Self::WorkerHandlerMissing(_) => "worker_handler_missing",
            Self::CompileFailed { .. } => "compile_failed",
            Self::WatcherError(_) => "watcher_error",
            Self::Storage(_) => "storage_error",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_tokens() {
        let err = HarvestError::ManifestMismatch {
            path: "known_values.json".into(),
            expected: "aa".into(),
            actual: "bb".into(),
        };
        assert_eq!(err.code(), "manifest_mismatch");
        assert!(err.to_string().contains("known_values.json"));

        let err = HarvestError::QueueTransitionInvalid {
            product_id: "p1".into(),
            from: "complete".into(),
            to: "running".into(),
        };
        assert_eq!(err.code(), "queue_transition_invalid");
    }
}
