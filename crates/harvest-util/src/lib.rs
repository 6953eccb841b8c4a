//! Shared plumbing for the harvester workspace.
//!
//! Everything here is deliberately small and dependency-light: canonical JSON
//! emission, semantic SHA-256 hashing, atomic file writes, the workspace error
//! taxonomy, and the envelope every public call returns.

pub mod atomic;
pub mod canonical;
pub mod envelope;
pub mod error;
pub mod logging;

pub use atomic::write_file_atomic;
pub use canonical::{
    VOLATILE_KEYS, file_sha256, semantic_sha256, stable_stringify, strip_volatile,
    to_canonical_json,
};
pub use envelope::{Envelope, EnvelopeStatus};
pub use error::HarvestError;
