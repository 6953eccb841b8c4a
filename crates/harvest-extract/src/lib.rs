//! Candidate extraction: five deterministic methods plus LLM merge, with
//! de-duplication and method-priority scoring.

pub mod candidate;
pub mod extract;
pub mod json_walk;
pub mod score;

pub use candidate::{Candidate, Method};
pub use extract::{
    ExtractionContext, best_per_field, extract_candidates, is_discovery_url, merge_llm_candidates,
};
pub use score::{parse_leading_number, score_candidate};
