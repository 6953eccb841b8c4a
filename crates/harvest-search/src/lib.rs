//! Search providers, SERP dedup, and deterministic provider selection.

pub mod provider;
pub mod select;
pub mod serp;

pub use provider::{
    Provider, SearchClient, SearchConfig, decode_entities, parse_duckduckgo_html,
    parse_searxng_results, unwrap_ddg_redirect,
};
pub use select::{SelectionDecision, SelectionInputs, select_provider};
pub use serp::{SerpEntry, SerpRow, canonicalize_url, dedup_serp};
