//! Source planning: frontier, host budgets, outcome classes, discovery, and
//! the fetcher contract.

pub mod budget;
pub mod discovery;
pub mod fetch;
pub mod frontier;
pub mod outcome;
pub mod source;

pub use budget::{HostBudget, HostState};
pub use discovery::{brand_matches, discover_links, sitemaps_from_robots, urls_from_sitemap};
pub use fetch::{DryRunFetcher, FetchError, Fetcher, NetworkResponse, PageData, PdfDoc};
pub use frontier::{Enqueue, Frontier};
pub use outcome::{OutcomeClass, classify_fetch_outcome};
pub use source::{Role, Source, SourceRegistry, Tier, root_domain};
