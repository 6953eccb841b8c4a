//! Tracing subscriber setup. Called once by the CLI; library code only emits.

use tracing_subscriber::{EnvFilter, fmt};

/// Initialize the global subscriber. `json` selects line-JSON output for
/// machine consumption; otherwise compact human format. Safe to call once.
pub fn init_logging(json: bool, default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive.to_string()));

    if json {
        let _ = fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
    } else {
        let _ = fmt()
            .compact()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    }
}
