//! Debounced watch-compile over `_source/` and `_control_plane/`.

use anyhow::{Context, Result};
use camino::Utf8Path;
use notify::{RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::compile::{CompileReport, compile};
use crate::loader::invalidate_cache;
use crate::paths::{control_plane_dir, normalize_category, source_dir};

/// Watcher tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchOptions {
    pub debounce_ms: u64,
    /// Stop after this many compile events (initial compile included).
    pub max_events: Option<u32>,
    /// Stop after this many seconds of watching.
    pub watch_seconds: Option<u64>,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            debounce_ms: 400,
            max_events: None,
            watch_seconds: None,
        }
    }
}

/// One structured event per compile performed by the watcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent {
    pub sequence: u32,
    pub trigger: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<CompileReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Final watcher state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchSummary {
    pub events: Vec<WatchEvent>,
    pub shutdown_reason: String,
}

/// Watch a category's source and control-plane directories, recompiling on
/// change with debounce. The initial compile always runs. Compile failures
/// stop the watcher with `compile_failed`; watcher-channel loss stops it with
/// `watcher_error`.
pub fn watch_compile(
    helper_root: &Utf8Path,
    category: &str,
    options: &WatchOptions,
) -> Result<WatchSummary> {
    let category = normalize_category(category)?;
    let deadline = options
        .watch_seconds
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let debounce = Duration::from_millis(options.debounce_ms);

    let mut events = Vec::new();
    let mut sequence = 0u32;

    let mut run_compile = |trigger: &str, events: &mut Vec<WatchEvent>| -> bool {
        sequence += 1;
        match compile(helper_root, &category, false) {
            Ok(report) => {
                invalidate_cache(Some(&category));
                info!(category = %category, trigger, sequence, "watch compile succeeded");
                events.push(WatchEvent {
                    sequence,
                    trigger: trigger.to_string(),
                    ok: true,
                    report: Some(report),
                    error: None,
                });
                true
            }
            Err(err) => {
                warn!(category = %category, trigger, %err, "watch compile failed");
                events.push(WatchEvent {
                    sequence,
                    trigger: trigger.to_string(),
                    ok: false,
                    report: None,
                    error: Some(err.to_string()),
                });
                false
            }
        }
    };

    if !run_compile("initial", &mut events) {
        return Ok(WatchSummary {
            events,
            shutdown_reason: "compile_failed".to_string(),
        });
    }
    if reached_max(&events, options) {
        return Ok(WatchSummary {
            events,
            shutdown_reason: "max_events_reached".to_string(),
        });
    }

    let (tx, rx) = mpsc::channel::<notify::Result<notify::Event>>();
    let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        let _ = tx.send(event);
    })
    .context("failed to create filesystem watcher")?;

    for dir in [
        source_dir(helper_root, &category),
        control_plane_dir(helper_root, &category),
    ] {
        if dir.exists() {
            watcher
                .watch(dir.as_std_path(), RecursiveMode::Recursive)
                .with_context(|| format!("failed to watch directory: {dir}"))?;
        }
    }

    loop {
        let wait = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(WatchSummary {
                        events,
                        shutdown_reason: "watch_window_elapsed".to_string(),
                    });
                }
                deadline - now
            }
            None => Duration::from_secs(3600),
        };

        match rx.recv_timeout(wait) {
            Ok(Ok(_event)) => {
                // Coalesce the burst: keep draining until the channel stays
                // quiet for the debounce window.
                while rx.recv_timeout(debounce).is_ok() {}

                if !run_compile("change", &mut events) {
                    return Ok(WatchSummary {
                        events,
                        shutdown_reason: "compile_failed".to_string(),
                    });
                }
                if reached_max(&events, options) {
                    return Ok(WatchSummary {
                        events,
                        shutdown_reason: "max_events_reached".to_string(),
                    });
                }
            }
            Ok(Err(err)) => {
                // Transient watcher signal; recover and keep watching.
                warn!(%err, "watcher signal error; continuing");
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                // Deadline check happens at the top of the loop.
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Ok(WatchSummary {
                    events,
                    shutdown_reason: "watcher_error".to_string(),
                });
            }
        }
    }
}

fn reached_max(events: &[WatchEvent], options: &WatchOptions) -> bool {
    options
        .max_events
        .is_some_and(|max| events.len() as u32 >= max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    fn seeded() -> (TempDir, Utf8PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let source = root.join("mouse/_source");
        std::fs::create_dir_all(source.as_std_path()).unwrap();
        std::fs::write(
            source.join("workbook_fields.json").as_std_path(),
            r#"{"fields": [{"key": "weight"}]}"#,
        )
        .unwrap();
        (dir, root)
    }

    #[test]
    fn initial_compile_counts_toward_max_events() {
        let (_dir, root) = seeded();
        let summary = watch_compile(
            &root,
            "mouse",
            &WatchOptions {
                debounce_ms: 10,
                max_events: Some(1),
                watch_seconds: Some(5),
            },
        )
        .unwrap();

        assert_eq!(summary.shutdown_reason, "max_events_reached");
        assert_eq!(summary.events.len(), 1);
        assert_eq!(summary.events[0].trigger, "initial");
        assert!(summary.events[0].ok);
    }

    #[test]
    fn broken_source_stops_with_compile_failed() {
        let (_dir, root) = seeded();
        std::fs::write(
            root.join("mouse/_source/workbook_fields.json").as_std_path(),
            "not json",
        )
        .unwrap();

        let summary = watch_compile(
            &root,
            "mouse",
            &WatchOptions {
                debounce_ms: 10,
                max_events: Some(3),
                watch_seconds: Some(5),
            },
        )
        .unwrap();

        assert_eq!(summary.shutdown_reason, "compile_failed");
        assert!(!summary.events[0].ok);
        assert!(summary.events[0].error.is_some());
    }

    #[test]
    fn watch_window_elapses_without_changes() {
        let (_dir, root) = seeded();
        let summary = watch_compile(
            &root,
            "mouse",
            &WatchOptions {
                debounce_ms: 10,
                max_events: Some(10),
                watch_seconds: Some(1),
            },
        )
        .unwrap();

        assert_eq!(summary.shutdown_reason, "watch_window_elapsed");
        assert_eq!(summary.events.len(), 1);
    }
}
