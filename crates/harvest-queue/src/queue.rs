//! Per-category product queue: a JSON state document mutated under a file
//! lock with atomic rename.

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use tracing::debug;

use harvest_util::{HarvestError, to_canonical_json, write_file_atomic};

/// Product status in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Running,
    Complete,
    Failed,
    NeedsManual,
    Exhausted,
}

impl QueueStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::NeedsManual => "needs_manual",
            Self::Exhausted => "exhausted",
        }
    }

    /// Allowed transitions. `running` can return to `pending` only through
    /// the failure path (retry with backoff).
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Running)
                | (
                    Self::Running,
                    Self::Complete
                        | Self::Failed
                        | Self::NeedsManual
                        | Self::Exhausted
                        | Self::Pending
                )
        )
    }
}

/// One queued product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueProduct {
    pub product_id: String,
    pub category: String,
    pub s3key: String,
    pub status: QueueStatus,
    pub priority: i32,
    pub retry_count: u32,
    pub max_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
    pub next_action_hint: String,
}

/// The per-category state document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueState {
    pub category: String,
    pub products: BTreeMap<String, QueueProduct>,
}

impl QueueState {
    /// Highest-priority pending product not in backoff; ties break by
    /// product id for determinism.
    #[must_use]
    pub fn select_next(&self, now: DateTime<Utc>) -> Option<&QueueProduct> {
        self.products
            .values()
            .filter(|p| p.status == QueueStatus::Pending)
            .filter(|p| p.next_retry_at.is_none_or(|at| at <= now))
            .max_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| b.product_id.cmp(&a.product_id))
            })
    }

    /// Validated transition. A product can never be `running` twice.
    pub fn transition(
        &mut self,
        product_id: &str,
        to: QueueStatus,
        hint: &str,
    ) -> Result<(), HarvestError> {
        let product = self.products.get_mut(product_id).ok_or_else(|| {
            HarvestError::MissingOrInvalid(format!("unknown queue product: {product_id}"))
        })?;
        if !product.status.can_transition_to(to) {
            return Err(HarvestError::QueueTransitionInvalid {
                product_id: product_id.to_string(),
                from: product.status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        product.status = to;
        product.next_action_hint = hint.to_string();
        if to == QueueStatus::Running {
            product.next_retry_at = None;
        }
        Ok(())
    }

    /// Record a run failure: bump retries, schedule the retry with
    /// exponential backoff (`base × 2^(retries−1)`), or move to `failed`
    /// once attempts are spent.
    pub fn record_failure(
        &mut self,
        product_id: &str,
        base_backoff_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<(), HarvestError> {
        let product = self.products.get_mut(product_id).ok_or_else(|| {
            HarvestError::MissingOrInvalid(format!("unknown queue product: {product_id}"))
        })?;
        if product.status != QueueStatus::Running {
            return Err(HarvestError::QueueTransitionInvalid {
                product_id: product_id.to_string(),
                from: product.status.as_str().to_string(),
                to: "failed".to_string(),
            });
        }

        product.retry_count += 1;
        if product.retry_count >= product.max_attempts {
            product.status = QueueStatus::Failed;
            product.next_retry_at = None;
            product.next_action_hint = "attempts exhausted; needs operator review".to_string();
        } else {
            let backoff = base_backoff_secs * 2_i64.pow(product.retry_count - 1);
            product.status = QueueStatus::Pending;
            product.next_retry_at = Some(now + Duration::seconds(backoff));
            product.next_action_hint = format!("retry {} scheduled", product.retry_count + 1);
        }
        Ok(())
    }
}

/// File-backed queue with an advisory lock around every read-modify-write.
pub struct QueueFile {
    path: Utf8PathBuf,
    lock_path: Utf8PathBuf,
}

impl QueueFile {
    #[must_use]
    pub fn new(dir: &Utf8Path, category: &str) -> Self {
        Self {
            path: dir.join(format!("queue-{category}.json")),
            lock_path: dir.join(format!("queue-{category}.lock")),
        }
    }

    /// Load the state (empty state when the file does not exist yet).
    pub fn load(&self, category: &str) -> Result<QueueState> {
        if !self.path.exists() {
            return Ok(QueueState {
                category: category.to_string(),
                products: BTreeMap::new(),
            });
        }
        let raw = std::fs::read_to_string(self.path.as_std_path())
            .with_context(|| format!("failed to read queue state: {}", self.path))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse queue state: {}", self.path))
    }

    /// Run one locked read-modify-write cycle.
    pub fn update<T>(
        &self,
        category: &str,
        mutate: impl FnOnce(&mut QueueState) -> Result<T>,
    ) -> Result<T> {
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent.as_std_path())
                .with_context(|| format!("failed to create queue dir: {parent}"))?;
        }
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path.as_std_path())
            .with_context(|| format!("failed to open queue lock: {}", self.lock_path))?;
        let mut lock = fd_lock::RwLock::new(lock_file);
        let guard = lock
            .write()
            .with_context(|| format!("failed to lock queue: {}", self.lock_path))?;

        let mut state = self.load(category)?;
        let value = mutate(&mut state)?;
        write_file_atomic(&self.path, &to_canonical_json(&state)?)?;
        drop(guard);
        debug!(category, path = %self.path, "queue state written");
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn product(id: &str, priority: i32) -> QueueProduct {
        QueueProduct {
            product_id: id.to_string(),
            category: "mouse".to_string(),
            s3key: format!("jobs/{id}.json"),
            status: QueueStatus::Pending,
            priority,
            retry_count: 0,
            max_attempts: 3,
            next_retry_at: None,
            next_action_hint: String::new(),
        }
    }

    fn now() -> DateTime<Utc> {
        "2026-08-01T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn selects_highest_priority_pending() {
        let mut state = QueueState::default();
        state.products.insert("a".into(), product("a", 1));
        state.products.insert("b".into(), product("b", 5));
        assert_eq!(state.select_next(now()).unwrap().product_id, "b");
    }

    #[test]
    fn backoff_products_are_skipped_until_due() {
        let mut state = QueueState::default();
        let mut delayed = product("a", 5);
        delayed.next_retry_at = Some(now() + Duration::minutes(10));
        state.products.insert("a".into(), delayed);
        state.products.insert("b".into(), product("b", 1));

        assert_eq!(state.select_next(now()).unwrap().product_id, "b");
        assert_eq!(
            state
                .select_next(now() + Duration::minutes(11))
                .unwrap()
                .product_id,
            "a"
        );
    }

    #[test]
    fn running_twice_is_rejected() {
        let mut state = QueueState::default();
        state.products.insert("a".into(), product("a", 1));
        state
            .transition("a", QueueStatus::Running, "running")
            .unwrap();
        let err = state
            .transition("a", QueueStatus::Running, "again")
            .unwrap_err();
        assert_eq!(err.code(), "queue_transition_invalid");
    }

    #[test]
    fn failure_backoff_doubles_then_fails_terminally() {
        let mut state = QueueState::default();
        state.products.insert("a".into(), product("a", 1));

        state.transition("a", QueueStatus::Running, "").unwrap();
        state.record_failure("a", 60, now()).unwrap();
        let p = &state.products["a"];
        assert_eq!(p.status, QueueStatus::Pending);
        assert_eq!(p.retry_count, 1);
        assert_eq!(p.next_retry_at.unwrap(), now() + Duration::seconds(60));

        state.transition("a", QueueStatus::Running, "").unwrap();
        state.record_failure("a", 60, now()).unwrap();
        assert_eq!(
            state.products["a"].next_retry_at.unwrap(),
            now() + Duration::seconds(120)
        );

        state.transition("a", QueueStatus::Running, "").unwrap();
        state.record_failure("a", 60, now()).unwrap();
        let p = &state.products["a"];
        assert_eq!(p.status, QueueStatus::Failed);
        assert!(p.retry_count <= p.max_attempts);
    }

    #[test]
    fn terminal_states_reject_restart() {
        let mut state = QueueState::default();
        state.products.insert("a".into(), product("a", 1));
        state.transition("a", QueueStatus::Running, "").unwrap();
        state.transition("a", QueueStatus::Complete, "done").unwrap();
        assert!(state.transition("a", QueueStatus::Running, "").is_err());
    }

    #[test]
    fn file_backed_update_round_trips() {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let queue = QueueFile::new(&root, "mouse");

        queue
            .update("mouse", |state| {
                state.products.insert("a".into(), product("a", 3));
                Ok(())
            })
            .unwrap();

        let state = queue.load("mouse").unwrap();
        assert_eq!(state.products.len(), 1);
        assert_eq!(state.products["a"].priority, 3);
    }
}
