//! Batch orchestration over many products with an injected product runner.

use serde::{Deserialize, Serialize};
use tracing::debug;

use harvest_util::HarvestError;

/// Batch lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Cancelled,
}

impl BatchStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Running)
                | (Self::Running, Self::Paused | Self::Completed | Self::Cancelled)
                | (Self::Paused, Self::Running | Self::Cancelled)
        )
    }
}

/// Product lifecycle inside a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchProductStatus {
    Pending,
    Running,
    Done,
    Failed,
    Skipped,
}

/// One product in a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchProduct {
    pub product_id: String,
    pub status: BatchProductStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// A batch of products.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: String,
    pub status: BatchStatus,
    pub max_retries: u32,
    pub products: Vec<BatchProduct>,
}

impl Batch {
    #[must_use]
    pub fn new(id: impl Into<String>, product_ids: Vec<String>, max_retries: u32) -> Self {
        Self {
            id: id.into(),
            status: BatchStatus::Pending,
            max_retries,
            products: product_ids
                .into_iter()
                .map(|product_id| BatchProduct {
                    product_id,
                    status: BatchProductStatus::Pending,
                    attempts: 0,
                    last_error: None,
                })
                .collect(),
        }
    }

    /// Validated batch transition.
    pub fn transition(&mut self, to: BatchStatus) -> Result<(), HarvestError> {
        if !self.status.can_transition_to(to) {
            return Err(HarvestError::QueueTransitionInvalid {
                product_id: self.id.clone(),
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        self.status = to;
        Ok(())
    }

    /// Next product eligible to run: pending first, then failed products
    /// with retries left.
    #[must_use]
    pub fn next_pending(&self) -> Option<usize> {
        self.products
            .iter()
            .position(|p| p.status == BatchProductStatus::Pending)
            .or_else(|| {
                self.products.iter().position(|p| {
                    p.status == BatchProductStatus::Failed && p.attempts <= self.max_retries
                })
            })
    }

    /// Run the next pending product through the injected runner and record
    /// the outcome. Returns the product id that ran, or `None` when the
    /// batch has no runnable product left (the batch completes then).
    pub fn run_next_product(
        &mut self,
        runner: &mut dyn FnMut(&str) -> Result<(), String>,
    ) -> Result<Option<String>, HarvestError> {
        if self.status == BatchStatus::Pending {
            self.transition(BatchStatus::Running)?;
        }
        if self.status != BatchStatus::Running {
            return Err(HarvestError::QueueTransitionInvalid {
                product_id: self.id.clone(),
                from: self.status.as_str().to_string(),
                to: "running".to_string(),
            });
        }

        let Some(index) = self.next_pending() else {
            self.transition(BatchStatus::Completed)?;
            return Ok(None);
        };

        self.products[index].status = BatchProductStatus::Running;
        self.products[index].attempts += 1;
        let product_id = self.products[index].product_id.clone();

        match runner(&product_id) {
            Ok(()) => {
                self.products[index].status = BatchProductStatus::Done;
                self.products[index].last_error = None;
            }
            Err(error) => {
                debug!(batch = %self.id, product = %product_id, %error, "product run failed");
                self.products[index].last_error = Some(error);
                self.products[index].status = if self.products[index].attempts > self.max_retries {
                    BatchProductStatus::Skipped
                } else {
                    BatchProductStatus::Failed
                };
            }
        }

        if self.next_pending().is_none() {
            self.transition(BatchStatus::Completed)?;
        }
        Ok(Some(product_id))
    }

    /// Per-status counts for observability.
    #[must_use]
    pub fn progress(&self) -> (usize, usize, usize) {
        let done = self
            .products
            .iter()
            .filter(|p| p.status == BatchProductStatus::Done)
            .count();
        let skipped = self
            .products
            .iter()
            .filter(|p| p.status == BatchProductStatus::Skipped)
            .count();
        (done, skipped, self.products.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_runs_products_to_completion() {
        let mut batch = Batch::new("b1", vec!["p1".into(), "p2".into()], 1);
        let mut runner = |_: &str| Ok(());

        assert_eq!(batch.run_next_product(&mut runner).unwrap().unwrap(), "p1");
        assert_eq!(batch.status, BatchStatus::Running);
        assert_eq!(batch.run_next_product(&mut runner).unwrap().unwrap(), "p2");
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.progress(), (2, 0, 2));
    }

    #[test]
    fn failed_products_retry_then_skip() {
        let mut batch = Batch::new("b1", vec!["p1".into()], 1);
        let mut runner = |_: &str| Err("boom".to_string());

        // attempt 1 fails, attempt 2 (retry) fails and exceeds max_retries
        batch.run_next_product(&mut runner).unwrap();
        assert_eq!(batch.products[0].status, BatchProductStatus::Failed);
        batch.run_next_product(&mut runner).unwrap();
        assert_eq!(batch.products[0].status, BatchProductStatus::Skipped);
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.products[0].last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn pause_resume_cycle() {
        let mut batch = Batch::new("b1", vec!["p1".into()], 0);
        batch.transition(BatchStatus::Running).unwrap();
        batch.transition(BatchStatus::Paused).unwrap();
        assert!(batch.run_next_product(&mut |_| Ok(())).is_err());
        batch.transition(BatchStatus::Running).unwrap();
        assert!(batch.run_next_product(&mut |_| Ok(())).unwrap().is_some());
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        let mut batch = Batch::new("b1", vec![], 0);
        assert!(batch.transition(BatchStatus::Paused).is_err());
        batch.transition(BatchStatus::Running).unwrap();
        batch.transition(BatchStatus::Cancelled).unwrap();
        assert!(batch.transition(BatchStatus::Running).is_err());
    }
}
