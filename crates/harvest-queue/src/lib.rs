//! Queue, batch, automation jobs, and learning stores.

pub mod batch;
pub mod jobs;
pub mod learning;
pub mod queue;

pub use batch::{Batch, BatchProduct, BatchProductStatus, BatchStatus};
pub use jobs::{
    AutomationJob, DomainTracker, JobHandler, JobStatus, JobStore, run_next_job,
};
pub use learning::{LearningFile, LearningState, YieldRow};
pub use queue::{QueueFile, QueueProduct, QueueState, QueueStatus};
