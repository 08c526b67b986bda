//! Task queue substrate
//!
//! Named, ordered work queues with priority, delayed eligibility,
//! exponential retry backoff, stall detection and terminal dead-letter
//! accounting. Cross-queue ordering is never enforced here; the pipeline
//! orchestrator chains stages by enqueuing the next one on completion.

mod manager;
mod queue;
mod task;

pub use manager::QueueManager;
pub use queue::{FailureOutcome, QueueError, QueueStats, TaskQueue};
pub use task::{
    AudioPayload, DocumentPayload, EnqueueOptions, NotificationPayload, QueueName,
    SummaryPayload, Task, TaskPayload, TaskStatus,
};
