use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The four fixed pipeline queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueName {
    Audio,
    Summary,
    Document,
    Notification,
}

impl QueueName {
    pub const ALL: [QueueName; 4] = [
        QueueName::Audio,
        QueueName::Summary,
        QueueName::Document,
        QueueName::Notification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Audio => "audio",
            QueueName::Summary => "summary",
            QueueName::Document => "document",
            QueueName::Notification => "notification",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "audio" => Some(QueueName::Audio),
            "summary" => Some(QueueName::Summary),
            "document" => Some(QueueName::Document),
            "notification" => Some(QueueName::Notification),
            _ => None,
        }
    }

    /// The next stage in the fixed pipeline DAG, if any.
    pub fn next_stage(&self) -> Option<QueueName> {
        match self {
            QueueName::Audio => Some(QueueName::Summary),
            QueueName::Summary => Some(QueueName::Document),
            QueueName::Document => Some(QueueName::Notification),
            QueueName::Notification => None,
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioPayload {
    pub session_id: String,
    pub conversation_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryPayload {
    pub conversation_id: String,
    pub transcript: String,
    pub language: String,
    /// Optional conversation-type hint passed through to the summarizer
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentPayload {
    pub conversation_id: String,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub conversation_id: String,
    pub recipient: String,
}

/// Stage-specific payloads, one variant per queue.
///
/// The tag makes each worker's `execute` statically total over its own
/// payload shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "lowercase")]
pub enum TaskPayload {
    Audio(AudioPayload),
    Summary(SummaryPayload),
    Document(DocumentPayload),
    Notification(NotificationPayload),
}

impl TaskPayload {
    /// The queue this payload belongs to.
    pub fn queue(&self) -> QueueName {
        match self {
            TaskPayload::Audio(_) => QueueName::Audio,
            TaskPayload::Summary(_) => QueueName::Summary,
            TaskPayload::Document(_) => QueueName::Document,
            TaskPayload::Notification(_) => QueueName::Notification,
        }
    }

    pub fn conversation_id(&self) -> &str {
        match self {
            TaskPayload::Audio(p) => &p.conversation_id,
            TaskPayload::Summary(p) => &p.conversation_id,
            TaskPayload::Document(p) => &p.conversation_id,
            TaskPayload::Notification(p) => &p.conversation_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
}

/// Options applied at enqueue time.
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    /// Higher priority dequeues first
    pub priority: u8,
    /// The task is not eligible until now + delay
    pub delay: Option<std::time::Duration>,
    pub max_attempts: u32,
    /// Base delay for exponential retry backoff, in milliseconds
    pub backoff_base_ms: u64,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            delay: None,
            max_attempts: 3,
            backoff_base_ms: 1_000,
        }
    }
}

/// One queued unit of pipeline work.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: String,
    pub queue: QueueName,
    pub payload: TaskPayload,
    pub priority: u8,

    /// Earliest time the task may be dispatched
    pub eligible_at: DateTime<Utc>,

    /// Execution attempts started so far
    pub attempts: u32,
    pub max_attempts: u32,

    /// Base delay for exponential retry backoff, in milliseconds
    pub backoff_base_ms: u64,

    pub status: TaskStatus,

    /// Error text from the most recent failed attempt
    pub error: Option<String>,

    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Monotonic enqueue sequence, FIFO tie-break within equal priority
    #[serde(skip)]
    pub(crate) seq: u64,
}

impl Task {
    /// Next retry delay after the given failed attempt: base * 2^(attempt-1).
    pub fn backoff_after(&self, attempt: u32) -> std::time::Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        std::time::Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }
}
