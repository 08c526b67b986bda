use super::task::{EnqueueOptions, QueueName, Task, TaskPayload, TaskStatus};
use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("unknown queue: {0}")]
    UnknownQueue(String),

    #[error("task {0} not found")]
    TaskNotFound(String),

    #[error("task {0} has already started")]
    CannotCancel(String),

    #[error("task {0} is not in a failed state")]
    NotFailed(String),
}

/// Counts by state for one queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub queue: QueueName,
    pub waiting: usize,
    pub delayed: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub paused: bool,
}

/// Outcome of a failed execution attempt.
#[derive(Debug)]
pub enum FailureOutcome {
    /// Re-queued with backoff for another attempt
    Retried { task: Task },
    /// Attempts exhausted, terminally failed
    Exhausted { task: Task },
}

struct QueueInner {
    paused: bool,
    next_seq: u64,
    /// Waiting and delayed tasks; eligibility is checked at dequeue time
    waiting: Vec<Task>,
    active: HashMap<String, Task>,
    completed: HashMap<String, Task>,
    failed: HashMap<String, Task>,
}

/// One named, ordered work queue.
///
/// FIFO within equal priority via a monotonic enqueue sequence; higher
/// priority dequeues first; delayed tasks become eligible at their
/// `eligible_at`. All access goes through methods that internally serialize
/// dequeue/requeue.
pub struct TaskQueue {
    name: QueueName,
    inner: Mutex<QueueInner>,
}

impl TaskQueue {
    pub fn new(name: QueueName) -> Self {
        Self {
            name,
            inner: Mutex::new(QueueInner {
                paused: false,
                next_seq: 0,
                waiting: Vec::new(),
                active: HashMap::new(),
                completed: HashMap::new(),
                failed: HashMap::new(),
            }),
        }
    }

    pub fn name(&self) -> QueueName {
        self.name
    }

    /// Add a task to the queue.
    pub async fn enqueue(&self, payload: TaskPayload, opts: EnqueueOptions) -> Task {
        let now = Utc::now();
        let eligible_at = match opts.delay {
            Some(delay) => now + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::zero()),
            None => now,
        };

        let mut inner = self.inner.lock().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let task = Task {
            id: Uuid::new_v4().to_string(),
            queue: self.name,
            payload,
            priority: opts.priority,
            eligible_at,
            attempts: 0,
            max_attempts: opts.max_attempts.max(1),
            backoff_base_ms: opts.backoff_base_ms,
            status: if eligible_at > now {
                TaskStatus::Delayed
            } else {
                TaskStatus::Waiting
            },
            error: None,
            enqueued_at: now,
            started_at: None,
            finished_at: None,
            seq,
        };

        debug!(
            "Enqueued task {} on {} (priority={}, eligible_at={})",
            task.id, self.name, task.priority, task.eligible_at
        );

        inner.waiting.push(task.clone());
        task
    }

    /// Take the next eligible task and mark it active.
    ///
    /// Returns None when the queue is paused or nothing is eligible yet.
    pub async fn dequeue(&self) -> Option<Task> {
        let mut inner = self.inner.lock().await;
        if inner.paused {
            return None;
        }

        let now = Utc::now();
        let mut best: Option<usize> = None;
        for (i, task) in inner.waiting.iter().enumerate() {
            if task.eligible_at > now {
                continue;
            }
            match best {
                None => best = Some(i),
                Some(b) => {
                    let current = &inner.waiting[b];
                    if task.priority > current.priority
                        || (task.priority == current.priority && task.seq < current.seq)
                    {
                        best = Some(i);
                    }
                }
            }
        }

        let index = best?;
        let mut task = inner.waiting.remove(index);
        task.status = TaskStatus::Active;
        task.attempts += 1;
        task.started_at = Some(now);
        task.error = None;
        inner.active.insert(task.id.clone(), task.clone());
        Some(task)
    }

    /// Acknowledge a successful execution.
    pub async fn ack_success(&self, task_id: &str) -> Option<Task> {
        let mut inner = self.inner.lock().await;
        let mut task = inner.active.remove(task_id)?;
        task.status = TaskStatus::Completed;
        task.finished_at = Some(Utc::now());
        inner.completed.insert(task.id.clone(), task.clone());
        Some(task)
    }

    /// Acknowledge a failed execution attempt.
    ///
    /// Re-queues with exponential backoff unless attempts are exhausted, in
    /// which case the task is terminally failed and never dequeued again.
    pub async fn ack_failure(&self, task_id: &str, error: &str) -> Option<FailureOutcome> {
        let mut inner = self.inner.lock().await;
        let mut task = inner.active.remove(task_id)?;
        task.error = Some(error.to_string());
        task.started_at = None;

        if task.attempts >= task.max_attempts {
            task.status = TaskStatus::Failed;
            task.finished_at = Some(Utc::now());
            warn!(
                "Task {} on {} failed terminally after {} attempts: {}",
                task.id, self.name, task.attempts, error
            );
            inner.failed.insert(task.id.clone(), task.clone());
            Some(FailureOutcome::Exhausted { task })
        } else {
            let backoff = task.backoff_after(task.attempts);
            task.eligible_at = Utc::now() + ChronoDuration::from_std(backoff).unwrap_or_else(|_| ChronoDuration::zero());
            task.status = TaskStatus::Delayed;
            debug!(
                "Task {} on {} attempt {} failed, retrying in {:?}: {}",
                task.id, self.name, task.attempts, backoff, error
            );
            inner.waiting.push(task.clone());
            Some(FailureOutcome::Retried { task })
        }
    }

    /// Detect active tasks unacknowledged past the stall timeout and requeue
    /// them.
    ///
    /// The interrupted run still counts as an attempt, so a task that stalls
    /// repeatedly is bounded by `max_attempts` like any other failure.
    pub async fn reap_stalled(&self, stall_timeout: Duration) -> Vec<Task> {
        let cutoff = Utc::now() - ChronoDuration::from_std(stall_timeout).unwrap_or_else(|_| ChronoDuration::zero());
        let mut inner = self.inner.lock().await;

        let stalled_ids: Vec<String> = inner
            .active
            .values()
            .filter(|t| matches!(t.started_at, Some(started) if started < cutoff))
            .map(|t| t.id.clone())
            .collect();

        let mut reaped = Vec::with_capacity(stalled_ids.len());
        for id in stalled_ids {
            let Some(mut task) = inner.active.remove(&id) else {
                continue;
            };
            task.started_at = None;
            if task.attempts >= task.max_attempts {
                task.status = TaskStatus::Failed;
                task.error = Some("stalled: execution never acknowledged".to_string());
                task.finished_at = Some(Utc::now());
                warn!("Stalled task {} on {} exhausted its attempts", task.id, self.name);
                inner.failed.insert(task.id.clone(), task.clone());
            } else {
                task.status = TaskStatus::Waiting;
                task.eligible_at = Utc::now();
                warn!("Stalled task {} on {} requeued", task.id, self.name);
                inner.waiting.push(task.clone());
            }
            reaped.push(task);
        }
        reaped
    }

    /// Remove a task that has not started yet.
    pub async fn cancel(&self, task_id: &str) -> Result<Task, QueueError> {
        let mut inner = self.inner.lock().await;

        if let Some(index) = inner.waiting.iter().position(|t| t.id == task_id) {
            let task = inner.waiting.remove(index);
            info!("Cancelled task {} on {}", task_id, self.name);
            return Ok(task);
        }

        if inner.active.contains_key(task_id)
            || inner.completed.contains_key(task_id)
            || inner.failed.contains_key(task_id)
        {
            return Err(QueueError::CannotCancel(task_id.to_string()));
        }
        Err(QueueError::TaskNotFound(task_id.to_string()))
    }

    /// Force a terminally failed task back to waiting, resetting attempts.
    pub async fn retry(&self, task_id: &str) -> Result<Task, QueueError> {
        let mut inner = self.inner.lock().await;

        let Some(mut task) = inner.failed.remove(task_id) else {
            return if inner.active.contains_key(task_id)
                || inner.completed.contains_key(task_id)
                || inner.waiting.iter().any(|t| t.id == task_id)
            {
                Err(QueueError::NotFailed(task_id.to_string()))
            } else {
                Err(QueueError::TaskNotFound(task_id.to_string()))
            };
        };

        task.status = TaskStatus::Waiting;
        task.attempts = 0;
        task.error = None;
        task.eligible_at = Utc::now();
        task.started_at = None;
        task.finished_at = None;
        info!("Retrying failed task {} on {}", task_id, self.name);
        inner.waiting.push(task.clone());
        Ok(task)
    }

    pub async fn get(&self, task_id: &str) -> Option<Task> {
        let inner = self.inner.lock().await;
        inner
            .waiting
            .iter()
            .find(|t| t.id == task_id)
            .cloned()
            .or_else(|| inner.active.get(task_id).cloned())
            .or_else(|| inner.completed.get(task_id).cloned())
            .or_else(|| inner.failed.get(task_id).cloned())
    }

    /// Whether any task (in any state) exists for the conversation.
    ///
    /// Used by the orchestrator as the duplicate-enqueue guard under
    /// at-least-once delivery.
    pub async fn has_task_for_conversation(&self, conversation_id: &str) -> bool {
        let inner = self.inner.lock().await;
        let matches = |t: &Task| t.payload.conversation_id() == conversation_id;
        inner.waiting.iter().any(matches)
            || inner.active.values().any(matches)
            || inner.completed.values().any(matches)
            || inner.failed.values().any(matches)
    }

    pub async fn tasks_for_conversation(&self, conversation_id: &str) -> Vec<Task> {
        let inner = self.inner.lock().await;
        let matches = |t: &&Task| t.payload.conversation_id() == conversation_id;
        inner
            .waiting
            .iter()
            .filter(matches)
            .chain(inner.active.values().filter(matches))
            .chain(inner.completed.values().filter(matches))
            .chain(inner.failed.values().filter(matches))
            .cloned()
            .collect()
    }

    pub async fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().await;
        let now = Utc::now();
        let delayed = inner.waiting.iter().filter(|t| t.eligible_at > now).count();
        QueueStats {
            queue: self.name,
            waiting: inner.waiting.len() - delayed,
            delayed,
            active: inner.active.len(),
            completed: inner.completed.len(),
            failed: inner.failed.len(),
            paused: inner.paused,
        }
    }

    /// Stop dispatch without losing queued work.
    pub async fn pause(&self) {
        let mut inner = self.inner.lock().await;
        inner.paused = true;
        info!("Queue {} paused", self.name);
    }

    pub async fn resume(&self) {
        let mut inner = self.inner.lock().await;
        inner.paused = false;
        info!("Queue {} resumed", self.name);
    }

    /// Drop terminal tasks finished longer than the retention window ago.
    pub async fn reap_finished(&self, retention: Duration) -> usize {
        let cutoff = Utc::now() - ChronoDuration::from_std(retention).unwrap_or_else(|_| ChronoDuration::zero());
        let mut inner = self.inner.lock().await;
        let before = inner.completed.len() + inner.failed.len();
        let expired = |t: &Task| matches!(t.finished_at, Some(finished) if finished < cutoff);
        inner.completed.retain(|_, t| !expired(t));
        inner.failed.retain(|_, t| !expired(t));
        let removed = before - (inner.completed.len() + inner.failed.len());
        if removed > 0 {
            debug!("Reaped {} finished tasks from {}", removed, self.name);
        }
        removed
    }
}
