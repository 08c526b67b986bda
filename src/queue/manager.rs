use super::queue::{QueueError, QueueStats, TaskQueue};
use super::task::{EnqueueOptions, QueueName, Task, TaskPayload};
use crate::external::{Broadcaster, ChangeEvent};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Owner of the four fixed pipeline queues.
///
/// Queue identity is an enum internally, so `UnknownQueue` is only reachable
/// through the string-addressed administrative paths.
pub struct QueueManager {
    queues: HashMap<QueueName, Arc<TaskQueue>>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl QueueManager {
    pub fn new(broadcaster: Arc<dyn Broadcaster>) -> Self {
        let queues = QueueName::ALL
            .iter()
            .map(|&name| (name, Arc::new(TaskQueue::new(name))))
            .collect();
        Self { queues, broadcaster }
    }

    /// The queue for a given name. Infallible: every variant has a queue.
    pub fn queue(&self, name: QueueName) -> Arc<TaskQueue> {
        Arc::clone(&self.queues[&name])
    }

    /// Resolve a queue by its string name (administrative paths).
    pub fn queue_named(&self, name: &str) -> Result<Arc<TaskQueue>, QueueError> {
        QueueName::parse(name)
            .map(|n| self.queue(n))
            .ok_or_else(|| QueueError::UnknownQueue(name.to_string()))
    }

    /// Enqueue a payload on its queue. The payload tag picks the queue, so
    /// this cannot target an unknown one.
    pub async fn enqueue(&self, payload: TaskPayload, opts: EnqueueOptions) -> Task {
        let queue = self.queue(payload.queue());
        let task = queue.enqueue(payload, opts).await;
        self.broadcaster
            .publish(ChangeEvent::TaskInserted { task: task.clone() })
            .await;
        task
    }

    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        for queue in self.queues.values() {
            if let Some(task) = queue.get(task_id).await {
                return Some(task);
            }
        }
        None
    }

    /// Remove a task if it has not started yet.
    pub async fn cancel_task(&self, task_id: &str) -> Result<Task, QueueError> {
        for queue in self.queues.values() {
            match queue.cancel(task_id).await {
                Err(QueueError::TaskNotFound(_)) => continue,
                other => return other,
            }
        }
        Err(QueueError::TaskNotFound(task_id.to_string()))
    }

    /// Force a failed task back to waiting, resetting its attempt count.
    pub async fn retry_task(&self, task_id: &str) -> Result<Task, QueueError> {
        for queue in self.queues.values() {
            match queue.retry(task_id).await {
                Err(QueueError::TaskNotFound(_)) => continue,
                other => return other,
            }
        }
        Err(QueueError::TaskNotFound(task_id.to_string()))
    }

    /// Per-queue statistics, in fixed queue order.
    pub async fn stats(&self) -> Vec<QueueStats> {
        let mut stats = Vec::with_capacity(QueueName::ALL.len());
        for name in QueueName::ALL {
            stats.push(self.queue(name).stats().await);
        }
        stats
    }

    /// All tasks across queues belonging to a conversation.
    pub async fn tasks_for_conversation(&self, conversation_id: &str) -> Vec<Task> {
        let mut tasks = Vec::new();
        for name in QueueName::ALL {
            tasks.extend(self.queue(name).tasks_for_conversation(conversation_id).await);
        }
        tasks.sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at));
        tasks
    }

    /// Periodically drop terminal tasks older than the retention window.
    pub fn spawn_finished_reaper(
        self: Arc<Self>,
        interval: Duration,
        retention: Duration,
    ) -> JoinHandle<()> {
        let manager = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                for name in QueueName::ALL {
                    manager.queue(name).reap_finished(retention).await;
                }
            }
        })
    }
}
