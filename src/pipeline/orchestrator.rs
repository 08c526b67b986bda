use crate::external::{Broadcaster, ChangeEvent};
use crate::queue::{
    AudioPayload, DocumentPayload, EnqueueOptions, NotificationPayload, QueueError, QueueManager,
    QueueName, SummaryPayload, Task, TaskPayload,
};
use crate::session::{Conversation, SessionRegistry};
use crate::worker::JobEvent;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Delay on the summary enqueue so storage settles after the audio stage
    pub summary_settle_delay: Duration,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            summary_settle_delay: Duration::from_secs(5),
            max_attempts: 3,
            backoff_base_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// Inbound change notification from the external change feed.
///
/// Drives the same reactions as in-process job events; both paths must be
/// idempotent triggers since the same completion can arrive from either.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "entity", rename_all = "lowercase")]
pub enum ChangeNotification {
    Task {
        operation: ChangeOp,
        id: String,
        queue: String,
        status: String,
        conversation_id: String,
        #[serde(default)]
        error: Option<String>,
    },
    Conversation {
        operation: ChangeOp,
        id: String,
        status: String,
    },
}

/// Reaction rules for the fixed pipeline DAG:
/// audio → summary → document → notification.
///
/// Not a separate process: consumes completion/failure notifications and
/// enqueues the next dependent task, guarded against duplicate enqueue
/// under at-least-once delivery. Cross-queue ordering exists only here.
pub struct Orchestrator {
    queues: Arc<QueueManager>,
    registry: Arc<SessionRegistry>,
    broadcaster: Arc<dyn Broadcaster>,
    config: OrchestratorConfig,
    /// Conversation/stage pairs already chained this process lifetime
    chained: Mutex<HashSet<(String, QueueName)>>,
}

impl Orchestrator {
    pub fn new(
        queues: Arc<QueueManager>,
        registry: Arc<SessionRegistry>,
        broadcaster: Arc<dyn Broadcaster>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            queues,
            registry,
            broadcaster,
            config,
            chained: Mutex::new(HashSet::new()),
        }
    }

    /// Enqueue the first pipeline task for a freshly created conversation.
    ///
    /// Called explicitly by the session's caller, so post-processing only
    /// starts when audio/transcript data actually exists.
    pub async fn start_pipeline(&self, conversation: &Conversation) -> Option<Task> {
        let payload = TaskPayload::Audio(AudioPayload {
            session_id: conversation.session_id.clone(),
            conversation_id: conversation.id.clone(),
        });
        let task = self
            .enqueue_once(QueueName::Audio, &conversation.id, payload, None)
            .await;
        if task.is_some() {
            info!("Pipeline started for conversation {}", conversation.id);
        }
        task
    }

    /// Consume the worker runtime's job events.
    pub fn spawn(self: Arc<Self>, mut events: mpsc::Receiver<JobEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                self.handle_event(event).await;
            }
            debug!("Orchestrator event loop stopped");
        })
    }

    pub async fn handle_event(&self, event: JobEvent) {
        match event {
            JobEvent::TaskActive { task } => {
                self.broadcaster
                    .publish(ChangeEvent::TaskUpdated { task })
                    .await;
            }
            JobEvent::TaskCompleted { task, .. } => {
                self.broadcaster
                    .publish(ChangeEvent::TaskUpdated { task: task.clone() })
                    .await;
                self.handle_stage_completed(task.queue, task.payload.conversation_id())
                    .await;
            }
            JobEvent::TaskFailed {
                task,
                error,
                terminal,
            } => {
                self.broadcaster
                    .publish(ChangeEvent::TaskUpdated { task: task.clone() })
                    .await;
                if terminal {
                    self.handle_stage_failed(task.queue, task.payload.conversation_id(), &error)
                        .await;
                }
            }
            JobEvent::TaskStalled { task } => {
                warn!(
                    "Task {} on {} stalled and was requeued",
                    task.id, task.queue
                );
                self.broadcaster
                    .publish(ChangeEvent::TaskUpdated { task })
                    .await;
            }
        }
    }

    /// Apply an external change notification.
    ///
    /// Completion/failure of a task observed through the change feed
    /// triggers the same reactions as the in-process event.
    pub async fn handle_change(&self, change: ChangeNotification) -> Result<(), QueueError> {
        match change {
            ChangeNotification::Task {
                operation,
                id,
                queue,
                status,
                conversation_id,
                error,
            } => {
                if operation == ChangeOp::Delete {
                    debug!("Task {} deletion ignored", id);
                    return Ok(());
                }
                let queue = QueueName::parse(&queue)
                    .ok_or_else(|| QueueError::UnknownQueue(queue.clone()))?;
                match status.as_str() {
                    "completed" => {
                        self.handle_stage_completed(queue, &conversation_id).await;
                    }
                    "failed" => {
                        let error = error.unwrap_or_else(|| "unknown error".to_string());
                        self.handle_stage_failed(queue, &conversation_id, &error).await;
                    }
                    _ => {
                        debug!("Task {} change to {} ignored", id, status);
                    }
                }
                Ok(())
            }
            ChangeNotification::Conversation { id, status, .. } => {
                debug!("Conversation {} change to {} ignored", id, status);
                Ok(())
            }
        }
    }

    async fn handle_stage_completed(&self, queue: QueueName, conversation_id: &str) {
        match queue {
            QueueName::Audio => {
                let Some(conversation) = self.registry.get_conversation(conversation_id).await
                else {
                    warn!(
                        "Audio completed for unknown conversation {}",
                        conversation_id
                    );
                    return;
                };
                let payload = TaskPayload::Summary(SummaryPayload {
                    conversation_id: conversation.id.clone(),
                    transcript: conversation.transcript.clone(),
                    language: conversation.language.clone(),
                    hint: Some(conversation.app_name.clone()),
                });
                self.enqueue_once(
                    QueueName::Summary,
                    conversation_id,
                    payload,
                    Some(self.config.summary_settle_delay),
                )
                .await;
            }
            QueueName::Summary => {
                let Some(conversation) = self.registry.get_conversation(conversation_id).await
                else {
                    warn!(
                        "Summary completed for unknown conversation {}",
                        conversation_id
                    );
                    return;
                };
                let Some(summary) = conversation.summary else {
                    warn!(
                        "Summary completed but conversation {} has no summary text",
                        conversation_id
                    );
                    return;
                };
                let payload = TaskPayload::Document(DocumentPayload {
                    conversation_id: conversation.id.clone(),
                    summary,
                });
                self.enqueue_once(QueueName::Document, conversation_id, payload, None)
                    .await;
            }
            QueueName::Document => {
                let Some(conversation) = self.registry.get_conversation(conversation_id).await
                else {
                    warn!(
                        "Document completed for unknown conversation {}",
                        conversation_id
                    );
                    return;
                };
                let payload = TaskPayload::Notification(NotificationPayload {
                    conversation_id: conversation.id.clone(),
                    recipient: conversation.identity.clone(),
                });
                self.enqueue_once(QueueName::Notification, conversation_id, payload, None)
                    .await;
            }
            QueueName::Notification => {
                if let Err(e) = self.registry.complete_conversation(conversation_id).await {
                    warn!("Could not complete conversation {}: {}", conversation_id, e);
                } else {
                    info!("Conversation {} fully processed", conversation_id);
                }
            }
        }
    }

    /// A stage exhausted its attempts: mark the conversation failed and stop
    /// the chain. Partial results from earlier stages are kept.
    async fn handle_stage_failed(&self, queue: QueueName, conversation_id: &str, error: &str) {
        warn!(
            "Stage {} failed terminally for conversation {}: {}",
            queue, conversation_id, error
        );
        let text = format!("{} stage failed: {}", queue, error);
        if let Err(e) = self.registry.fail_conversation(conversation_id, &text).await {
            warn!("Could not fail conversation {}: {}", conversation_id, e);
        }
    }

    /// Enqueue a stage at most once per conversation.
    ///
    /// Duplicate observations of the same completion are expected under
    /// at-least-once delivery and are silently ignored, not errors.
    async fn enqueue_once(
        &self,
        stage: QueueName,
        conversation_id: &str,
        payload: TaskPayload,
        delay: Option<Duration>,
    ) -> Option<Task> {
        {
            let mut chained = self.chained.lock().await;
            if !chained.insert((conversation_id.to_string(), stage)) {
                debug!(
                    "Duplicate {} enqueue for conversation {} suppressed",
                    stage, conversation_id
                );
                return None;
            }
        }

        // The queue itself is the second guard: a task may already exist if
        // the completion came through the external change feed after a
        // restart cleared the in-memory set.
        if self
            .queues
            .queue(stage)
            .has_task_for_conversation(conversation_id)
            .await
        {
            debug!(
                "Stage {} already has a task for conversation {}",
                stage, conversation_id
            );
            return None;
        }

        let opts = EnqueueOptions {
            priority: 0,
            delay,
            max_attempts: self.config.max_attempts,
            backoff_base_ms: self.config.backoff_base_ms,
        };
        let task = self.queues.enqueue(payload, opts).await;
        info!(
            "Enqueued {} task {} for conversation {}",
            stage, task.id, conversation_id
        );
        Some(task)
    }
}
