use crate::queue::Task;
use crate::session::Conversation;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Change events pushed to connected clients (dashboard, widgets).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeEvent {
    ConversationInserted { conversation: Conversation },
    ConversationUpdated { conversation: Conversation },
    TaskInserted { task: Task },
    TaskUpdated { task: Task },
}

impl ChangeEvent {
    /// Subject the event is published under, keyed by entity.
    pub fn subject(&self) -> String {
        match self {
            ChangeEvent::ConversationInserted { conversation } => {
                format!("conversation.insert.{}", conversation.id)
            }
            ChangeEvent::ConversationUpdated { conversation } => {
                format!("conversation.update.{}", conversation.id)
            }
            ChangeEvent::TaskInserted { task } => format!("task.insert.{}", task.id),
            ChangeEvent::TaskUpdated { task } => format!("task.update.{}", task.id),
        }
    }
}

/// Outbound change-event publisher.
///
/// Injected into the components that publish state changes; delivery is
/// fire-and-forget and failures are logged, never propagated.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn publish(&self, event: ChangeEvent);
}

/// Publishes change events as JSON to per-entity NATS subjects.
pub struct NatsBroadcaster {
    client: async_nats::Client,
}

impl NatsBroadcaster {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        info!("Connecting broadcaster to NATS at {}", url);
        let client = async_nats::connect(url).await?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Broadcaster for NatsBroadcaster {
    async fn publish(&self, event: ChangeEvent) {
        let subject = event.subject();
        let payload = match serde_json::to_vec(&event) {
            Ok(p) => p,
            Err(e) => {
                warn!("Failed to serialize change event for {}: {}", subject, e);
                return;
            }
        };
        if let Err(e) = self.client.publish(subject.clone(), payload.into()).await {
            warn!("Failed to publish change event to {}: {}", subject, e);
        }
    }
}

/// Broadcaster that drops everything. Used in tests and NATS-less
/// deployments.
pub struct NoopBroadcaster;

#[async_trait]
impl Broadcaster for NoopBroadcaster {
    async fn publish(&self, event: ChangeEvent) {
        debug!("Change event suppressed: {}", event.subject());
    }
}
