use anyhow::Result;
use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

/// A link attached to an outbound notification.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub url: String,
}

/// Outbound notification delivery (mail transport is external).
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a notification and return the transport's delivery id.
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
        attachments: &[Attachment],
    ) -> Result<String>;
}

/// Logs deliveries instead of sending them. Default when no mail transport
/// is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        _body: &str,
        attachments: &[Attachment],
    ) -> Result<String> {
        let delivery_id = Uuid::new_v4().to_string();
        info!(
            "Notification {} to {} ({}, {} attachments)",
            delivery_id,
            recipient,
            subject,
            attachments.len()
        );
        Ok(delivery_id)
    }
}
