use super::annotate::annotate_summary;
use crate::external::{Attachment, DocumentRenderer, Notifier, ObjectStorage, Summarizer};
use crate::queue::{Task, TaskPayload};
use crate::session::SessionRegistry;
use crate::worker::TaskProcessor;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::json;
use std::io::Cursor;
use std::sync::Arc;
use tracing::info;

/// Persist the session's captured audio as a WAV artifact and record its
/// URL on the conversation.
pub struct AudioStage {
    registry: Arc<SessionRegistry>,
    storage: Arc<dyn ObjectStorage>,
    bucket: String,
    sample_rate: u32,
    channels: u16,
}

impl AudioStage {
    pub fn new(
        registry: Arc<SessionRegistry>,
        storage: Arc<dyn ObjectStorage>,
        bucket: impl Into<String>,
        sample_rate: u32,
        channels: u16,
    ) -> Self {
        Self {
            registry,
            storage,
            bucket: bucket.into(),
            sample_rate,
            channels,
        }
    }
}

#[async_trait]
impl TaskProcessor for AudioStage {
    async fn execute(&self, task: &Task) -> Result<serde_json::Value> {
        let TaskPayload::Audio(payload) = &task.payload else {
            bail!("audio worker received a non-audio payload");
        };

        let pcm = self
            .registry
            .captured_audio(&payload.session_id)
            .await
            .with_context(|| format!("session {} no longer held", payload.session_id))?;

        let wav = encode_wav(&pcm, self.sample_rate, self.channels)
            .context("Failed to encode captured audio")?;
        let key = format!("{}.wav", payload.conversation_id);
        let url = self
            .storage
            .upload(&self.bucket, &key, wav)
            .await
            .context("Failed to upload audio artifact")?;

        self.registry
            .set_conversation_audio_url(&payload.conversation_id, &url)
            .await?;
        // Best effort; the session may already be swept.
        self.registry.set_audio_url(&payload.session_id, &url).await;

        info!(
            "Audio artifact for conversation {} stored at {}",
            payload.conversation_id, url
        );
        Ok(json!({ "audio_url": url, "pcm_bytes": pcm.len() }))
    }
}

/// Summarize the transcript through the external model and record the
/// summary on the conversation.
pub struct SummaryStage {
    registry: Arc<SessionRegistry>,
    summarizer: Arc<dyn Summarizer>,
    storage: Arc<dyn ObjectStorage>,
    bucket: String,
}

impl SummaryStage {
    pub fn new(
        registry: Arc<SessionRegistry>,
        summarizer: Arc<dyn Summarizer>,
        storage: Arc<dyn ObjectStorage>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            summarizer,
            storage,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl TaskProcessor for SummaryStage {
    async fn execute(&self, task: &Task) -> Result<serde_json::Value> {
        let TaskPayload::Summary(payload) = &task.payload else {
            bail!("summary worker received a non-summary payload");
        };

        let result = self
            .summarizer
            .summarize(&payload.transcript, &payload.language, payload.hint.as_deref())
            .await
            .context("Summarization call failed")?;

        let key = format!("{}.txt", payload.conversation_id);
        let url = self
            .storage
            .upload(&self.bucket, &key, result.summary.clone().into_bytes())
            .await
            .context("Failed to upload summary artifact")?;

        self.registry
            .set_summary(&payload.conversation_id, &result.summary, &url)
            .await?;

        info!(
            "Summary for conversation {} stored at {} ({} in / {} out tokens)",
            payload.conversation_id, url, result.usage.input_tokens, result.usage.output_tokens
        );
        Ok(json!({
            "summary_url": url,
            "input_tokens": result.usage.input_tokens,
            "output_tokens": result.usage.output_tokens,
            "cost_usd": result.usage.cost_usd,
        }))
    }
}

/// Render the conversation report document and record its URL.
pub struct DocumentStage {
    registry: Arc<SessionRegistry>,
    renderer: Arc<dyn DocumentRenderer>,
    storage: Arc<dyn ObjectStorage>,
    bucket: String,
}

impl DocumentStage {
    pub fn new(
        registry: Arc<SessionRegistry>,
        renderer: Arc<dyn DocumentRenderer>,
        storage: Arc<dyn ObjectStorage>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            renderer,
            storage,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl TaskProcessor for DocumentStage {
    async fn execute(&self, task: &Task) -> Result<serde_json::Value> {
        let TaskPayload::Document(payload) = &task.payload else {
            bail!("document worker received a non-document payload");
        };

        let conversation = self
            .registry
            .get_conversation(&payload.conversation_id)
            .await
            .with_context(|| format!("conversation {} not found", payload.conversation_id))?;

        let annotations = annotate_summary(&payload.summary);
        let bytes = self
            .renderer
            .render(&conversation, &payload.summary, &annotations)
            .context("Document rendering failed")?;

        let key = format!("{}.md", payload.conversation_id);
        let url = self
            .storage
            .upload(&self.bucket, &key, bytes)
            .await
            .context("Failed to upload document artifact")?;

        self.registry
            .set_document_url(&payload.conversation_id, &url)
            .await?;

        info!(
            "Document for conversation {} stored at {}",
            payload.conversation_id, url
        );
        Ok(json!({ "document_url": url }))
    }
}

/// Deliver the final notification with links to the accrued artifacts.
pub struct NotificationStage {
    registry: Arc<SessionRegistry>,
    notifier: Arc<dyn Notifier>,
}

impl NotificationStage {
    pub fn new(registry: Arc<SessionRegistry>, notifier: Arc<dyn Notifier>) -> Self {
        Self { registry, notifier }
    }
}

#[async_trait]
impl TaskProcessor for NotificationStage {
    async fn execute(&self, task: &Task) -> Result<serde_json::Value> {
        let TaskPayload::Notification(payload) = &task.payload else {
            bail!("notification worker received a non-notification payload");
        };

        let conversation = self
            .registry
            .get_conversation(&payload.conversation_id)
            .await
            .with_context(|| format!("conversation {} not found", payload.conversation_id))?;

        let mut attachments = Vec::new();
        if let Some(url) = &conversation.document_url {
            attachments.push(Attachment {
                filename: format!("{}.md", conversation.id),
                url: url.clone(),
            });
        }
        if let Some(url) = &conversation.audio_url {
            attachments.push(Attachment {
                filename: format!("{}.wav", conversation.id),
                url: url.clone(),
            });
        }

        let subject = format!(
            "{}: conversation report ({})",
            conversation.app_name,
            conversation.started_at.format("%Y-%m-%d %H:%M")
        );
        let body = match &conversation.summary {
            Some(summary) => format!(
                "Your conversation of {}s has been processed.\n\n{}",
                conversation.duration_secs, summary
            ),
            None => format!(
                "Your conversation of {}s has been processed.",
                conversation.duration_secs
            ),
        };

        let delivery_id = self
            .notifier
            .send(&payload.recipient, &subject, &body, &attachments)
            .await
            .context("Notification delivery failed")?;

        info!(
            "Notification {} delivered for conversation {}",
            delivery_id, payload.conversation_id
        );
        Ok(json!({ "delivery_id": delivery_id }))
    }
}

/// Encode interleaved 16-bit little-endian PCM into an in-memory WAV file.
pub fn encode_wav(pcm: &[u8], sample_rate: u32, channels: u16) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .context("Failed to create WAV writer")?;
        for bytes in pcm.chunks_exact(2) {
            let sample = i16::from_le_bytes([bytes[0], bytes[1]]);
            writer
                .write_sample(sample)
                .context("Failed to write sample to WAV")?;
        }
        writer.finalize().context("Failed to finalize WAV")?;
    }
    Ok(cursor.into_inner())
}
