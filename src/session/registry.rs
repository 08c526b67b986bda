use super::types::{Conversation, ConversationStatus, Session, SessionStatus};
use crate::external::{Broadcaster, ChangeEvent};
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How long ended sessions are retained before the sweep removes them.
const SESSION_RETENTION_HOURS: i64 = 24;

/// Capacity of the session event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events emitted by the registry when a session is finalized.
///
/// Consumed by the server boundary, not by the pipeline directly: the
/// pipeline is triggered explicitly by the caller enqueuing the first task.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    SessionEnded { session_id: String },
    ConversationCreated { conversation: Conversation },
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("session {0} not found")]
    SessionNotFound(String),

    #[error("session {0} already ended")]
    SessionAlreadyEnded(String),

    #[error("conversation {0} not found")]
    ConversationNotFound(String),
}

struct Inner {
    sessions: HashMap<String, Session>,
    conversations: HashMap<String, Conversation>,
}

/// In-memory table of live sessions and their derived conversation records.
///
/// The registry exclusively owns both maps. The network-facing layer and the
/// periodic sweep only ever touch them through registry methods, which makes
/// create/end/append atomic with respect to each other.
pub struct SessionRegistry {
    inner: RwLock<Inner>,
    events: mpsc::Sender<SessionEvent>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl SessionRegistry {
    /// Create a registry and the receiving end of its event channel.
    pub fn new(broadcaster: Arc<dyn Broadcaster>) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let registry = Self {
            inner: RwLock::new(Inner {
                sessions: HashMap::new(),
                conversations: HashMap::new(),
            }),
            events: tx,
            broadcaster,
        };
        (registry, rx)
    }

    /// Start a new session. Always succeeds and allocates a fresh id.
    pub async fn start_session(
        &self,
        identity: &str,
        app_name: &str,
        language: &str,
        connection_id: &str,
    ) -> Session {
        let session = Session {
            id: Uuid::new_v4().to_string(),
            identity: identity.to_string(),
            app_name: app_name.to_string(),
            language: language.to_string(),
            connection_id: connection_id.to_string(),
            started_at: Utc::now(),
            ended_at: None,
            status: SessionStatus::Active,
            transcript: String::new(),
            audio_url: None,
            audio_buffer: Vec::new(),
        };

        info!(
            "Starting session {} for {} (app={}, language={})",
            session.id, session.identity, session.app_name, session.language
        );

        let mut inner = self.inner.write().await;
        inner.sessions.insert(session.id.clone(), session.clone());
        session
    }

    /// End a session and derive its conversation record.
    ///
    /// Duration is computed once here, in whole seconds. Exactly one
    /// conversation is produced per successful call; ending an unknown or
    /// already-ended session fails without creating anything.
    pub async fn end_session(&self, session_id: &str) -> Result<Conversation, RegistryError> {
        let conversation = {
            let mut inner = self.inner.write().await;

            let session = inner
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| RegistryError::SessionNotFound(session_id.to_string()))?;

            if session.status == SessionStatus::Ended {
                return Err(RegistryError::SessionAlreadyEnded(session_id.to_string()));
            }

            let ended_at = Utc::now();
            session.status = SessionStatus::Ended;
            session.ended_at = Some(ended_at);

            let conversation = Conversation {
                id: Uuid::new_v4().to_string(),
                session_id: session.id.clone(),
                identity: session.identity.clone(),
                app_name: session.app_name.clone(),
                started_at: session.started_at,
                ended_at,
                duration_secs: (ended_at - session.started_at).num_seconds(),
                language: session.language.clone(),
                status: ConversationStatus::Processing,
                transcript: session.transcript.clone(),
                audio_url: session.audio_url.clone(),
                summary_url: None,
                document_url: None,
                summary: None,
                error: None,
            };

            inner
                .conversations
                .insert(conversation.id.clone(), conversation.clone());
            conversation
        };

        info!(
            "Session {} ended, conversation {} created ({}s)",
            session_id, conversation.id, conversation.duration_secs
        );

        self.emit(SessionEvent::SessionEnded {
            session_id: session_id.to_string(),
        });
        self.emit(SessionEvent::ConversationCreated {
            conversation: conversation.clone(),
        });
        self.broadcaster
            .publish(ChangeEvent::ConversationInserted {
                conversation: conversation.clone(),
            })
            .await;

        Ok(conversation)
    }

    /// Append final transcript text to a session.
    ///
    /// Returns false on an unknown session rather than failing loudly, since
    /// transcription delivery may race session teardown.
    pub async fn append_transcript(&self, session_id: &str, text: &str) -> bool {
        let mut inner = self.inner.write().await;
        match inner.sessions.get_mut(session_id) {
            Some(session) => {
                if !session.transcript.is_empty() {
                    session.transcript.push(' ');
                }
                session.transcript.push_str(text);
                true
            }
            None => {
                debug!("Transcript for unknown session {} dropped", session_id);
                false
            }
        }
    }

    /// Record the audio artifact URL on a session. No-op-safe like
    /// `append_transcript`.
    pub async fn set_audio_url(&self, session_id: &str, url: &str) -> bool {
        let mut inner = self.inner.write().await;
        match inner.sessions.get_mut(session_id) {
            Some(session) => {
                session.audio_url = Some(url.to_string());
                true
            }
            None => false,
        }
    }

    /// Append captured PCM bytes to the session's audio buffer.
    pub async fn append_audio(&self, session_id: &str, pcm: &[u8]) -> bool {
        let mut inner = self.inner.write().await;
        match inner.sessions.get_mut(session_id) {
            Some(session) if session.status == SessionStatus::Active => {
                session.audio_buffer.extend_from_slice(pcm);
                true
            }
            _ => false,
        }
    }

    /// Snapshot of the captured PCM for a session.
    ///
    /// Non-draining so a redelivered audio task re-produces the same
    /// artifact; the buffer is reclaimed by the retention sweep.
    pub async fn captured_audio(&self, session_id: &str) -> Option<Vec<u8>> {
        let inner = self.inner.read().await;
        inner.sessions.get(session_id).map(|s| s.audio_buffer.clone())
    }

    pub async fn get_session(&self, session_id: &str) -> Option<Session> {
        let inner = self.inner.read().await;
        inner.sessions.get(session_id).cloned()
    }

    pub async fn list_sessions(&self) -> Vec<Session> {
        let inner = self.inner.read().await;
        let mut sessions: Vec<Session> = inner.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        sessions
    }

    pub async fn get_conversation(&self, conversation_id: &str) -> Option<Conversation> {
        let inner = self.inner.read().await;
        inner.conversations.get(conversation_id).cloned()
    }

    /// Record the persisted audio artifact URL. Idempotent field-set write.
    pub async fn set_conversation_audio_url(
        &self,
        conversation_id: &str,
        url: &str,
    ) -> Result<(), RegistryError> {
        self.update_conversation(conversation_id, |c| {
            c.audio_url = Some(url.to_string());
        })
        .await
    }

    /// Record the summary text and its uploaded artifact URL.
    pub async fn set_summary(
        &self,
        conversation_id: &str,
        summary: &str,
        url: &str,
    ) -> Result<(), RegistryError> {
        self.update_conversation(conversation_id, |c| {
            c.summary = Some(summary.to_string());
            c.summary_url = Some(url.to_string());
        })
        .await
    }

    /// Record the rendered document URL.
    pub async fn set_document_url(
        &self,
        conversation_id: &str,
        url: &str,
    ) -> Result<(), RegistryError> {
        self.update_conversation(conversation_id, |c| {
            c.document_url = Some(url.to_string());
        })
        .await
    }

    /// Mark a conversation fully processed.
    pub async fn complete_conversation(&self, conversation_id: &str) -> Result<(), RegistryError> {
        self.update_conversation(conversation_id, |c| {
            c.status = ConversationStatus::Completed;
        })
        .await
    }

    /// Mark a conversation failed, retaining the error text and whatever
    /// stage results completed before the failure.
    pub async fn fail_conversation(
        &self,
        conversation_id: &str,
        error: &str,
    ) -> Result<(), RegistryError> {
        self.update_conversation(conversation_id, |c| {
            c.status = ConversationStatus::Failed;
            c.error = Some(error.to_string());
        })
        .await
    }

    async fn update_conversation<F>(
        &self,
        conversation_id: &str,
        apply: F,
    ) -> Result<(), RegistryError>
    where
        F: FnOnce(&mut Conversation),
    {
        let updated = {
            let mut inner = self.inner.write().await;
            let conversation = inner
                .conversations
                .get_mut(conversation_id)
                .ok_or_else(|| RegistryError::ConversationNotFound(conversation_id.to_string()))?;
            apply(conversation);
            conversation.clone()
        };

        self.broadcaster
            .publish(ChangeEvent::ConversationUpdated {
                conversation: updated,
            })
            .await;
        Ok(())
    }

    /// Remove sessions ended more than the retention window ago.
    ///
    /// The only destructive operation on the registry. Never touches
    /// conversations.
    pub async fn sweep(&self) -> usize {
        let cutoff = Utc::now() - ChronoDuration::hours(SESSION_RETENTION_HOURS);
        let mut inner = self.inner.write().await;

        let before = inner.sessions.len();
        inner
            .sessions
            .retain(|_, s| !matches!(s.ended_at, Some(ended) if ended < cutoff));
        let removed = before - inner.sessions.len();

        if removed > 0 {
            info!("Sweep removed {} expired sessions", removed);
        }
        removed
    }

    /// Run the retention sweep on a fixed interval (5 minutes in production).
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let registry = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; skip it so a fresh
            // registry is not swept at startup.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                registry.sweep().await;
            }
        })
    }

    fn emit(&self, event: SessionEvent) {
        if let Err(e) = self.events.try_send(event) {
            warn!("Session event dropped: {}", e);
        }
    }
}
