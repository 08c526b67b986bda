use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Ended,
}

/// One live audio interaction, before it is finalized into a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier
    pub id: String,

    /// Email of the submitting user/operator
    pub identity: String,

    /// Application the session was started from
    pub app_name: String,

    /// Language code for transcription (e.g. "en")
    pub language: String,

    /// Identifier of the owning network connection
    pub connection_id: String,

    /// When the session started
    pub started_at: DateTime<Utc>,

    /// When the session ended, if it has
    pub ended_at: Option<DateTime<Utc>>,

    pub status: SessionStatus,

    /// Accumulated final transcript text
    pub transcript: String,

    /// Reference to the persisted audio artifact, once uploaded
    pub audio_url: Option<String>,

    /// Captured PCM bytes, read by the audio persistence stage
    #[serde(skip)]
    pub audio_buffer: Vec<u8>,
}

/// Processing state of a conversation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Processing,
    Completed,
    Failed,
}

/// The durable record derived from an ended session.
///
/// One-to-one with a session but independently addressable: it outlives the
/// session and accrues pipeline results. Mutated exclusively by pipeline
/// stages via idempotent field-set updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,

    /// Back-reference to the originating session (non-owning)
    pub session_id: String,

    pub identity: String,
    pub app_name: String,

    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,

    /// Whole seconds, computed once at session end and never recomputed
    pub duration_secs: i64,

    pub language: String,
    pub status: ConversationStatus,

    pub transcript: String,

    /// Filled in by the audio persistence stage
    pub audio_url: Option<String>,

    /// Filled in by the summarization stage
    pub summary_url: Option<String>,

    /// Filled in by the document rendering stage
    pub document_url: Option<String>,

    /// Summary text, carried so the document stage avoids a storage round-trip
    pub summary: Option<String>,

    /// Error text from the stage that terminally failed, if any
    pub error: Option<String>,
}
