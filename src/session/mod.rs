//! Session and conversation lifecycle
//!
//! This module provides the in-memory registry that owns:
//! - Live session records and their lifecycle transitions
//! - Conversation records derived at session end
//! - Idempotent field-set updates applied by pipeline stages
//! - Periodic retention sweep of ended sessions

mod registry;
mod transcripts;
mod types;

pub use registry::{RegistryError, SessionEvent, SessionRegistry};
pub use transcripts::spawn_transcript_pump;
pub use types::{Conversation, ConversationStatus, Session, SessionStatus};
