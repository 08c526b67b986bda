use super::registry::SessionRegistry;
use crate::relay::TranscriptEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Forward transcript events from a session's relay client into the registry.
///
/// Finals are appended to the session transcript in engine order; partials
/// are ephemeral and only logged here. Runs until the event channel closes.
pub fn spawn_transcript_pump(
    registry: Arc<SessionRegistry>,
    session_id: String,
    mut events: mpsc::Receiver<TranscriptEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("Transcript pump started for session {}", session_id);

        while let Some(event) = events.recv().await {
            match event {
                TranscriptEvent::RecognitionStarted { engine_session_id } => {
                    info!(
                        "Engine session {} assigned to session {}",
                        engine_session_id, session_id
                    );
                }
                TranscriptEvent::Partial { text } => {
                    debug!("Partial for session {}: {}", session_id, text);
                }
                TranscriptEvent::Final { text } => {
                    if !registry.append_transcript(&session_id, &text).await {
                        debug!(
                            "Final transcript for removed session {} dropped",
                            session_id
                        );
                    }
                }
                TranscriptEvent::EndOfTranscript => {
                    info!("End of transcript for session {}", session_id);
                }
                TranscriptEvent::Info { reason } => {
                    debug!("Engine info for session {}: {}", session_id, reason);
                }
                TranscriptEvent::EngineError { reason } => {
                    warn!("Engine error for session {}: {}", session_id, reason);
                }
                TranscriptEvent::Disconnected => {
                    debug!("Engine channel closed for session {}", session_id);
                }
                TranscriptEvent::MaxReconnectAttemptsReached => {
                    warn!(
                        "Session {} degraded: engine reconnect attempts exhausted",
                        session_id
                    );
                }
            }
        }

        debug!("Transcript pump stopped for session {}", session_id);
    })
}
