//! Realtime signaling relay
//!
//! Per-session peer-connection bookkeeping: offer/answer/candidate exchange,
//! connectivity-state transitions surfaced as events, and forwarding of
//! inbound data-channel payloads into the transcription relay. The media
//! engine itself is external; this layer only tracks and forwards.

use crate::relay::RelayClient;
use crate::session::SessionRegistry;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Capacity of the signaling event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("malformed data channel payload: {0}")]
    MalformedPayload(String),

    #[error("connection is closed")]
    Closed,
}

/// Connectivity of the session's peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    New,
    Connected,
    Failed,
    Closed,
}

/// Connectivity transitions surfaced to the session's caller.
///
/// `Failed` is reported upward but not retried here; retry policy belongs
/// to the caller.
#[derive(Debug, Clone)]
pub enum SignalingEvent {
    Connected { session_id: String },
    Failed { session_id: String, reason: String },
    Closed { session_id: String },
}

/// Inbound signal from the remote peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Signal {
    Offer { sdp: String },
    Answer { sdp: String },
    Candidate {
        candidate: String,
        #[serde(default)]
        sdp_mid: Option<String>,
    },
}

/// Data-channel envelope carrying captured audio as base64 PCM.
#[derive(Debug, Serialize, Deserialize)]
pub struct DataChannelMessage {
    pub session_id: String,
    pub sequence: u32,
    pub pcm: String,
    pub sample_rate: u32,
    pub channels: u16,
    #[serde(rename = "final")]
    pub final_frame: bool,
}

/// Bookkeeping for one session's peer connection and data channel.
pub struct SignalingRelay {
    session_id: String,
    state: Mutex<ConnectivityState>,
    remote_offer: Mutex<Option<String>>,
    remote_answer: Mutex<Option<String>>,
    candidates: Mutex<Vec<String>>,
    relay: Arc<RelayClient>,
    registry: Arc<SessionRegistry>,
    events: mpsc::Sender<SignalingEvent>,
}

impl SignalingRelay {
    pub fn new(
        session_id: String,
        relay: Arc<RelayClient>,
        registry: Arc<SessionRegistry>,
    ) -> (Self, mpsc::Receiver<SignalingEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let relay = Self {
            session_id,
            state: Mutex::new(ConnectivityState::New),
            remote_offer: Mutex::new(None),
            remote_answer: Mutex::new(None),
            candidates: Mutex::new(Vec::new()),
            relay,
            registry,
            events: tx,
        };
        (relay, rx)
    }

    /// Record an inbound signal. Signals after close are rejected.
    pub async fn apply_signal(&self, signal: Signal) -> Result<(), SignalingError> {
        if *self.state.lock().await == ConnectivityState::Closed {
            return Err(SignalingError::Closed);
        }
        match signal {
            Signal::Offer { sdp } => {
                debug!("Session {} received offer", self.session_id);
                *self.remote_offer.lock().await = Some(sdp);
            }
            Signal::Answer { sdp } => {
                debug!("Session {} received answer", self.session_id);
                *self.remote_answer.lock().await = Some(sdp);
            }
            Signal::Candidate { candidate, .. } => {
                self.candidates.lock().await.push(candidate);
            }
        }
        Ok(())
    }

    /// Surface a connectivity transition reported by the media layer.
    pub async fn transition(&self, next: ConnectivityState) {
        let mut state = self.state.lock().await;
        if *state == next || *state == ConnectivityState::Closed {
            return;
        }
        *state = next;
        drop(state);

        match next {
            ConnectivityState::Connected => {
                info!("Session {} peer connected", self.session_id);
                self.emit(SignalingEvent::Connected {
                    session_id: self.session_id.clone(),
                })
                .await;
            }
            ConnectivityState::Failed => {
                warn!("Session {} peer connection failed", self.session_id);
                self.emit(SignalingEvent::Failed {
                    session_id: self.session_id.clone(),
                    reason: "peer connection failed".to_string(),
                })
                .await;
            }
            ConnectivityState::Closed => {
                self.emit(SignalingEvent::Closed {
                    session_id: self.session_id.clone(),
                })
                .await;
            }
            ConnectivityState::New => {}
        }
    }

    /// Decode a data-channel payload and forward the audio to the
    /// transcription relay and the session's capture buffer.
    pub async fn handle_data(&self, payload: &[u8]) -> Result<(), SignalingError> {
        if *self.state.lock().await == ConnectivityState::Closed {
            return Err(SignalingError::Closed);
        }

        let message: DataChannelMessage = serde_json::from_slice(payload)
            .map_err(|e| SignalingError::MalformedPayload(e.to_string()))?;
        let pcm = base64::engine::general_purpose::STANDARD
            .decode(&message.pcm)
            .map_err(|e| SignalingError::MalformedPayload(e.to_string()))?;

        if message.final_frame {
            debug!("Session {} data channel sent final frame", self.session_id);
            return Ok(());
        }

        self.registry.append_audio(&self.session_id, &pcm).await;
        if let Err(e) = self.relay.send_audio(&pcm).await {
            warn!(
                "Session {} audio chunk not relayed: {}",
                self.session_id, e
            );
        }
        Ok(())
    }

    pub async fn state(&self) -> ConnectivityState {
        *self.state.lock().await
    }

    pub async fn remote_offer(&self) -> Option<String> {
        self.remote_offer.lock().await.clone()
    }

    pub async fn remote_answer(&self) -> Option<String> {
        self.remote_answer.lock().await.clone()
    }

    pub async fn candidate_count(&self) -> usize {
        self.candidates.lock().await.len()
    }

    /// Close the peer connection. Closing an already-closed connection is a
    /// no-op, not an error.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if *state == ConnectivityState::Closed {
            return;
        }
        *state = ConnectivityState::Closed;
        drop(state);

        info!("Session {} peer connection closed", self.session_id);
        self.emit(SignalingEvent::Closed {
            session_id: self.session_id.clone(),
        })
        .await;
    }

    async fn emit(&self, event: SignalingEvent) {
        if self.events.send(event).await.is_err() {
            debug!(
                "Session {} signaling event dropped, receiver gone",
                self.session_id
            );
        }
    }
}
