use super::protocol::{
    AudioFormat, ControlFrame, EngineMessage, OutboundFrame, TranscriptionConfig,
};
use super::transport::{EngineSink, EngineStream, EngineTransport};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Capacity of the transcript event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("connect timed out")]
    ConnectTimeout,

    #[error("already connected")]
    AlreadyConnected,

    #[error("engine rejected configuration: {0}")]
    Rejected(String),

    #[error("configuration not acknowledged; audio rejected")]
    NotConfigured,

    #[error("engine channel closed")]
    ChannelClosed,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("max reconnect attempts reached")]
    MaxReconnectAttemptsReached,
}

/// Connection lifecycle of one session's relay.
///
/// `Reconnecting` is entered only on abnormal closure, never on an
/// operator-initiated close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Disconnected,
    Connecting,
    Configured,
    Streaming,
    Reconnecting,
}

/// Typed events surfaced to the session owner.
#[derive(Debug, Clone)]
pub enum TranscriptEvent {
    RecognitionStarted { engine_session_id: String },
    Partial { text: String },
    Final { text: String },
    EndOfTranscript,
    Info { reason: String },
    EngineError { reason: String },
    Disconnected,
    MaxReconnectAttemptsReached,
}

/// Per-session relay parameters.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub engine_url: String,
    pub language: String,
    pub enable_partials: bool,
    pub punctuation_overrides: Option<serde_json::Value>,
    pub max_delay: Option<f64>,
    pub diarization: Option<String>,
    pub encoding: String,
    pub sample_rate: u32,
    pub connect_timeout: Duration,
    pub reconnect_base: Duration,
    pub max_reconnect_attempts: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            engine_url: "ws://localhost:9000".to_string(),
            language: "en".to_string(),
            enable_partials: true,
            punctuation_overrides: None,
            max_delay: Some(2.0),
            diarization: None,
            encoding: "pcm_s16le".to_string(),
            sample_rate: 16000,
            connect_timeout: Duration::from_secs(10),
            reconnect_base: Duration::from_secs(1),
            max_reconnect_attempts: 5,
        }
    }
}

/// Duplex relay between one session and the recognition engine.
///
/// Frames outbound audio with monotonic sequence numbers, demultiplexes
/// inbound frames into typed events, and reconnects with exponential
/// backoff on abnormal closure. Each session's relay is independent;
/// blocking here never stalls other sessions.
pub struct RelayClient {
    session_id: String,
    config: RelayConfig,
    transport: Arc<dyn EngineTransport>,
    state: Mutex<RelayState>,
    sink: Mutex<Option<Box<dyn EngineSink>>>,
    /// Number of audio chunks sent; chunk N carries sequence number N
    seq: AtomicU64,
    partial: Mutex<Option<String>>,
    engine_session_id: Mutex<Option<String>>,
    /// Set by an operator-initiated close; suppresses reconnection
    closing: AtomicBool,
    events: mpsc::Sender<TranscriptEvent>,
}

impl RelayClient {
    pub fn new(
        session_id: String,
        config: RelayConfig,
        transport: Arc<dyn EngineTransport>,
    ) -> (Arc<Self>, mpsc::Receiver<TranscriptEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let client = Arc::new(Self {
            session_id,
            config,
            transport,
            state: Mutex::new(RelayState::Disconnected),
            sink: Mutex::new(None),
            seq: AtomicU64::new(0),
            partial: Mutex::new(None),
            engine_session_id: Mutex::new(None),
            closing: AtomicBool::new(false),
            events: tx,
        });
        (client, rx)
    }

    /// Open the engine channel, send the configuration frame and wait for
    /// the engine's acknowledgement, then start consuming inbound frames.
    pub async fn connect(self: &Arc<Self>) -> Result<(), RelayError> {
        {
            let mut state = self.state.lock().await;
            if *state != RelayState::Disconnected {
                return Err(RelayError::AlreadyConnected);
            }
            *state = RelayState::Connecting;
        }

        let (sink, stream) = match self.establish().await {
            Ok(halves) => halves,
            Err(e) => {
                *self.state.lock().await = RelayState::Disconnected;
                return Err(e);
            }
        };

        *self.sink.lock().await = Some(sink);
        *self.state.lock().await = RelayState::Configured;

        let client = Arc::clone(self);
        tokio::spawn(client.run_reader(stream));

        info!("Session {} relay configured", self.session_id);
        Ok(())
    }

    /// Send one audio chunk and return its sequence number.
    ///
    /// Rejected locally unless the configuration has been acknowledged.
    /// Ordered relative to other audio from this session; fire-and-forget
    /// relative to the caller's flow otherwise.
    pub async fn send_audio(&self, chunk: &[u8]) -> Result<u64, RelayError> {
        {
            let state = self.state.lock().await;
            match *state {
                RelayState::Configured | RelayState::Streaming => {}
                _ => return Err(RelayError::NotConfigured),
            }
        }

        let mut sink = self.sink.lock().await;
        let sink = sink.as_mut().ok_or(RelayError::NotConfigured)?;
        // Sequence assignment happens under the sink lock so numbers and
        // frames leave in the same order.
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        sink.send(OutboundFrame::Audio(chunk.to_vec())).await?;

        let mut state = self.state.lock().await;
        if *state == RelayState::Configured {
            *state = RelayState::Streaming;
        }
        Ok(seq)
    }

    /// Send the end-of-stream frame carrying the last sequence number and
    /// close the channel. Tolerant of an already-closed channel.
    pub async fn end_stream(&self) -> Result<u64, RelayError> {
        self.closing.store(true, Ordering::SeqCst);
        let last_seq_no = self.seq.load(Ordering::SeqCst);

        let mut guard = self.sink.lock().await;
        if let Some(sink) = guard.as_mut() {
            if let Err(e) = sink
                .send(OutboundFrame::Control(ControlFrame::EndOfStream { last_seq_no }))
                .await
            {
                warn!(
                    "Session {} end-of-stream not delivered: {}",
                    self.session_id, e
                );
            }
            let _ = sink.close().await;
        }
        *guard = None;

        info!(
            "Session {} stream ended at sequence {}",
            self.session_id, last_seq_no
        );
        Ok(last_seq_no)
    }

    pub async fn state(&self) -> RelayState {
        *self.state.lock().await
    }

    /// Sequence number of the last audio chunk sent.
    pub fn last_seq_no(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    pub async fn current_partial(&self) -> Option<String> {
        self.partial.lock().await.clone()
    }

    pub async fn engine_session_id(&self) -> Option<String> {
        self.engine_session_id.lock().await.clone()
    }

    fn start_recognition_frame(&self) -> ControlFrame {
        ControlFrame::StartRecognition {
            audio_format: AudioFormat {
                encoding: self.config.encoding.clone(),
                sample_rate: self.config.sample_rate,
            },
            transcription_config: TranscriptionConfig {
                language: self.config.language.clone(),
                enable_partials: self.config.enable_partials,
                punctuation_overrides: self.config.punctuation_overrides.clone(),
                max_delay: self.config.max_delay,
                diarization: self.config.diarization.clone(),
            },
        }
    }

    /// Connect, configure and wait for the engine acknowledgement, bounded
    /// by the connect timeout.
    async fn establish(
        &self,
    ) -> Result<(Box<dyn EngineSink>, Box<dyn EngineStream>), RelayError> {
        let attempt = async {
            let (mut sink, mut stream) = self.transport.connect(&self.config.engine_url).await?;
            sink.send(OutboundFrame::Control(self.start_recognition_frame()))
                .await?;

            loop {
                match stream.next_message().await {
                    Some(Ok(EngineMessage::RecognitionStarted { id })) => {
                        *self.engine_session_id.lock().await = Some(id.clone());
                        self.emit(TranscriptEvent::RecognitionStarted {
                            engine_session_id: id,
                        })
                        .await;
                        return Ok((sink, stream));
                    }
                    Some(Ok(EngineMessage::Error { reason })) => {
                        return Err(RelayError::Rejected(reason));
                    }
                    Some(Ok(other)) => {
                        debug!(
                            "Session {} pre-acknowledgement frame ignored: {:?}",
                            self.session_id, other
                        );
                    }
                    Some(Err(e)) => return Err(e),
                    None => return Err(RelayError::ChannelClosed),
                }
            }
        };

        tokio::time::timeout(self.config.connect_timeout, attempt)
            .await
            .map_err(|_| RelayError::ConnectTimeout)?
    }

    /// Inbound loop: demultiplex frames into events and drive reconnection
    /// on abnormal closure.
    async fn run_reader(self: Arc<Self>, mut stream: Box<dyn EngineStream>) {
        loop {
            match stream.next_message().await {
                Some(Ok(message)) => self.handle_message(message).await,
                Some(Err(e)) => {
                    // Protocol-level noise; the channel itself is still up.
                    warn!("Session {} engine frame error: {}", self.session_id, e);
                    self.emit(TranscriptEvent::EngineError {
                        reason: e.to_string(),
                    })
                    .await;
                }
                None => {
                    if self.closing.load(Ordering::SeqCst) {
                        *self.state.lock().await = RelayState::Disconnected;
                        self.emit(TranscriptEvent::Disconnected).await;
                        break;
                    }
                    warn!(
                        "Session {} engine channel closed abnormally, reconnecting",
                        self.session_id
                    );
                    match self.reconnect().await {
                        Ok(new_stream) => {
                            stream = new_stream;
                        }
                        Err(_) => {
                            *self.state.lock().await = RelayState::Disconnected;
                            self.emit(TranscriptEvent::MaxReconnectAttemptsReached).await;
                            break;
                        }
                    }
                }
            }
        }
        debug!("Session {} relay reader stopped", self.session_id);
    }

    /// Bounded reconnect with exponential backoff. Engine-side state is not
    /// assumed to survive, so the configuration frame is resent every time.
    async fn reconnect(&self) -> Result<Box<dyn EngineStream>, RelayError> {
        *self.state.lock().await = RelayState::Reconnecting;
        *self.sink.lock().await = None;

        let mut delay = self.config.reconnect_base;
        for attempt in 1..=self.config.max_reconnect_attempts {
            tokio::time::sleep(delay).await;
            match self.establish().await {
                Ok((sink, stream)) => {
                    *self.sink.lock().await = Some(sink);
                    *self.state.lock().await = RelayState::Configured;
                    info!(
                        "Session {} reconnected on attempt {}",
                        self.session_id, attempt
                    );
                    return Ok(stream);
                }
                Err(e) => {
                    warn!(
                        "Session {} reconnect attempt {}/{} failed: {}",
                        self.session_id, attempt, self.config.max_reconnect_attempts, e
                    );
                    delay *= 2;
                }
            }
        }
        Err(RelayError::MaxReconnectAttemptsReached)
    }

    async fn handle_message(&self, message: EngineMessage) {
        match message {
            EngineMessage::RecognitionStarted { id } => {
                *self.engine_session_id.lock().await = Some(id.clone());
                self.emit(TranscriptEvent::RecognitionStarted {
                    engine_session_id: id,
                })
                .await;
            }
            EngineMessage::AddPartialTranscript { transcript } => {
                *self.partial.lock().await = Some(transcript.clone());
                self.emit(TranscriptEvent::Partial { text: transcript }).await;
            }
            EngineMessage::AddTranscript { transcript } => {
                *self.partial.lock().await = None;
                self.emit(TranscriptEvent::Final { text: transcript }).await;
            }
            EngineMessage::EndOfTranscript => {
                self.emit(TranscriptEvent::EndOfTranscript).await;
            }
            EngineMessage::Info { reason } => {
                self.emit(TranscriptEvent::Info { reason }).await;
            }
            EngineMessage::Error { reason } => {
                warn!("Session {} engine error: {}", self.session_id, reason);
                self.emit(TranscriptEvent::EngineError { reason }).await;
            }
        }
    }

    async fn emit(&self, event: TranscriptEvent) {
        if self.events.send(event).await.is_err() {
            debug!(
                "Session {} transcript event dropped, receiver gone",
                self.session_id
            );
        }
    }
}
