//! Transcription relay
//!
//! Per-session duplex connection to the external recognition engine. Frames
//! outbound audio, tracks sequence numbers, and demultiplexes inbound
//! partial/final transcript and control/error frames into typed events.

mod client;
pub mod memory;
mod protocol;
mod transport;

pub use client::{RelayClient, RelayConfig, RelayError, RelayState, TranscriptEvent};
pub use protocol::{
    AudioFormat, ControlFrame, EngineMessage, OutboundFrame, TranscriptionConfig,
};
pub use transport::{EngineSink, EngineStream, EngineTransport, WsTransport};
