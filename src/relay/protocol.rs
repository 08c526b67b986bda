use serde::{Deserialize, Serialize};

/// Audio format advertised in the configuration frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioFormat {
    pub encoding: String,
    pub sample_rate: u32,
}

/// Recognition parameters sent once per connection, before any audio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    pub language: String,
    pub enable_partials: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub punctuation_overrides: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_delay: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diarization: Option<String>,
}

/// Control frames sent to the engine as JSON. Audio goes as raw binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlFrame {
    StartRecognition {
        audio_format: AudioFormat,
        transcription_config: TranscriptionConfig,
    },
    EndOfStream {
        /// Sequence number of the last audio chunk sent, so the engine can
        /// detect gaps
        last_seq_no: u64,
    },
}

/// Everything the client can put on the wire.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    Control(ControlFrame),
    Audio(Vec<u8>),
}

/// Inbound frames, demultiplexed by the JSON `message` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "message")]
pub enum EngineMessage {
    /// The engine accepted the configuration and assigned its own session id
    RecognitionStarted { id: String },

    /// Ephemeral transcript, overwritten by the next partial or cleared by a
    /// final
    AddPartialTranscript { transcript: String },

    /// Confirmed transcript segment, never mutated retroactively
    AddTranscript { transcript: String },

    EndOfTranscript,

    Info { reason: String },

    /// Engine-reported error; surfaced to the caller, does not by itself
    /// terminate the session
    Error { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_recognition_frame_shape() {
        let frame = ControlFrame::StartRecognition {
            audio_format: AudioFormat {
                encoding: "pcm_s16le".to_string(),
                sample_rate: 16000,
            },
            transcription_config: TranscriptionConfig {
                language: "en".to_string(),
                enable_partials: true,
                punctuation_overrides: None,
                max_delay: Some(2.0),
                diarization: None,
            },
        };

        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"StartRecognition\""));
        assert!(json.contains("\"sample_rate\":16000"));
        assert!(json.contains("\"enable_partials\":true"));
        assert!(!json.contains("punctuation_overrides"));
    }

    #[test]
    fn end_of_stream_carries_last_seq_no() {
        let frame = ControlFrame::EndOfStream { last_seq_no: 42 };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"last_seq_no\":42"));
    }

    #[test]
    fn inbound_demux_by_message_tag() {
        let msg: EngineMessage =
            serde_json::from_str(r#"{"message":"AddTranscript","transcript":"hello"}"#).unwrap();
        assert!(matches!(msg, EngineMessage::AddTranscript { transcript } if transcript == "hello"));

        let msg: EngineMessage =
            serde_json::from_str(r#"{"message":"RecognitionStarted","id":"eng-1"}"#).unwrap();
        assert!(matches!(msg, EngineMessage::RecognitionStarted { id } if id == "eng-1"));

        let msg: EngineMessage = serde_json::from_str(r#"{"message":"EndOfTranscript"}"#).unwrap();
        assert!(matches!(msg, EngineMessage::EndOfTranscript));
    }
}
