//! Wire event types for the duplex session.
//!
//! All events are JSON over a persistent WebSocket, internally tagged by
//! `type`.
//!
//! Client events (sent to the peer):
//! - session.update, input_audio_buffer.append/commit/clear,
//!   conversation.item.create, response.create, response.cancel
//!
//! Server events (received from the peer):
//! - session.created/updated, input_audio_buffer.speech_started/stopped,
//!   conversation.item.input_audio_transcription.completed,
//!   response.created/done/cancelled, response.audio.delta/done,
//!   response.audio_transcript.delta/done,
//!   response.function_call_arguments.done, error

use base64::prelude::*;
use serde::{Deserialize, Serialize};

use super::session::{ConversationItem, SessionConfig};

// =============================================================================
// Client Events (sent to the peer)
// =============================================================================

/// Client events sent over the duplex connection.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Update session configuration
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Full session configuration (always re-sent whole)
        session: SessionConfig,
    },

    /// Append audio to the peer-side input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Base64-encoded PCM16 audio
        audio: String,
    },

    /// Finalize the current utterance
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,

    /// Discard the current input buffer
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear,

    /// Create a conversation item
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        /// Item to create
        item: ConversationItem,
    },

    /// Request response generation
    #[serde(rename = "response.create")]
    ResponseCreate,

    /// Cancel the in-flight response
    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

impl ClientEvent {
    /// Create an audio append event from raw PCM16 bytes.
    pub fn audio_append(data: &[u8]) -> Self {
        ClientEvent::InputAudioBufferAppend {
            audio: BASE64_STANDARD.encode(data),
        }
    }
}

// =============================================================================
// Server Events (received from the peer)
// =============================================================================

/// Server events received over the duplex connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Error reported by the peer
    #[serde(rename = "error")]
    Error {
        /// Error details
        error: PeerError,
    },

    /// Session created (peer acknowledges the connection)
    #[serde(rename = "session.created")]
    SessionCreated {
        /// Session information
        session: SessionInfo,
    },

    /// Session configuration acknowledged
    #[serde(rename = "session.updated")]
    SessionUpdated {
        /// Session information
        session: SessionInfo,
    },

    /// Peer-side VAD detected speech start
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        /// Audio start timestamp in ms
        #[serde(default)]
        audio_start_ms: u64,
        /// Item ID
        #[serde(default)]
        item_id: Option<String>,
    },

    /// Peer-side VAD detected speech stop
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        /// Audio end timestamp in ms
        #[serde(default)]
        audio_end_ms: u64,
        /// Item ID
        #[serde(default)]
        item_id: Option<String>,
    },

    /// Input buffer committed
    #[serde(rename = "input_audio_buffer.committed")]
    InputAudioBufferCommitted {
        /// New item ID
        item_id: String,
    },

    /// Input buffer cleared
    #[serde(rename = "input_audio_buffer.cleared")]
    InputAudioBufferCleared,

    /// Conversation item created
    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated {
        /// Created item
        item: ConversationItem,
    },

    /// User utterance transcription completed
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted {
        /// Item ID
        item_id: String,
        /// Transcript text
        transcript: String,
    },

    /// Response generation started
    #[serde(rename = "response.created")]
    ResponseCreated {
        /// Response information
        response: ResponseInfo,
    },

    /// Response generation finished
    #[serde(rename = "response.done")]
    ResponseDone {
        /// Response information
        response: ResponseInfo,
    },

    /// Response generation cancelled
    #[serde(rename = "response.cancelled")]
    ResponseCancelled {
        /// Response information
        response: ResponseInfo,
    },

    /// Output item added to the response (carries the function name for
    /// function_call items, ahead of the arguments)
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded {
        /// Response ID
        response_id: String,
        /// Item
        item: ConversationItem,
    },

    /// Assistant transcript chunk
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta {
        /// Item ID
        item_id: String,
        /// Transcript delta
        delta: String,
    },

    /// Assistant transcript complete
    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone {
        /// Item ID
        item_id: String,
        /// Full transcript
        transcript: String,
    },

    /// Synthesized audio chunk
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        /// Response ID
        response_id: String,
        /// Item ID
        item_id: String,
        /// Base64-encoded PCM16 audio delta
        delta: String,
    },

    /// Synthesized audio complete for the item
    #[serde(rename = "response.audio.done")]
    AudioDone {
        /// Response ID
        response_id: String,
        /// Item ID
        item_id: String,
    },

    /// Function call arguments complete
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        /// Item ID
        item_id: String,
        /// Call ID
        call_id: String,
        /// Full JSON arguments
        arguments: String,
    },
}

impl ServerEvent {
    /// Decode base64 audio from an AudioDelta payload.
    pub fn decode_audio_delta(delta: &str) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64_STANDARD.decode(delta)
    }
}

// =============================================================================
// Supporting Types
// =============================================================================

/// Error information reported by the peer.
#[derive(Debug, Clone, Deserialize)]
pub struct PeerError {
    /// Error type
    #[serde(rename = "type", default)]
    pub error_type: String,
    /// Error code
    #[serde(default)]
    pub code: Option<String>,
    /// Error message
    #[serde(default)]
    pub message: String,
}

impl PeerError {
    /// Whether this is the expected "no active response to cancel" race.
    ///
    /// Cancellation legitimately races a response's natural completion; the
    /// peer's complaint in that case is benign and must be swallowed.
    pub fn is_benign_cancel_race(&self) -> bool {
        self.code.as_deref() == Some("response_cancel_not_active")
            || self.message.to_lowercase().contains("no active response")
    }
}

/// Session information from the peer.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    /// Session ID
    pub id: String,
    /// Model backing the session
    #[serde(default)]
    pub model: Option<String>,
    /// Negotiated voice
    #[serde(default)]
    pub voice: Option<String>,
}

/// Response information from the peer.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseInfo {
    /// Response ID
    pub id: String,
    /// Response status
    #[serde(default)]
    pub status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_tags() {
        let json = serde_json::to_string(&ClientEvent::InputAudioBufferCommit).unwrap();
        assert!(json.contains("input_audio_buffer.commit"));

        let json = serde_json::to_string(&ClientEvent::ResponseCancel).unwrap();
        assert!(json.contains("response.cancel"));
    }

    #[test]
    fn test_audio_append_roundtrip() {
        let data = vec![0u8, 1, 2, 3];
        match ClientEvent::audio_append(&data) {
            ClientEvent::InputAudioBufferAppend { audio } => {
                assert_eq!(BASE64_STANDARD.decode(&audio).unwrap(), data);
            }
            _ => panic!("wrong event type"),
        }
    }

    #[test]
    fn test_server_event_deserialization() {
        let json = r#"{
            "type": "response.created",
            "response": {"id": "resp_1", "status": "in_progress"}
        }"#;
        match serde_json::from_str::<ServerEvent>(json).unwrap() {
            ServerEvent::ResponseCreated { response } => {
                assert_eq!(response.id, "resp_1");
            }
            _ => panic!("wrong event type"),
        }
    }

    #[test]
    fn test_speech_started_deserialization() {
        let json = r#"{
            "type": "input_audio_buffer.speech_started",
            "audio_start_ms": 120,
            "item_id": "item_9"
        }"#;
        match serde_json::from_str::<ServerEvent>(json).unwrap() {
            ServerEvent::SpeechStarted {
                audio_start_ms,
                item_id,
            } => {
                assert_eq!(audio_start_ms, 120);
                assert_eq!(item_id.as_deref(), Some("item_9"));
            }
            _ => panic!("wrong event type"),
        }
    }

    #[test]
    fn test_benign_cancel_race_detection() {
        let by_code = PeerError {
            error_type: "invalid_request_error".to_string(),
            code: Some("response_cancel_not_active".to_string()),
            message: "Cancellation failed".to_string(),
        };
        assert!(by_code.is_benign_cancel_race());

        let by_message = PeerError {
            error_type: "invalid_request_error".to_string(),
            code: None,
            message: "Cancellation failed: no active response found".to_string(),
        };
        assert!(by_message.is_benign_cancel_race());

        let real = PeerError {
            error_type: "server_error".to_string(),
            code: None,
            message: "internal error".to_string(),
        };
        assert!(!real.is_benign_cancel_race());
    }

    #[test]
    fn test_malformed_event_fails_to_parse() {
        assert!(serde_json::from_str::<ServerEvent>(r#"{"type":"totally.unknown"}"#).is_err());
    }
}
