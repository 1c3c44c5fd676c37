//! Session template and conversation item types.
//!
//! `SessionConfig` is the mutable session template owned by
//! `TransportSession`; every mutation is merged locally and re-sent to the
//! peer in full. Conversation items are immutable once sent.

use serde::{Deserialize, Serialize};

// =============================================================================
// Session Configuration
// =============================================================================

/// Session configuration sent via `session.update`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Enabled response modalities ("text", "audio")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,

    /// System instructions for the assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Voice for audio output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Input audio format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<String>,

    /// Output audio format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<String>,

    /// Input audio transcription configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,

    /// Turn detection configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,

    /// Tool catalog
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,

    /// Tool choice strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,

    /// Temperature for response generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum response output tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_response_output_tokens: Option<MaxTokens>,
}

impl SessionConfig {
    /// Merge a partial update into this config. `Some` fields of the patch
    /// replace the current values; `None` fields are left untouched.
    pub fn merge_from(&mut self, patch: SessionConfig) {
        macro_rules! take {
            ($field:ident) => {
                if patch.$field.is_some() {
                    self.$field = patch.$field;
                }
            };
        }
        take!(modalities);
        take!(instructions);
        take!(voice);
        take!(input_audio_format);
        take!(output_audio_format);
        take!(input_audio_transcription);
        take!(turn_detection);
        take!(tools);
        take!(tool_choice);
        take!(temperature);
        take!(max_response_output_tokens);
    }
}

/// Maximum tokens configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaxTokens {
    /// Specific number of tokens
    Number(i32),
    /// Infinite tokens ("inf")
    Infinite(String),
}

/// Input audio transcription configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputAudioTranscription {
    /// Transcription model (e.g., "whisper-1")
    pub model: String,
}

/// Turn detection (server-side VAD) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    /// Server-side VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        /// Activation threshold (0.0 to 1.0)
        #[serde(skip_serializing_if = "Option::is_none")]
        threshold: Option<f32>,
        /// Audio prefix padding in ms
        #[serde(skip_serializing_if = "Option::is_none")]
        prefix_padding_ms: Option<u32>,
        /// Silence duration before end of turn in ms
        #[serde(skip_serializing_if = "Option::is_none")]
        silence_duration_ms: Option<u32>,
    },
    /// No automatic turn detection
    #[serde(rename = "none")]
    None {},
}

impl Default for TurnDetection {
    fn default() -> Self {
        TurnDetection::ServerVad {
            threshold: Some(0.5),
            prefix_padding_ms: Some(300),
            silence_duration_ms: Some(500),
        }
    }
}

/// Tool definition in the session catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    /// Tool type (always "function")
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function name
    pub name: String,
    /// Function description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema for parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

impl ToolDef {
    /// Define a function tool.
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: "function".to_string(),
            name: name.into(),
            description: Some(description.into()),
            parameters: Some(parameters),
        }
    }
}

// =============================================================================
// Conversation Items
// =============================================================================

/// Content part within a conversation item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    /// Text supplied by the user or host
    #[serde(rename = "input_text")]
    InputText {
        /// The text content
        text: String,
    },
    /// Text produced by the assistant
    #[serde(rename = "text")]
    Text {
        /// The text content
        text: String,
    },
    /// Audio captured from the user; payload lives in the peer-side input
    /// buffer, only the transcript travels in item form
    #[serde(rename = "input_audio")]
    InputAudio {
        /// Base64 audio, present only when inlined
        #[serde(skip_serializing_if = "Option::is_none")]
        audio: Option<String>,
        /// Transcript of the audio, once available
        #[serde(skip_serializing_if = "Option::is_none")]
        transcript: Option<String>,
    },
    /// Image supplied by the host (data URL or https URL)
    #[serde(rename = "input_image")]
    InputImage {
        /// Image location or data URL
        image_url: String,
    },
}

impl ContentPart {
    /// A user text part.
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::InputText { text: text.into() }
    }

    /// A user image part.
    pub fn image(url: impl Into<String>) -> Self {
        ContentPart::InputImage {
            image_url: url.into(),
        }
    }
}

/// Conversation item.
///
/// One struct covers messages, function calls, and function outputs; the
/// populated fields depend on `item_type`, matching the wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationItem {
    /// Item ID (assigned by the peer for inbound items)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Item type ("message", "function_call", "function_call_output")
    #[serde(rename = "type")]
    pub item_type: String,
    /// Item status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Role (user, assistant, system)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Content parts for message items
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentPart>>,
    /// Call ID for function call / output items
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Function name for function call items
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Function arguments for function call items
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    /// Function output for function_call_output items
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ConversationItem {
    /// A user message with the given content parts.
    pub fn user_message(content: Vec<ContentPart>) -> Self {
        Self {
            id: None,
            item_type: "message".to_string(),
            status: None,
            role: Some("user".to_string()),
            content: Some(content),
            call_id: None,
            name: None,
            arguments: None,
            output: None,
        }
    }

    /// A function call output item tagged with the original call id.
    pub fn function_call_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            id: None,
            item_type: "function_call_output".to_string(),
            status: None,
            role: None,
            content: None,
            call_id: Some(call_id.into()),
            name: None,
            arguments: None,
            output: Some(output.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_from_replaces_only_some_fields() {
        let mut config = SessionConfig {
            voice: Some("alloy".to_string()),
            instructions: Some("be brief".to_string()),
            ..Default::default()
        };
        config.merge_from(SessionConfig {
            voice: Some("shimmer".to_string()),
            ..Default::default()
        });
        assert_eq!(config.voice.as_deref(), Some("shimmer"));
        assert_eq!(config.instructions.as_deref(), Some("be brief"));
    }

    #[test]
    fn test_turn_detection_default_serialization() {
        let json = serde_json::to_value(TurnDetection::default()).unwrap();
        assert_eq!(json["type"], "server_vad");
        assert_eq!(json["threshold"], 0.5);
        assert_eq!(json["prefix_padding_ms"], 300);
        assert_eq!(json["silence_duration_ms"], 500);
    }

    #[test]
    fn test_content_part_tags() {
        let part = serde_json::to_value(ContentPart::text("hello")).unwrap();
        assert_eq!(part["type"], "input_text");

        let part = serde_json::to_value(ContentPart::image("data:image/png;base64,AA")).unwrap();
        assert_eq!(part["type"], "input_image");
    }

    #[test]
    fn test_function_call_output_shape() {
        let item = ConversationItem::function_call_output("call_1", r#"{"ok":true}"#);
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "function_call_output");
        assert_eq!(json["call_id"], "call_1");
        assert!(json.get("role").is_none());
    }
}
