//! Engine configuration types.
//!
//! Host-facing knobs for one engine instance: voice/locale preferences that
//! feed session negotiation, and the capture/playback tuning constants. The
//! tuning defaults are policy, not protocol — they match the behavior the
//! engine was tuned against and can be overridden per host.

use serde::{Deserialize, Serialize};

use crate::protocol::{InputAudioTranscription, MaxTokens, SessionConfig, TurnDetection};

/// Default wire sample rate for PCM16 audio, both directions.
pub const WIRE_SAMPLE_RATE: u32 = 24000;

// =============================================================================
// Audio Formats
// =============================================================================

/// Supported wire audio formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireAudioFormat {
    /// PCM 16-bit signed little-endian (default)
    #[default]
    Pcm16,
    /// G.711 u-law (8-bit)
    #[serde(rename = "g711_ulaw")]
    G711Ulaw,
    /// G.711 a-law (8-bit)
    #[serde(rename = "g711_alaw")]
    G711Alaw,
}

impl WireAudioFormat {
    /// Convert to the wire parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pcm16 => "pcm16",
            Self::G711Ulaw => "g711_ulaw",
            Self::G711Alaw => "g711_alaw",
        }
    }

    /// Sample rate implied by this format.
    #[inline]
    pub fn sample_rate(&self) -> u32 {
        match self {
            Self::Pcm16 => WIRE_SAMPLE_RATE,
            Self::G711Ulaw | Self::G711Alaw => 8000,
        }
    }
}

impl std::fmt::Display for WireAudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Tuning
// =============================================================================

/// Capture-side tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureTuning {
    /// Sample rate audio is resampled to before transmission.
    /// Default: 24000 Hz
    #[serde(default = "default_wire_rate")]
    pub wire_sample_rate: u32,

    /// Minimum captured audio, in milliseconds at the wire rate, below which
    /// `stop_capture` clears the peer buffer instead of committing it.
    /// Default: 100 ms
    #[serde(default = "default_min_commit_ms")]
    pub min_commit_ms: u32,
}

impl Default for CaptureTuning {
    fn default() -> Self {
        Self {
            wire_sample_rate: WIRE_SAMPLE_RATE,
            min_commit_ms: 100,
        }
    }
}

impl CaptureTuning {
    /// Commit threshold in bytes of PCM16 mono at the wire rate.
    pub fn min_commit_bytes(&self) -> usize {
        (self.wire_sample_rate as usize * 2 * self.min_commit_ms as usize) / 1000
    }
}

/// Playback-side tuning.
///
/// These mirror the empirically-tuned constants of the original pipeline:
/// a short warm-up absorbs arrival jitter, merging bounds scheduling
/// overhead, and the stall grace keeps brief network hiccups from truncating
/// an utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackTuning {
    /// Chunks that must accumulate before playback starts.
    /// Default: 3
    #[serde(default = "default_warm_chunks")]
    pub warm_chunks: usize,

    /// Maximum duration of a merged output buffer, in milliseconds.
    /// Default: 500 ms
    #[serde(default = "default_max_merge_ms")]
    pub max_merge_ms: u64,

    /// How long a playing episode waits on an empty queue before concluding
    /// the response audio is finished, in milliseconds.
    /// Default: 40 ms
    #[serde(default = "default_stall_grace_ms")]
    pub stall_grace_ms: u64,

    /// Lead added to "now" when a new playback episode starts, in
    /// milliseconds. Also the snap-forward epsilon when the clock has fallen
    /// behind real time.
    /// Default: 20 ms
    #[serde(default = "default_start_lead_ms")]
    pub start_lead_ms: u64,
}

impl Default for PlaybackTuning {
    fn default() -> Self {
        Self {
            warm_chunks: 3,
            max_merge_ms: 500,
            stall_grace_ms: 40,
            start_lead_ms: 20,
        }
    }
}

fn default_wire_rate() -> u32 {
    WIRE_SAMPLE_RATE
}
fn default_min_commit_ms() -> u32 {
    100
}
fn default_warm_chunks() -> usize {
    3
}
fn default_max_merge_ms() -> u64 {
    500
}
fn default_stall_grace_ms() -> u64 {
    40
}
fn default_start_lead_ms() -> u64 {
    20
}

// =============================================================================
// Engine Configuration
// =============================================================================

/// Configuration for one engine instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Preferred voice for synthesized output; overrides the negotiated
    /// session template when set.
    #[serde(default)]
    pub voice: Option<String>,

    /// Preferred language/locale hint passed to the control plane.
    #[serde(default)]
    pub locale: Option<String>,

    /// Free-text system instructions; overrides the template when set.
    #[serde(default)]
    pub instructions: Option<String>,

    /// Arbitrary capability flags forwarded to the control plane as-is.
    #[serde(default)]
    pub capabilities: Option<serde_json::Value>,

    /// Capture tuning.
    #[serde(default)]
    pub capture: CaptureTuning,

    /// Playback tuning.
    #[serde(default)]
    pub playback: PlaybackTuning,

    /// Watchdog window for peer-native tool calls, in milliseconds.
    /// Default: 15000 ms
    #[serde(default = "default_tool_watchdog_ms")]
    pub tool_watchdog_ms: u64,
}

fn default_tool_watchdog_ms() -> u64 {
    15_000
}

impl EngineConfig {
    /// Watchdog window as a `Duration`.
    pub fn tool_watchdog(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tool_watchdog_ms)
    }

    /// Build the initial session template for this configuration.
    ///
    /// Used as the fallback when negotiation returns no template; voice and
    /// instructions from this config override either template via
    /// `SessionConfig::merge_from`.
    pub fn session_template(&self) -> SessionConfig {
        SessionConfig {
            modalities: Some(vec!["text".to_string(), "audio".to_string()]),
            instructions: self.instructions.clone(),
            voice: self.voice.clone(),
            input_audio_format: Some(WireAudioFormat::Pcm16.as_str().to_string()),
            output_audio_format: Some(WireAudioFormat::Pcm16.as_str().to_string()),
            input_audio_transcription: Some(InputAudioTranscription {
                model: "whisper-1".to_string(),
            }),
            turn_detection: Some(TurnDetection::default()),
            tools: None,
            tool_choice: None,
            temperature: Some(0.8),
            max_response_output_tokens: Some(MaxTokens::Number(4096)),
        }
    }
}
