//! Typed engine events.
//!
//! The engine pushes everything observable — state changes, transcripts,
//! tool activity, level metering, failures — into one event stream instead
//! of per-concern callback fields. Events are informational; dropping the
//! receiver never affects engine correctness.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::state::SessionState;

/// Speaker role attached to transcript events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User speech transcript
    User,
    /// Assistant speech transcript
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Events emitted by the engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Session state machine transition
    StateChanged(SessionState),
    /// Peer acknowledged the session
    SessionReady {
        /// Peer-assigned session id
        session_id: String,
    },
    /// Peer-side VAD detected the user starting to speak
    SpeechStarted,
    /// Peer-side VAD detected the user going silent
    SpeechStopped,
    /// Playback was silenced and capture should resume listening
    ListeningResumed,
    /// Partial transcript (assistant deltas accumulate)
    TranscriptPartial {
        /// Speaker
        role: Role,
        /// Accumulated text so far
        text: String,
    },
    /// Final transcript for an item
    TranscriptFinal {
        /// Speaker
        role: Role,
        /// Complete text
        text: String,
        /// Peer item id
        item_id: Option<String>,
    },
    /// A tool call is about to execute
    ToolInvoked {
        /// Call id
        call_id: String,
        /// Tool name
        name: String,
    },
    /// A tool call finished
    ToolResolved {
        /// Call id
        call_id: String,
        /// Tool name
        name: String,
        /// Whether execution succeeded
        ok: bool,
        /// Wall-clock execution time
        duration: std::time::Duration,
    },
    /// A peer-native tool call saw no completion within the watchdog window
    ToolWatchdogExpired {
        /// Call id
        call_id: String,
        /// Tool name, when known
        name: Option<String>,
    },
    /// Output energy estimate for the merged buffer just scheduled, in [0, 1]
    OutputLevel(f32),
    /// A response finished generating
    ResponseCompleted {
        /// Response id
        response_id: String,
    },
    /// Transport or device failure surfaced to the host
    EngineError {
        /// Human-readable description
        message: String,
    },
    /// The session is gone; reconnecting is the host's call
    Disconnected {
        /// Failure description, or None for an explicit shutdown
        reason: Option<String>,
    },
}

/// Sending half of the engine event stream.
///
/// Cheap to clone; every component that observes something holds one.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EventSink {
    /// Emit an event. A dropped receiver is not an error.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

/// Create an engine event channel.
pub fn event_channel() -> (EventSink, mpsc::UnboundedReceiver<EngineEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_and_receive() {
        let (sink, mut rx) = event_channel();
        sink.emit(EngineEvent::SpeechStarted);
        match rx.try_recv() {
            Ok(EngineEvent::SpeechStarted) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_emit_without_receiver_is_noop() {
        let (sink, rx) = event_channel();
        drop(rx);
        sink.emit(EngineEvent::SpeechStopped);
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::User.to_string(), "user");
        assert_eq!(Role::Assistant.to_string(), "assistant");
    }
}
