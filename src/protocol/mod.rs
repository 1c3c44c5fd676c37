//! Wire protocol for the duplex session: JSON events over a persistent
//! WebSocket, plus the session template and conversation item model.

pub mod messages;
pub mod session;

pub use messages::{ClientEvent, PeerError, ResponseInfo, ServerEvent, SessionInfo};
pub use session::{
    ContentPart, ConversationItem, InputAudioTranscription, MaxTokens, SessionConfig, ToolDef,
    TurnDetection,
};
