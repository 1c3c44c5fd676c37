//! Realtime duplex voice-conversation engine.
//!
//! One [`TransportSession`] holds a persistent bidirectional session with a
//! conversational-AI service: microphone audio streams out while synthesized
//! speech, transcripts, and tool calls stream back in, with barge-in
//! interruption and resumable tool execution in between.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use voicelink::audio::{CpalCaptureSource, CpalSink, PlaybackScheduler};
//! use voicelink::config::{CaptureTuning, PlaybackTuning};
//! use voicelink::negotiate::{NegotiationRequest, SessionNegotiator};
//! use voicelink::session::events::event_channel;
//! use voicelink::session::{TransportSession, WireHandle};
//! use voicelink::tools::{ToolDispatcher, ToolEndpoint, ToolExecutionMode};
//!
//! #[tokio::main]
//! async fn main() -> voicelink::VoiceResult<()> {
//!     let negotiator = SessionNegotiator::new("https://host/api/realtime/config".parse()?);
//!     let negotiated = negotiator.negotiate(&NegotiationRequest::default()).await?;
//!
//!     let (events, mut event_rx) = event_channel();
//!     let wire = WireHandle::new();
//!     let playback = Arc::new(PlaybackScheduler::new(
//!         PlaybackTuning::default(),
//!         Arc::new(CpalSink::new(events.clone())?),
//!         events.clone(),
//!     ));
//!     let tools = Arc::new(ToolDispatcher::new(
//!         ToolExecutionMode::Delegated {
//!             endpoint: ToolEndpoint::new("https://host/api/realtime/tool".parse()?),
//!         },
//!         wire.clone(),
//!         events.clone(),
//!         Duration::from_secs(15),
//!     ));
//!     let session = TransportSession::new(
//!         negotiated.session_template.unwrap_or_default(),
//!         playback.clone(),
//!         tools,
//!         events,
//!         wire,
//!     );
//!     playback.clone().spawn_pump();
//!
//!     session
//!         .connect(
//!             negotiated.connection_target.as_deref().unwrap_or_default(),
//!             negotiated.credential.as_deref().unwrap_or_default(),
//!         )
//!         .await?;
//!
//!     while let Some(event) = event_rx.recv().await {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod interrupt;
pub mod negotiate;
pub mod protocol;
pub mod session;
pub mod tools;

// Re-export commonly used items for convenience
pub use config::{CaptureTuning, EngineConfig, PlaybackTuning, WireAudioFormat};
pub use error::{VoiceError, VoiceResult};
pub use interrupt::InterruptionController;
pub use negotiate::{NegotiatedSession, NegotiationRequest, SessionNegotiator};
pub use protocol::{ClientEvent, ContentPart, ConversationItem, ServerEvent, SessionConfig};
pub use session::events::{EngineEvent, EventSink, Role};
pub use session::state::{ResponseState, SessionState};
pub use session::{TransportSession, WireHandle};
pub use tools::{LocalTool, ToolCallRecord, ToolDispatcher, ToolEndpoint, ToolExecutionMode};
