//! The duplex transport session.
//!
//! One `TransportSession` owns one WebSocket connection to the peer. All
//! client events funnel through a bounded outbound channel drained by the
//! connection task; all server events are dispatched from the same task, so
//! inbound handling is single-threaded by construction and only the state
//! shared with the host needs locking.
//!
//! Connection loss is terminal for the session: the engine reports
//! `Disconnected` and stops. Whether and when to build a new session is the
//! host's decision, because capture and playback hold real devices that the
//! host may want to release or re-prompt for first.

pub mod events;
pub mod state;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, warn};

use crate::audio::{AudioChunk, PlaybackScheduler};
use crate::config::WIRE_SAMPLE_RATE;
use crate::error::{VoiceError, VoiceResult};
use crate::interrupt::InterruptionController;
use crate::protocol::{ClientEvent, ContentPart, ConversationItem, ServerEvent, SessionConfig};
use crate::tools::ToolDispatcher;
use events::{EngineEvent, EventSink, Role};
use state::{ResponseState, SessionState};

/// Outbound channel capacity. Audio appends dominate; at 20 ms frames this
/// is several seconds of headroom before capture starts dropping.
const WIRE_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Wire Handle
// =============================================================================

/// Clonable handle to the outbound side of the connection.
///
/// The sender is swapped in on connect and cleared on disconnect, so every
/// component holding a handle observes connection loss as `NotConnected`
/// rather than writing into a dead channel.
#[derive(Debug, Clone, Default)]
pub struct WireHandle {
    tx: Arc<Mutex<Option<mpsc::Sender<ClientEvent>>>>,
}

impl WireHandle {
    /// Create a detached handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a connection is currently attached.
    pub fn is_attached(&self) -> bool {
        self.tx.lock().is_some()
    }

    fn attach(&self, sender: mpsc::Sender<ClientEvent>) {
        *self.tx.lock() = Some(sender);
    }

    fn detach(&self) {
        *self.tx.lock() = None;
    }

    /// Queue an event, waiting for channel capacity.
    pub async fn send(&self, event: ClientEvent) -> VoiceResult<()> {
        let sender = self.tx.lock().clone().ok_or(VoiceError::NotConnected)?;
        sender
            .send(event)
            .await
            .map_err(|_| VoiceError::Transport("outbound channel closed".to_string()))
    }

    /// Queue an event without waiting. Used from audio callbacks and other
    /// paths that must never block.
    pub fn try_send(&self, event: ClientEvent) -> VoiceResult<()> {
        let sender = self.tx.lock().clone().ok_or(VoiceError::NotConnected)?;
        sender
            .try_send(event)
            .map_err(|e| VoiceError::Transport(format!("outbound channel: {e}")))
    }
}

/// An attached handle backed by a plain channel, for asserting wire traffic.
#[cfg(test)]
pub(crate) fn wire_channel_for_test() -> (WireHandle, mpsc::Receiver<ClientEvent>) {
    let (tx, rx) = mpsc::channel(WIRE_CHANNEL_CAPACITY);
    let handle = WireHandle::new();
    handle.attach(tx);
    (handle, rx)
}

// =============================================================================
// Shared Session State
// =============================================================================

/// State shared between the host-facing API and the connection task.
pub(crate) struct SessionShared {
    state: Mutex<SessionState>,
    response: Arc<ResponseState>,
    session_id: Mutex<Option<String>>,
    /// Assistant transcript accumulated across deltas for the current item.
    assistant_transcript: Mutex<String>,
    /// call_id -> function name, populated by OutputItemAdded. The arguments
    /// completion event does not carry the name, only the call id.
    pending_function_calls: Mutex<HashMap<String, String>>,
    playback: Arc<PlaybackScheduler>,
    tools: Arc<ToolDispatcher>,
    interrupt: InterruptionController,
    events: EventSink,
    wire: WireHandle,
    audio_seq: AtomicU64,
}

impl SessionShared {
    fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock();
        if *state == next {
            return;
        }
        debug!(from = %*state, to = %next, "session state change");
        *state = next;
        drop(state);
        self.events.emit(EngineEvent::StateChanged(next));
    }

    /// Dispatch one inbound event.
    ///
    /// Runs on the connection task only; handlers may lock shared state but
    /// never wait on other inbound events.
    async fn handle_server_event(self: &Arc<Self>, event: ServerEvent) {
        match event {
            ServerEvent::SessionCreated { session } => {
                info!(session_id = %session.id, "session created");
                *self.session_id.lock() = Some(session.id.clone());
                self.set_state(SessionState::SessionReady);
                self.events.emit(EngineEvent::SessionReady {
                    session_id: session.id,
                });
            }

            ServerEvent::SessionUpdated { session } => {
                debug!(session_id = %session.id, "session configuration acknowledged");
                // First acknowledgment of the initial template; the session
                // is now fully negotiated and listening.
                if *self.state.lock() == SessionState::SessionReady {
                    self.set_state(SessionState::Listening);
                }
            }

            ServerEvent::SpeechStarted { audio_start_ms, .. } => {
                debug!(audio_start_ms, "speech started");
                self.events.emit(EngineEvent::SpeechStarted);
                // Barge-in: the user talking over active output silences it.
                if self.playback.is_playing() || self.response.is_active() {
                    self.interrupt.interrupt();
                }
            }

            ServerEvent::SpeechStopped { audio_end_ms, .. } => {
                debug!(audio_end_ms, "speech stopped");
                self.events.emit(EngineEvent::SpeechStopped);
            }

            ServerEvent::InputAudioBufferCommitted { item_id } => {
                debug!(item_id, "input buffer committed");
            }

            ServerEvent::InputAudioBufferCleared => {
                debug!("input buffer cleared");
            }

            ServerEvent::ConversationItemCreated { item } => {
                debug!(item_type = %item.item_type, "conversation item created");
                // A peer-native tool call is finished once its output item
                // lands in the conversation; its watchdog can stand down.
                if item.item_type == "function_call_output" {
                    if let Some(call_id) = item.call_id {
                        self.tools.native_call_completed(&call_id);
                    }
                }
            }

            ServerEvent::TranscriptionCompleted {
                item_id,
                transcript,
            } => {
                debug!(item_id, "user transcript complete");
                self.events.emit(EngineEvent::TranscriptFinal {
                    role: Role::User,
                    text: transcript,
                    item_id: Some(item_id),
                });
            }

            ServerEvent::AudioTranscriptDelta { delta, .. } => {
                let accumulated = {
                    let mut transcript = self.assistant_transcript.lock();
                    transcript.push_str(&delta);
                    transcript.clone()
                };
                self.events.emit(EngineEvent::TranscriptPartial {
                    role: Role::Assistant,
                    text: accumulated,
                });
            }

            ServerEvent::AudioTranscriptDone {
                item_id,
                transcript,
            } => {
                self.assistant_transcript.lock().clear();
                self.events.emit(EngineEvent::TranscriptFinal {
                    role: Role::Assistant,
                    text: transcript,
                    item_id: Some(item_id),
                });
            }

            ServerEvent::AudioDelta { delta, .. } => {
                match ServerEvent::decode_audio_delta(&delta) {
                    Ok(bytes) => {
                        let seq = self.audio_seq.fetch_add(1, Ordering::SeqCst);
                        self.playback
                            .push(AudioChunk::new(bytes, WIRE_SAMPLE_RATE, seq));
                    }
                    Err(e) => {
                        warn!("undecodable audio delta: {e}");
                    }
                }
            }

            ServerEvent::AudioDone { item_id, .. } => {
                debug!(item_id, "audio stream complete for item");
                // No further chunks are coming for this item; a response
                // shorter than the warm-up must still play out.
                self.playback.flush();
            }

            ServerEvent::OutputItemAdded { item, .. } => {
                if item.item_type == "function_call" {
                    if let (Some(call_id), Some(name)) = (item.call_id, item.name) {
                        debug!(call_id, %name, "tracking function call");
                        self.pending_function_calls
                            .lock()
                            .insert(call_id.clone(), name.clone());
                        if self.tools.is_native() {
                            self.tools.watch_native_call(call_id, Some(name));
                        }
                    }
                }
            }

            ServerEvent::FunctionCallArgumentsDone {
                call_id, arguments, ..
            } => {
                let name = self
                    .pending_function_calls
                    .lock()
                    .remove(&call_id)
                    .unwrap_or_else(|| {
                        warn!(call_id, "function call arguments without a tracked name");
                        String::new()
                    });
                self.tools.handle_call(call_id, name, arguments).await;
            }

            ServerEvent::ResponseCreated { response } => {
                debug!(response_id = %response.id, "response started");
                if !self.response.activate() {
                    warn!(response_id = %response.id, "response started while one was already active");
                }
                self.set_state(SessionState::Responding);
            }

            ServerEvent::ResponseDone { response } => {
                debug!(response_id = %response.id, "response done");
                self.response.deactivate();
                self.tools.clear_watchdogs();
                self.playback.flush();
                self.set_state(SessionState::Listening);
                self.events.emit(EngineEvent::ResponseCompleted {
                    response_id: response.id,
                });
            }

            ServerEvent::ResponseCancelled { response } => {
                debug!(response_id = %response.id, "response cancelled");
                self.response.deactivate();
                self.tools.clear_watchdogs();
                // Peer-originated cancellation also silences anything queued.
                self.playback.cancel();
                self.set_state(SessionState::Listening);
            }

            ServerEvent::Error { error } => {
                if error.is_benign_cancel_race() {
                    // Cancellation raced the response's natural completion.
                    debug!("cancel raced response completion, ignoring peer complaint");
                    return;
                }
                error!(
                    error_type = %error.error_type,
                    code = ?error.code,
                    "peer error: {}",
                    error.message
                );
                self.events.emit(EngineEvent::EngineError {
                    message: format!("{}: {}", error.error_type, error.message),
                });
            }
        }
    }
}

// =============================================================================
// Transport Session
// =============================================================================

/// A single duplex session with the conversational peer.
///
/// Owns the session template, the outbound wire, and the connection task.
/// Construction wires the shared components together; nothing touches the
/// network until [`connect`](Self::connect).
pub struct TransportSession {
    shared: Arc<SessionShared>,
    template: Mutex<SessionConfig>,
    connection_handle: Mutex<Option<JoinHandle<()>>>,
}

impl TransportSession {
    /// Create a session over pre-built components.
    ///
    /// `wire` must be the same handle given to the dispatcher and any
    /// capture encoder, so all outbound traffic shares one channel and
    /// ordering is preserved end to end.
    pub fn new(
        template: SessionConfig,
        playback: Arc<PlaybackScheduler>,
        tools: Arc<ToolDispatcher>,
        events: EventSink,
        wire: WireHandle,
    ) -> Self {
        let response = Arc::new(ResponseState::new());
        let interrupt = InterruptionController::new(
            playback.clone(),
            response.clone(),
            wire.clone(),
            events.clone(),
        );
        Self {
            shared: Arc::new(SessionShared {
                state: Mutex::new(SessionState::Idle),
                response,
                session_id: Mutex::new(None),
                assistant_transcript: Mutex::new(String::new()),
                pending_function_calls: Mutex::new(HashMap::new()),
                playback,
                tools,
                interrupt,
                events,
                wire,
                audio_seq: AtomicU64::new(0),
            }),
            template: Mutex::new(template),
            connection_handle: Mutex::new(None),
        }
    }

    /// Current protocol state.
    pub fn state(&self) -> SessionState {
        *self.shared.state.lock()
    }

    /// Peer-assigned session id, once acknowledged.
    pub fn session_id(&self) -> Option<String> {
        self.shared.session_id.lock().clone()
    }

    /// Whether the transport is up.
    pub fn is_connected(&self) -> bool {
        self.shared.wire.is_attached()
    }

    /// Open the WebSocket and start the connection task.
    ///
    /// `target` is the negotiated wss:// URL, `credential` the bearer token
    /// for it. Sends the session template as the first client event once the
    /// transport is up.
    pub async fn connect(&self, target: &str, credential: &str) -> VoiceResult<()> {
        if self.is_connected() {
            return Ok(());
        }

        let url = url::Url::parse(target)
            .map_err(|e| VoiceError::Configuration(format!("invalid connection target: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| VoiceError::Configuration("connection target has no host".to_string()))?
            .to_string();

        self.shared.set_state(SessionState::Connecting);

        let request = http::Request::builder()
            .uri(url.as_str())
            .header("Authorization", format!("Bearer {credential}"))
            .header("OpenAI-Beta", "realtime=v1")
            .header(
                "Sec-WebSocket-Key",
                tungstenite::handshake::client::generate_key(),
            )
            .header("Sec-WebSocket-Version", "13")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Host", host.as_str())
            .body(())
            .map_err(|e| VoiceError::Transport(e.to_string()))?;

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| {
                self.shared.set_state(SessionState::Disconnected);
                VoiceError::Transport(format!("connect failed: {e}"))
            })?;

        info!(%host, "duplex transport connected");

        let (mut ws_sink, mut ws_source) = ws_stream.split();
        let (tx, mut rx) = mpsc::channel::<ClientEvent>(WIRE_CHANNEL_CAPACITY);
        self.shared.wire.attach(tx);
        self.shared.set_state(SessionState::Connected);

        let shared = self.shared.clone();
        let handle = tokio::spawn(async move {
            let mut failure: Option<String> = None;

            loop {
                tokio::select! {
                    Some(event) = rx.recv() => {
                        let json = match serde_json::to_string(&event) {
                            Ok(j) => j,
                            Err(e) => {
                                error!("unserializable client event: {e}");
                                continue;
                            }
                        };
                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            failure = Some(format!("send failed: {e}"));
                            break;
                        }
                    }

                    Some(msg) = ws_source.next() => {
                        match msg {
                            Ok(Message::Text(text)) => {
                                match serde_json::from_str::<ServerEvent>(&text) {
                                    Ok(event) => shared.handle_server_event(event).await,
                                    Err(e) => {
                                        // Unknown or malformed events are dropped,
                                        // never fatal.
                                        warn!("unparseable server event: {e}");
                                    }
                                }
                            }
                            Ok(Message::Close(_)) => {
                                info!("transport closed by peer");
                                break;
                            }
                            Ok(Message::Ping(data)) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    failure = Some(format!("pong failed: {e}"));
                                    break;
                                }
                            }
                            Err(e) => {
                                failure = Some(format!("transport error: {e}"));
                                break;
                            }
                            _ => {}
                        }
                    }

                    else => break,
                }
            }

            // Terminal: silence output, disarm watchdogs, report, stop.
            // Building a replacement session is the host's decision.
            shared.wire.detach();
            shared.playback.cancel();
            shared.tools.clear_watchdogs();
            shared.response.deactivate();
            shared.set_state(SessionState::Disconnected);
            if let Some(ref reason) = failure {
                error!("session ended: {reason}");
            }
            shared.events.emit(EngineEvent::Disconnected { reason: failure });
        });
        *self.connection_handle.lock() = Some(handle);

        let template = self.template.lock().clone();
        self.shared
            .wire
            .send(ClientEvent::SessionUpdate { session: template })
            .await?;

        Ok(())
    }

    /// Merge a partial configuration update and re-send the whole template.
    ///
    /// The template is the engine's source of truth; the peer always sees a
    /// complete configuration, never a diff.
    pub async fn update_session_config(&self, patch: SessionConfig) -> VoiceResult<()> {
        let merged = {
            let mut template = self.template.lock();
            template.merge_from(patch);
            template.clone()
        };
        self.shared
            .wire
            .send(ClientEvent::SessionUpdate { session: merged })
            .await
    }

    /// Inject a user conversation item (text and/or image parts).
    ///
    /// With `trigger_response` false the item lands silently in the peer's
    /// conversation context; no response is requested and the in-flight
    /// response flag is left alone.
    pub async fn send_conversation_item(
        &self,
        parts: Vec<ContentPart>,
        trigger_response: bool,
    ) -> VoiceResult<()> {
        let item = ConversationItem::user_message(parts);
        self.shared
            .wire
            .send(ClientEvent::ConversationItemCreate { item })
            .await?;
        if trigger_response {
            self.shared.wire.send(ClientEvent::ResponseCreate).await?;
        }
        Ok(())
    }

    /// Cancel the in-flight response and silence playback.
    pub fn cancel_active_response(&self) {
        self.shared.interrupt.interrupt();
    }

    /// Tear the session down.
    pub async fn disconnect(&self) {
        self.shared.wire.detach();
        if let Some(handle) = self.connection_handle.lock().take() {
            handle.abort();
        }
        self.shared.playback.cancel();
        self.shared.tools.clear_watchdogs();
        self.shared.response.deactivate();
        *self.shared.session_id.lock() = None;
        self.shared.set_state(SessionState::Disconnected);
        self.shared
            .events
            .emit(EngineEvent::Disconnected { reason: None });
        info!("session disconnected");
    }
}

// =============================================================================
// Tests
// =============================================================================
