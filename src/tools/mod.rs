//! Tool-call dispatch: local execution, delegation to the external tool
//! endpoint, and the watchdog for peer-native execution.
//!
//! Whichever path runs, the outcome is the same wire sequence: a
//! `function_call_output` conversation item tagged with the original call
//! id, followed by a `response.create` so the model resumes speaking with
//! the result in view. Failures become structured `{"error": …}` results
//! the model can react to conversationally — never a host-level failure.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{VoiceError, VoiceResult};
use crate::protocol::{ClientEvent, ConversationItem};
use crate::session::events::{EngineEvent, EventSink};
use crate::session::WireHandle;

/// One tool call observed on the wire. Never reused across calls.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    /// Peer-assigned call identifier
    pub call_id: String,
    /// Tool name
    pub name: String,
    /// Parsed argument object
    pub arguments: Value,
    /// Result object, None while pending
    pub result: Option<Value>,
    /// Success flag, None while pending
    pub ok: Option<bool>,
    /// Execution time, None while pending
    pub duration: Option<Duration>,
}

/// A tool resolved and executed entirely within the host application.
#[async_trait]
pub trait LocalTool: Send + Sync {
    /// Execute with the parsed argument object.
    async fn call(&self, arguments: &Value) -> VoiceResult<Value>;
}

// =============================================================================
// Remote Endpoint
// =============================================================================

/// HTTP client for the external tool-execution endpoint.
///
/// Contract: `POST {tool_name, arguments}` → `{result}` on success or
/// `{error}` on failure, with the HTTP status distinguishing the two.
#[derive(Debug, Clone)]
pub struct ToolEndpoint {
    client: reqwest::Client,
    url: url::Url,
    /// Engine-side tool names remapped before the POST.
    aliases: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ToolEndpointReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl ToolEndpoint {
    /// Create an endpoint client.
    pub fn new(url: url::Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            aliases: HashMap::new(),
        }
    }

    /// Remap an engine-side tool name to the endpoint's name for it.
    pub fn alias(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.aliases.insert(from.into(), to.into());
        self
    }

    /// Execute a tool remotely.
    pub async fn execute(&self, name: &str, arguments: &Value) -> VoiceResult<Value> {
        let endpoint_name = self.aliases.get(name).map(String::as_str).unwrap_or(name);
        let response = self
            .client
            .post(self.url.clone())
            .json(&json!({ "tool_name": endpoint_name, "arguments": arguments }))
            .send()
            .await
            .map_err(|e| VoiceError::ToolExecution(format!("endpoint unreachable: {e}")))?;

        let status = response.status();
        let reply: ToolEndpointReply = response
            .json()
            .await
            .map_err(|e| VoiceError::ToolExecution(format!("malformed endpoint reply: {e}")))?;

        if !status.is_success() {
            let message = reply
                .error
                .unwrap_or_else(|| format!("endpoint returned {status}"));
            return Err(VoiceError::ToolExecution(message));
        }
        if let Some(error) = reply.error {
            return Err(VoiceError::ToolExecution(error));
        }
        reply
            .result
            .ok_or_else(|| VoiceError::ToolExecution("endpoint reply missing result".to_string()))
    }
}

// =============================================================================
// Dispatch Strategy
// =============================================================================

/// How non-local tool calls are executed, decided once per session.
pub enum ToolExecutionMode {
    /// The peer emits function calls and this engine runs them, either via a
    /// registered local tool or the external endpoint.
    Delegated {
        /// External endpoint for tools with no local handler
        endpoint: ToolEndpoint,
    },
    /// The peer executes tools natively; the engine only observes calls and
    /// arms the watchdog so a silently-dropped call cannot hang the host.
    Native,
}

/// Classifies inbound function-call events, executes them, and feeds the
/// results back into the conversation.
pub struct ToolDispatcher {
    mode: ToolExecutionMode,
    local: HashMap<String, Arc<dyn LocalTool>>,
    wire: WireHandle,
    events: EventSink,
    watchdog: Duration,
    /// Native-mode calls awaiting completion: call_id -> tool name.
    pending_native: Arc<Mutex<HashMap<String, Option<String>>>>,
}

impl ToolDispatcher {
    /// Create a dispatcher.
    pub fn new(
        mode: ToolExecutionMode,
        wire: WireHandle,
        events: EventSink,
        watchdog: Duration,
    ) -> Self {
        Self {
            mode,
            local: HashMap::new(),
            wire,
            events,
            watchdog,
            pending_native: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a locally-handled tool.
    pub fn register_local(&mut self, name: impl Into<String>, tool: Arc<dyn LocalTool>) {
        self.local.insert(name.into(), tool);
    }

    /// Whether the session negotiated peer-native execution.
    pub fn is_native(&self) -> bool {
        matches!(self.mode, ToolExecutionMode::Native)
    }

    /// Handle a complete function-call event from the wire.
    ///
    /// In native mode this only arms the watchdog; otherwise the tool runs
    /// and the result goes back out before response generation resumes.
    pub async fn handle_call(self: &Arc<Self>, call_id: String, name: String, arguments: String) {
        if self.is_native() {
            self.watch_native_call(call_id, Some(name));
            return;
        }
        self.execute_and_resume(call_id, name, arguments).await;
    }

    /// Run a delegated call end to end.
    async fn execute_and_resume(&self, call_id: String, name: String, arguments: String) {
        let parsed: Value = match serde_json::from_str(&arguments) {
            Ok(v) => v,
            Err(e) => {
                warn!(call_id, %name, "unparseable tool arguments: {e}");
                Value::Object(Default::default())
            }
        };

        let mut record = ToolCallRecord {
            call_id: call_id.clone(),
            name: name.clone(),
            arguments: parsed.clone(),
            result: None,
            ok: None,
            duration: None,
        };

        self.events.emit(EngineEvent::ToolInvoked {
            call_id: call_id.clone(),
            name: name.clone(),
        });
        info!(call_id, %name, "executing tool");

        let started = Instant::now();
        let outcome = match self.local.get(&name) {
            Some(tool) => tool.call(&parsed).await,
            None => match &self.mode {
                ToolExecutionMode::Delegated { endpoint } => endpoint.execute(&name, &parsed).await,
                // Unreachable: native mode returns before execution.
                ToolExecutionMode::Native => {
                    Err(VoiceError::ToolExecution("native session".to_string()))
                }
            },
        };
        let duration = started.elapsed();

        let (result, ok) = match outcome {
            Ok(value) => (value, true),
            Err(e) => {
                warn!(call_id, %name, "tool failed: {e}");
                (json!({ "error": e.to_string() }), false)
            }
        };
        record.result = Some(result.clone());
        record.ok = Some(ok);
        record.duration = Some(duration);
        debug!(?record, "tool call resolved");

        // Ordering matters: the output item must precede the resume request.
        let output = ConversationItem::function_call_output(&call_id, result.to_string());
        if let Err(e) = self
            .wire
            .send(ClientEvent::ConversationItemCreate { item: output })
            .await
        {
            warn!(call_id, "failed to send tool output: {e}");
            return;
        }
        if let Err(e) = self.wire.send(ClientEvent::ResponseCreate).await {
            warn!(call_id, "failed to resume response: {e}");
        }

        self.events.emit(EngineEvent::ToolResolved {
            call_id,
            name,
            ok,
            duration,
        });
    }

    /// Arm the watchdog for a peer-native call.
    ///
    /// Fires at most once per call id: if no completion is observed before
    /// expiry, a single warning event surfaces to the host.
    pub fn watch_native_call(self: &Arc<Self>, call_id: String, name: Option<String>) {
        {
            let mut pending = self.pending_native.lock();
            if pending.contains_key(&call_id) {
                return;
            }
            pending.insert(call_id.clone(), name.clone());
        }
        debug!(call_id, "watching native tool call");

        let dispatcher = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(dispatcher.watchdog).await;
            let expired = dispatcher.pending_native.lock().remove_entry(&call_id);
            if let Some((call_id, name)) = expired {
                warn!(call_id, "native tool call saw no completion before watchdog expiry");
                dispatcher
                    .events
                    .emit(EngineEvent::ToolWatchdogExpired { call_id, name });
            }
        });
    }

    /// Mark a native call as completed, disarming its watchdog.
    pub fn native_call_completed(&self, call_id: &str) {
        self.pending_native.lock().remove(call_id);
    }

    /// Disarm every pending watchdog (response finished or was cancelled).
    pub fn clear_watchdogs(&self) {
        self.pending_native.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::events::event_channel;
    use crate::session::wire_channel_for_test;

    struct DisplayedCardTool;

    #[async_trait]
    impl LocalTool for DisplayedCardTool {
        async fn call(&self, arguments: &Value) -> VoiceResult<Value> {
            let index = arguments["card_index"].as_u64().unwrap_or(0);
            Ok(json!({ "card_index": index, "card": format!("card-{index}") }))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl LocalTool for FailingTool {
        async fn call(&self, _arguments: &Value) -> VoiceResult<Value> {
            Err(VoiceError::ToolExecution("boom".to_string()))
        }
    }

    fn local_dispatcher() -> (
        Arc<ToolDispatcher>,
        tokio::sync::mpsc::Receiver<ClientEvent>,
        tokio::sync::mpsc::UnboundedReceiver<EngineEvent>,
    ) {
        let (wire, wire_rx) = wire_channel_for_test();
        let (events, event_rx) = event_channel();
        let endpoint = ToolEndpoint::new(url::Url::parse("http://127.0.0.1:1/tool").unwrap());
        let mut dispatcher = ToolDispatcher::new(
            ToolExecutionMode::Delegated { endpoint },
            wire,
            events,
            Duration::from_millis(100),
        );
        dispatcher.register_local("get_displayed_card", Arc::new(DisplayedCardTool));
        (Arc::new(dispatcher), wire_rx, event_rx)
    }

    #[tokio::test]
    async fn test_local_tool_round_trip() {
        let (dispatcher, mut wire_rx, mut event_rx) = local_dispatcher();

        dispatcher
            .handle_call(
                "call_1".to_string(),
                "get_displayed_card".to_string(),
                r#"{"card_index": 2}"#.to_string(),
            )
            .await;

        // Exactly one function_call_output, then one response.create.
        match wire_rx.try_recv().unwrap() {
            ClientEvent::ConversationItemCreate { item } => {
                assert_eq!(item.item_type, "function_call_output");
                assert_eq!(item.call_id.as_deref(), Some("call_1"));
                let output: Value =
                    serde_json::from_str(item.output.as_deref().unwrap()).unwrap();
                assert_eq!(output["card_index"], 2);
                assert_eq!(output["card"], "card-2");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(
            wire_rx.try_recv().unwrap(),
            ClientEvent::ResponseCreate
        ));
        assert!(wire_rx.try_recv().is_err(), "no extra wire traffic");

        assert!(matches!(
            event_rx.try_recv().unwrap(),
            EngineEvent::ToolInvoked { .. }
        ));
        match event_rx.try_recv().unwrap() {
            EngineEvent::ToolResolved { ok, name, .. } => {
                assert!(ok);
                assert_eq!(name, "get_displayed_card");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_tool_becomes_error_result() {
        let (wire, mut wire_rx) = wire_channel_for_test();
        let (events, mut event_rx) = event_channel();
        let endpoint = ToolEndpoint::new(url::Url::parse("http://127.0.0.1:1/tool").unwrap());
        let mut dispatcher = ToolDispatcher::new(
            ToolExecutionMode::Delegated { endpoint },
            wire,
            events,
            Duration::from_millis(100),
        );
        dispatcher.register_local("always_fails", Arc::new(FailingTool));
        let dispatcher = Arc::new(dispatcher);

        dispatcher
            .handle_call("call_2".to_string(), "always_fails".to_string(), "{}".to_string())
            .await;

        match wire_rx.try_recv().unwrap() {
            ClientEvent::ConversationItemCreate { item } => {
                let output: Value =
                    serde_json::from_str(item.output.as_deref().unwrap()).unwrap();
                assert!(output["error"].as_str().unwrap().contains("boom"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(
            wire_rx.try_recv().unwrap(),
            ClientEvent::ResponseCreate
        ));

        let _ = event_rx.try_recv();
        match event_rx.try_recv().unwrap() {
            EngineEvent::ToolResolved { ok, .. } => assert!(!ok),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_native_watchdog_fires_exactly_once() {
        let (wire, mut wire_rx) = wire_channel_for_test();
        let (events, mut event_rx) = event_channel();
        let dispatcher = Arc::new(ToolDispatcher::new(
            ToolExecutionMode::Native,
            wire,
            events,
            Duration::from_millis(100),
        ));

        dispatcher
            .handle_call("call_3".to_string(), "lookup".to_string(), "{}".to_string())
            .await;
        // Duplicate observation of the same call arms nothing new.
        dispatcher.watch_native_call("call_3".to_string(), Some("lookup".to_string()));

        tokio::time::sleep(Duration::from_millis(250)).await;

        match event_rx.try_recv().unwrap() {
            EngineEvent::ToolWatchdogExpired { call_id, .. } => assert_eq!(call_id, "call_3"),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(event_rx.try_recv().is_err(), "warning surfaced only once");
        assert!(wire_rx.try_recv().is_err(), "native mode sends nothing");
    }

    #[tokio::test(start_paused = true)]
    async fn test_native_completion_disarms_watchdog() {
        let (wire, _wire_rx) = wire_channel_for_test();
        let (events, mut event_rx) = event_channel();
        let dispatcher = Arc::new(ToolDispatcher::new(
            ToolExecutionMode::Native,
            wire,
            events,
            Duration::from_millis(100),
        ));

        dispatcher.watch_native_call("call_4".to_string(), None);
        dispatcher.native_call_completed("call_4");
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert!(event_rx.try_recv().is_err());
    }
}
