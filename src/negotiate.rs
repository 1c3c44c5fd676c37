//! Control-plane session negotiation.
//!
//! Before any WebSocket is opened, the engine asks the control plane for the
//! connection target, a short-lived credential, the session template, and the
//! tool catalog. The negotiator is stateless and side-effect free, so a
//! failed negotiation is always safe to retry.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{VoiceError, VoiceResult};
use crate::protocol::{SessionConfig, ToolDef};

/// Host preferences and capabilities sent to the control plane.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NegotiationRequest {
    /// Preferred voice; overrides the template's voice when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    /// Host locale (e.g. "en-US")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    /// Arbitrary capability flags forwarded verbatim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Value>,
}

impl From<&crate::config::EngineConfig> for NegotiationRequest {
    fn from(config: &crate::config::EngineConfig) -> Self {
        Self {
            voice: config.voice.clone(),
            locale: config.locale.clone(),
            capabilities: config.capabilities.clone(),
        }
    }
}

/// Everything needed to open a duplex session.
#[derive(Debug, Clone, Deserialize)]
pub struct NegotiatedSession {
    /// Whether the service will accept a connection
    pub available: bool,
    /// wss:// URL to connect to
    #[serde(default)]
    pub connection_target: Option<String>,
    /// Short-lived bearer credential for the connection
    #[serde(default)]
    pub credential: Option<String>,
    /// Initial session template
    #[serde(default)]
    pub session_template: Option<SessionConfig>,
    /// Resolved tool catalog
    #[serde(default)]
    pub tool_catalog: Vec<ToolDef>,
    /// Whether the engine should execute tools and return results
    #[serde(default)]
    pub supports_remote_tool_execution: bool,
    /// Whether inline image items are accepted
    #[serde(default)]
    pub supports_image_input: bool,
    /// Rejection reason when not available
    #[serde(default)]
    pub error: Option<String>,
}

/// Stateless client for the session-negotiation endpoint.
#[derive(Debug, Clone)]
pub struct SessionNegotiator {
    client: reqwest::Client,
    endpoint: url::Url,
}

impl SessionNegotiator {
    /// Create a negotiator for the given control-plane endpoint.
    pub fn new(endpoint: url::Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }

    /// Resolve connection parameters for a new session.
    ///
    /// A missing-credential rejection surfaces as `Configuration` so the
    /// host can fix its setup; anything else the control plane refuses, and
    /// an unreachable control plane, surface as `ServiceUnavailable`.
    pub async fn negotiate(&self, request: &NegotiationRequest) -> VoiceResult<NegotiatedSession> {
        debug!(endpoint = %self.endpoint, "negotiating session");

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| VoiceError::ServiceUnavailable(format!("control plane unreachable: {e}")))?;

        let status = response.status();
        let mut negotiated: NegotiatedSession = response.json().await.map_err(|e| {
            VoiceError::ServiceUnavailable(format!("malformed negotiation reply: {e}"))
        })?;

        if !negotiated.available || !status.is_success() {
            let reason = negotiated
                .error
                .unwrap_or_else(|| format!("control plane returned {status}"));
            // Credential problems are the host's to fix, not transient.
            if reason.contains("not configured") || reason.to_lowercase().contains("credential") {
                return Err(VoiceError::Configuration(reason));
            }
            return Err(VoiceError::ServiceUnavailable(reason));
        }

        if negotiated.connection_target.is_none() {
            return Err(VoiceError::ServiceUnavailable(
                "negotiation reply missing connection target".to_string(),
            ));
        }
        if negotiated.credential.is_none() {
            return Err(VoiceError::Configuration(
                "negotiation reply missing credential".to_string(),
            ));
        }

        // Host voice preference wins over the template's default.
        if let Some(ref voice) = request.voice {
            negotiated
                .session_template
                .get_or_insert_with(SessionConfig::default)
                .voice = Some(voice.clone());
        }

        info!(
            tools = negotiated.tool_catalog.len(),
            remote_tools = negotiated.supports_remote_tool_execution,
            image_input = negotiated.supports_image_input,
            "session negotiated"
        );
        Ok(negotiated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization_omits_unset_fields() {
        let request = NegotiationRequest {
            voice: Some("sage".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["voice"], "sage");
        assert!(json.get("locale").is_none());
        assert!(json.get("capabilities").is_none());
    }

    #[test]
    fn test_reply_defaults() {
        let reply: NegotiatedSession =
            serde_json::from_str(r#"{"available": false, "error": "nope"}"#).unwrap();
        assert!(!reply.available);
        assert!(reply.tool_catalog.is_empty());
        assert!(!reply.supports_remote_tool_execution);
    }
}
