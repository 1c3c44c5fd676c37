//! Session state machine and the in-flight-response flag.

use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Protocol states for one duplex session.
///
/// `Disconnected` is reachable from any state on transport failure or
/// explicit shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Not yet connected
    #[default]
    Idle,
    /// Transport handshake in progress
    Connecting,
    /// Transport up, waiting for peer session acknowledgment
    Connected,
    /// Peer acknowledged session creation
    SessionReady,
    /// Quiescent state, audio capture active
    Listening,
    /// Peer is generating a response
    Responding,
    /// Session torn down
    Disconnected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::SessionReady => "session_ready",
            SessionState::Listening => "listening",
            SessionState::Responding => "responding",
            SessionState::Disconnected => "disconnected",
        };
        write!(f, "{s}")
    }
}

/// "Is a response currently being generated by the remote peer."
///
/// The single concurrency hazard in the engine: barge-in, explicit host
/// cancellation, and natural completion all race on this flag, so every
/// read-and-mutate goes through one critical section.
#[derive(Debug, Default)]
pub struct ResponseState {
    active: Mutex<bool>,
}

impl ResponseState {
    /// Create an inactive flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a response active. Returns false if one was already active,
    /// which violates the single-active-response invariant upstream.
    pub fn activate(&self) -> bool {
        let mut active = self.active.lock();
        let was_inactive = !*active;
        *active = true;
        was_inactive
    }

    /// Mark the response inactive. Returns true if one was active.
    pub fn deactivate(&self) -> bool {
        let mut active = self.active.lock();
        std::mem::replace(&mut *active, false)
    }

    /// Atomically read-and-clear: true exactly once per active response.
    ///
    /// Cancellation paths use this so a cancel message goes out at most once
    /// no matter how many cancellers race.
    pub fn take_active(&self) -> bool {
        self.deactivate()
    }

    /// Whether a response is currently active.
    pub fn is_active(&self) -> bool {
        *self.active.lock()
    }
}
