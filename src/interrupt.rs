//! Barge-in handling.
//!
//! When the user starts speaking over the assistant (or the host asks for a
//! cancel), playback must go silent immediately and the in-flight response
//! must be cancelled at most once. Local silencing is synchronous; the wire
//! cancel is fire-and-forget so perceived latency stays at the speed of the
//! audio path, not the network.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::audio::PlaybackScheduler;
use crate::protocol::ClientEvent;
use crate::session::events::{EngineEvent, EventSink};
use crate::session::state::ResponseState;
use crate::session::WireHandle;

/// Coordinates interruption across playback, response state, and the wire.
pub struct InterruptionController {
    playback: Arc<PlaybackScheduler>,
    response: Arc<ResponseState>,
    wire: WireHandle,
    events: EventSink,
}

impl InterruptionController {
    /// Create a controller over the shared session components.
    pub fn new(
        playback: Arc<PlaybackScheduler>,
        response: Arc<ResponseState>,
        wire: WireHandle,
        events: EventSink,
    ) -> Self {
        Self {
            playback,
            response,
            wire,
            events,
        }
    }

    /// Interrupt the assistant.
    ///
    /// Idempotent: whatever triggers first (peer VAD, host cancel) wins, and
    /// at most one `response.cancel` goes out per active response. Safe to
    /// call when nothing is playing and no response is active.
    pub fn interrupt(&self) {
        self.playback.cancel();

        if self.response.take_active() {
            debug!("cancelling in-flight response");
            if let Err(e) = self.wire.try_send(ClientEvent::ResponseCancel) {
                // The response may have completed and closed the wire between
                // the flag read and the send; surfacing this helps nobody.
                warn!("response cancel not sent: {e}");
            }
        }

        self.events.emit(EngineEvent::ListeningResumed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioChunk, AudioSink, ScheduledBuffer};
    use crate::config::PlaybackTuning;
    use crate::session::events::event_channel;
    use crate::session::wire_channel_for_test;

    struct NullSink;

    impl AudioSink for NullSink {
        fn schedule(&self, _buffer: ScheduledBuffer) {}
        fn stop_all(&self) {}
    }

    fn controller() -> (
        InterruptionController,
        Arc<PlaybackScheduler>,
        Arc<ResponseState>,
        tokio::sync::mpsc::Receiver<ClientEvent>,
        tokio::sync::mpsc::UnboundedReceiver<EngineEvent>,
    ) {
        let (wire, wire_rx) = wire_channel_for_test();
        let (events, event_rx) = event_channel();
        let playback = Arc::new(PlaybackScheduler::new(
            PlaybackTuning::default(),
            Arc::new(NullSink),
            events.clone(),
        ));
        let response = Arc::new(ResponseState::new());
        let ctl = InterruptionController::new(
            playback.clone(),
            response.clone(),
            wire,
            events,
        );
        (ctl, playback, response, wire_rx, event_rx)
    }

    #[tokio::test]
    async fn test_interrupt_cancels_once() {
        let (ctl, playback, response, mut wire_rx, _event_rx) = controller();
        response.activate();
        playback.push(AudioChunk::new(vec![0u8; 960], 24000, 0));

        ctl.interrupt();
        ctl.interrupt();

        assert_eq!(playback.queued(), 0);
        assert!(!response.is_active());
        // Exactly one cancel no matter how many triggers fire.
        assert!(matches!(
            wire_rx.try_recv().unwrap(),
            ClientEvent::ResponseCancel
        ));
        assert!(wire_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_interrupt_without_active_response_sends_nothing() {
        let (ctl, _playback, _response, mut wire_rx, mut event_rx) = controller();

        ctl.interrupt();

        assert!(wire_rx.try_recv().is_err());
        // Still reports listening resumed so the host can update its UI.
        let mut saw_resumed = false;
        while let Ok(event) = event_rx.try_recv() {
            if matches!(event, EngineEvent::ListeningResumed) {
                saw_resumed = true;
            }
        }
        assert!(saw_resumed);
    }
}
