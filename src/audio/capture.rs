//! Microphone capture, resampling, and wire encoding.
//!
//! The capture callback never touches the network: device frames are handed
//! over a channel (`try_send` only) to a pump thread that resamples to the
//! wire rate, converts to PCM16, and enqueues non-blocking append events.
//! Stopping capture decides between commit and clear: near-empty utterances
//! are discarded rather than committed, which keeps the peer from erroring
//! on empty buffers.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::resample::{f32_to_pcm16, resample_linear};
use crate::config::CaptureTuning;
use crate::error::VoiceResult;
use crate::protocol::ClientEvent;
use crate::session::WireHandle;

/// Audio input device abstraction.
///
/// The real implementation wraps a cpal input stream (see `device`); tests
/// drive frames by hand.
pub trait CaptureSource: Send {
    /// Native sample rate of the device.
    fn sample_rate(&self) -> u32;
    /// Begin delivering mono f32 frames to `frames`. The callback must use
    /// `try_send`; a full channel drops the frame rather than blocking.
    fn start(&mut self, frames: crossbeam_channel::Sender<Vec<f32>>) -> VoiceResult<()>;
    /// Stop delivering frames and release the stream.
    fn stop(&mut self) -> VoiceResult<()>;
}

/// Pulls device frames, encodes them for the wire, and enforces the
/// minimum-payload rule on commit.
pub struct CaptureEncoder {
    tuning: CaptureTuning,
    wire: WireHandle,
    source: Mutex<Box<dyn CaptureSource>>,
    bytes_since_commit: Arc<AtomicUsize>,
    capturing: Arc<AtomicBool>,
    pump: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl CaptureEncoder {
    /// Create an encoder around a capture source.
    pub fn new(tuning: CaptureTuning, wire: WireHandle, source: Box<dyn CaptureSource>) -> Self {
        Self {
            tuning,
            wire,
            source: Mutex::new(source),
            bytes_since_commit: Arc::new(AtomicUsize::new(0)),
            capturing: Arc::new(AtomicBool::new(false)),
            pump: Mutex::new(None),
        }
    }

    /// Bytes encoded and appended since the last start/stop cycle.
    pub fn bytes_since_commit(&self) -> usize {
        self.bytes_since_commit.load(Ordering::SeqCst)
    }

    /// Whether capture is running.
    pub fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    /// Start pulling frames from the device and streaming them out.
    pub fn start_capture(&self) -> VoiceResult<()> {
        if self.capturing.swap(true, Ordering::SeqCst) {
            warn!("capture already running");
            return Ok(());
        }
        self.bytes_since_commit.store(0, Ordering::SeqCst);

        let (tx, rx) = crossbeam_channel::bounded::<Vec<f32>>(64);
        let device_rate = {
            let mut source = self.source.lock();
            source.start(tx)?;
            source.sample_rate()
        };

        let tuning = self.tuning.clone();
        let wire = self.wire.clone();
        let counter = self.bytes_since_commit.clone();
        let capturing = self.capturing.clone();

        // Dedicated pump thread: the crossbeam recv blocks, the wire send
        // never does.
        let handle = std::thread::spawn(move || {
            while let Ok(frame) = rx.recv() {
                if !capturing.load(Ordering::SeqCst) {
                    break;
                }
                let appended = encode_and_append(&wire, &tuning, &frame, device_rate);
                counter.fetch_add(appended, Ordering::SeqCst);
            }
            debug!("capture pump ended");
        });
        *self.pump.lock() = Some(handle);

        info!(device_rate, wire_rate = self.tuning.wire_sample_rate, "capture started");
        Ok(())
    }

    /// Stop capture and finalize the utterance.
    ///
    /// Commits when at least `min_commit_ms` of audio went out since the
    /// cycle began; otherwise clears the peer buffer. Resets the byte
    /// counter either way.
    pub async fn stop_capture(&self) -> VoiceResult<()> {
        if !self.capturing.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.source.lock().stop()?;
        if let Some(handle) = self.pump.lock().take() {
            // The source dropped its sender; the pump exits on its own.
            drop(handle);
        }

        let sent = self.bytes_since_commit.swap(0, Ordering::SeqCst);
        let threshold = self.tuning.min_commit_bytes();
        if sent >= threshold {
            debug!(sent, threshold, "committing utterance");
            self.wire.send(ClientEvent::InputAudioBufferCommit).await?;
        } else {
            debug!(sent, threshold, "discarding near-empty utterance");
            self.wire.send(ClientEvent::InputAudioBufferClear).await?;
        }
        Ok(())
    }

    /// Encode one frame directly. Exposed for hosts that feed PCM themselves
    /// instead of using a capture device.
    pub fn push_frame(&self, frame: &[f32], device_rate: u32) -> usize {
        let appended = encode_and_append(&self.wire, &self.tuning, frame, device_rate);
        self.bytes_since_commit
            .fetch_add(appended, Ordering::SeqCst);
        appended
    }
}

/// Resample, convert to PCM16, and enqueue an append event. Returns the
/// number of bytes handed to the wire (0 when the frame was dropped).
fn encode_and_append(
    wire: &WireHandle,
    tuning: &CaptureTuning,
    frame: &[f32],
    device_rate: u32,
) -> usize {
    if frame.is_empty() {
        return 0;
    }
    let resampled = resample_linear(frame, device_rate, tuning.wire_sample_rate);
    let pcm = f32_to_pcm16(&resampled);
    if pcm.is_empty() {
        return 0;
    }
    let len = pcm.len();
    match wire.try_send(ClientEvent::audio_append(&pcm)) {
        Ok(()) => len,
        Err(crate::error::VoiceError::NotConnected) => {
            // Session went away; the host will stop capture when it sees
            // the Disconnected event.
            debug!(bytes = len, "dropping audio frame, wire detached");
            0
        }
        Err(_) => {
            // Outbound congestion must not stall the capture path.
            warn!(bytes = len, "dropping audio frame, outbound channel full");
            0
        }
    }
}
