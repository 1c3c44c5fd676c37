//! cpal-backed capture and playback devices.
//!
//! cpal streams are not `Send`, so each stream lives on its own thread for
//! its whole lifetime; the handle types own only control channels and shared
//! buffers and stay `Send + Sync`. Both callbacks are realtime-safe: capture
//! uses `try_send`, playback drains a shared FIFO and fills silence when it
//! runs dry.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use parking_lot::Mutex;
use tracing::{debug, error, info};

use super::playback::{AudioSink, ScheduledBuffer};
use super::resample::resample_linear;
use crate::audio::capture::CaptureSource;
use crate::error::{VoiceError, VoiceResult};
use crate::session::events::{EngineEvent, EventSink};

/// Surface a mid-session stream failure to the host.
///
/// The session itself stays up; the host decides whether to tear it down or
/// rebuild the device.
fn report_stream_error(events: &EventSink, side: &str, err: &impl std::fmt::Display) {
    error!("{side} stream error: {err}");
    events.emit(EngineEvent::EngineError {
        message: format!("{side} stream error: {err}"),
    });
}

// =============================================================================
// Capture
// =============================================================================

/// Default-input-device capture source.
pub struct CpalCaptureSource {
    device: cpal::Device,
    config: StreamConfig,
    events: EventSink,
    stop_tx: Option<crossbeam_channel::Sender<()>>,
}

impl CpalCaptureSource {
    /// Open the default input device. Mid-session stream failures are
    /// reported through `events`.
    pub fn new(events: EventSink) -> VoiceResult<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| VoiceError::Device("no input device available".to_string()))?;

        info!(
            device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
            "using input device"
        );

        let config = device
            .default_input_config()
            .map_err(|e| VoiceError::Device(format!("input config: {e}")))?
            .into();

        Ok(Self {
            device,
            config,
            events,
            stop_tx: None,
        })
    }
}

impl CaptureSource for CpalCaptureSource {
    fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    fn start(&mut self, frames: crossbeam_channel::Sender<Vec<f32>>) -> VoiceResult<()> {
        if self.stop_tx.is_some() {
            return Ok(());
        }

        let device = self.device.clone();
        let config = self.config.clone();
        let channels = config.channels as usize;
        let events = self.events.clone();
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let (built_tx, built_rx) = crossbeam_channel::bounded::<VoiceResult<()>>(1);

        // The stream lives on this thread until stop.
        std::thread::spawn(move || {
            let stream = device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    // Mix down to mono before handing off.
                    let samples: Vec<f32> = if channels == 1 {
                        data.to_vec()
                    } else {
                        data.chunks(channels)
                            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                            .collect()
                    };
                    if let Err(e) = frames.try_send(samples) {
                        debug!("capture frame dropped: {e}");
                    }
                },
                move |err| report_stream_error(&events, "input", &err),
                None,
            );
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    let _ = built_tx.send(Err(VoiceError::Device(format!("input stream: {e}"))));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = built_tx.send(Err(VoiceError::Device(format!("input start: {e}"))));
                return;
            }
            let _ = built_tx.send(Ok(()));
            let _ = stop_rx.recv();
            drop(stream);
            debug!("input stream released");
        });

        built_rx
            .recv()
            .map_err(|_| VoiceError::Device("input thread died during startup".to_string()))??;
        self.stop_tx = Some(stop_tx);
        info!(rate = self.config.sample_rate.0, "capture stream started");
        Ok(())
    }

    fn stop(&mut self) -> VoiceResult<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
            info!("capture stream stopped");
        }
        Ok(())
    }
}

impl Drop for CpalCaptureSource {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

// =============================================================================
// Playback
// =============================================================================

/// Default-output-device sink.
///
/// Scheduled buffers are resampled to the device rate and appended to a
/// FIFO the output callback drains; back-to-back buffers are therefore
/// gapless by construction, and `stop_all` empties the FIFO so at most one
/// callback quantum of audio remains after a cancel.
pub struct CpalSink {
    device_rate: u32,
    fifo: Arc<Mutex<Vec<f32>>>,
    stop_tx: crossbeam_channel::Sender<()>,
}

impl CpalSink {
    /// Open the default output device and start its stream. Mid-session
    /// stream failures are reported through `events`.
    pub fn new(events: EventSink) -> VoiceResult<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| VoiceError::Device("no output device available".to_string()))?;

        info!(
            device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
            "using output device"
        );

        let config: StreamConfig = device
            .default_output_config()
            .map_err(|e| VoiceError::Device(format!("output config: {e}")))?
            .into();
        let device_rate = config.sample_rate.0;
        let channels = config.channels as usize;

        let fifo: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));
        let callback_fifo = fifo.clone();
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let (built_tx, built_rx) = crossbeam_channel::bounded::<VoiceResult<()>>(1);

        std::thread::spawn(move || {
            let stream = device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut fifo = callback_fifo.lock();
                    let needed = data.len() / channels;
                    let available = fifo.len().min(needed);

                    for i in 0..available {
                        let sample = fifo[i];
                        for c in 0..channels {
                            data[i * channels + c] = sample;
                        }
                    }
                    fifo.drain(0..available);
                    // Underrun or idle: silence.
                    data[available * channels..].fill(0.0);
                },
                move |err| report_stream_error(&events, "output", &err),
                None,
            );
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    let _ = built_tx.send(Err(VoiceError::Device(format!("output stream: {e}"))));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = built_tx.send(Err(VoiceError::Device(format!("output start: {e}"))));
                return;
            }
            let _ = built_tx.send(Ok(()));
            let _ = stop_rx.recv();
            drop(stream);
            debug!("output stream released");
        });

        built_rx
            .recv()
            .map_err(|_| VoiceError::Device("output thread died during startup".to_string()))??;
        info!(rate = device_rate, "playback stream started");

        Ok(Self {
            device_rate,
            fifo,
            stop_tx,
        })
    }

    /// Device output sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.device_rate
    }
}

impl AudioSink for CpalSink {
    fn schedule(&self, buffer: ScheduledBuffer) {
        let samples = if buffer.sample_rate == self.device_rate {
            buffer.samples
        } else {
            resample_linear(&buffer.samples, buffer.sample_rate, self.device_rate)
        };
        self.fifo.lock().extend_from_slice(&samples);
    }

    fn stop_all(&self) {
        self.fifo.lock().clear();
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}
