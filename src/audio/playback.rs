//! Gapless playback scheduling for inbound synthesized audio.
//!
//! Chunks arrive at irregular, bursty intervals; the scheduler absorbs that
//! jitter with a short warm-up, coalesces small chunks into bounded merged
//! buffers, and schedules each merged buffer sample-accurately at the
//! playback clock's next start time. `cancel()` silences everything
//! synchronously — the barge-in path depends on it never waiting on I/O.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::resample::{pcm16_to_f32, rms_level};
use super::AudioChunk;
use crate::config::PlaybackTuning;
use crate::session::events::{EngineEvent, EventSink};

/// A merged buffer handed to the output sink.
#[derive(Debug, Clone)]
pub struct ScheduledBuffer {
    /// Normalized f32 samples in [-1, 1]
    pub samples: Vec<f32>,
    /// Sample rate of the samples
    pub sample_rate: u32,
    /// When the buffer must begin playing
    pub start: Instant,
    /// Play time of the buffer
    pub duration: Duration,
}

/// Output sink abstraction.
///
/// The real implementation drives a local audio device (see `device`);
/// tests record what would have played.
pub trait AudioSink: Send + Sync {
    /// Schedule a merged buffer for output.
    fn schedule(&self, buffer: ScheduledBuffer);
    /// Immediately stop every scheduled and playing buffer.
    fn stop_all(&self);
}

/// Buffers inbound audio chunks and schedules gapless output.
pub struct PlaybackScheduler {
    tuning: PlaybackTuning,
    sink: Arc<dyn AudioSink>,
    events: EventSink,
    queue: Mutex<VecDeque<AudioChunk>>,
    /// Episode in progress; cleared by `cancel()` to halt the pump mid-episode.
    playing: AtomicBool,
    /// Set by `flush()`: play out whatever is queued even below the warm
    /// threshold. Consumed by the pump.
    flush_requested: AtomicBool,
    /// PlaybackClock: next scheduled start time, None between episodes.
    next_start: Mutex<Option<Instant>>,
    arrived: Notify,
}

impl PlaybackScheduler {
    /// Create a scheduler feeding the given sink.
    pub fn new(tuning: PlaybackTuning, sink: Arc<dyn AudioSink>, events: EventSink) -> Self {
        Self {
            tuning,
            sink,
            events,
            queue: Mutex::new(VecDeque::new()),
            playing: AtomicBool::new(false),
            flush_requested: AtomicBool::new(false),
            next_start: Mutex::new(None),
            arrived: Notify::new(),
        }
    }

    /// Append an inbound chunk to the queue.
    pub fn push(&self, chunk: AudioChunk) {
        trace!(seq = chunk.seq, samples = chunk.sample_count(), "chunk queued");
        self.queue.lock().push_back(chunk);
        self.arrived.notify_one();
    }

    /// Number of queued (not yet scheduled) chunks.
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether a playback episode is in progress.
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    /// Play out whatever is queued, even below the warm-up threshold.
    ///
    /// Called when the peer signals that no further chunks are coming for
    /// the current response, so a short answer is not stranded in the queue
    /// waiting for a warm-up that will never complete.
    pub fn flush(&self) {
        self.flush_requested.store(true, Ordering::SeqCst);
        self.arrived.notify_one();
    }

    /// Synchronously silence everything: empty the queue, stop all scheduled
    /// output, reset the clock, and report silence to level observers.
    ///
    /// Idempotent; safe to call when nothing is playing.
    pub fn cancel(&self) {
        let dropped = {
            let mut queue = self.queue.lock();
            let n = queue.len();
            queue.clear();
            n
        };
        self.playing.store(false, Ordering::SeqCst);
        self.flush_requested.store(false, Ordering::SeqCst);
        *self.next_start.lock() = None;
        self.sink.stop_all();
        self.events.emit(EngineEvent::OutputLevel(0.0));
        if dropped > 0 {
            debug!(dropped, "playback cancelled with chunks still queued");
        }
        // Wake the pump so a mid-episode wait observes the stop immediately.
        self.arrived.notify_one();
    }

    /// Run the scheduling pump until the scheduler is dropped by its owner
    /// aborting the returned task.
    pub fn spawn_pump(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                self.arrived.notified().await;
                let flush = self.flush_requested.swap(false, Ordering::SeqCst);
                if self.queued() == 0 {
                    continue;
                }
                if !flush && self.queued() < self.tuning.warm_chunks {
                    continue;
                }
                self.run_episode().await;
            }
        })
    }

    /// Play one episode: drain the queue into merged buffers until it stays
    /// empty past the stall grace.
    async fn run_episode(&self) {
        self.playing.store(true, Ordering::SeqCst);
        let lead = Duration::from_millis(self.tuning.start_lead_ms);
        *self.next_start.lock() = Some(Instant::now() + lead);
        debug!("playback episode started");

        loop {
            if !self.playing.load(Ordering::SeqCst) {
                // Cancelled mid-episode.
                return;
            }

            match self.drain_merged() {
                Some(merged) => self.schedule_merged(merged),
                None => {
                    // Queue ran dry; give the network a short grace before
                    // concluding the episode is over.
                    tokio::time::sleep(Duration::from_millis(self.tuning.stall_grace_ms)).await;
                    if self.queue.lock().is_empty() {
                        break;
                    }
                }
            }
        }

        self.playing.store(false, Ordering::SeqCst);
        *self.next_start.lock() = None;
        debug!("playback episode finished");
    }

    /// Dequeue and coalesce consecutive chunks up to the merge cap.
    fn drain_merged(&self) -> Option<Vec<AudioChunk>> {
        let mut queue = self.queue.lock();
        let first = queue.pop_front()?;
        let sample_rate = first.sample_rate;
        let cap = Duration::from_millis(self.tuning.max_merge_ms);
        let mut total = first.duration();
        let mut merged = vec![first];

        while let Some(next) = queue.front() {
            if next.sample_rate != sample_rate || total + next.duration() > cap {
                break;
            }
            total += next.duration();
            // front() just returned Some under the same lock
            merged.push(queue.pop_front().unwrap_or_else(|| unreachable!()));
        }
        Some(merged)
    }

    /// Schedule one merged buffer at the clock's next start, snapping the
    /// clock forward if it has fallen behind real time.
    fn schedule_merged(&self, chunks: Vec<AudioChunk>) {
        let sample_rate = chunks[0].sample_rate;
        let mut samples = Vec::new();
        for chunk in &chunks {
            samples.extend(pcm16_to_f32(&chunk.data));
        }
        let duration = Duration::from_secs_f64(samples.len() as f64 / sample_rate as f64);
        let level = rms_level(&samples);

        let start = {
            let mut clock = self.next_start.lock();
            let epsilon = Duration::from_millis(self.tuning.start_lead_ms);
            let now = Instant::now();
            let mut start = clock.unwrap_or(now + epsilon);
            if start < now {
                start = now + epsilon;
            }
            *clock = Some(start + duration);
            start
        };

        trace!(
            chunks = chunks.len(),
            ms = duration.as_millis() as u64,
            "scheduling merged buffer"
        );
        self.sink.schedule(ScheduledBuffer {
            samples,
            sample_rate,
            start,
            duration,
        });
        self.events.emit(EngineEvent::OutputLevel(level));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::events::event_channel;

    /// Records scheduled buffers instead of playing them.
    #[derive(Default)]
    struct RecordingSink {
        scheduled: Mutex<Vec<ScheduledBuffer>>,
        stops: AtomicBool,
    }

    impl AudioSink for RecordingSink {
        fn schedule(&self, buffer: ScheduledBuffer) {
            self.scheduled.lock().push(buffer);
        }
        fn stop_all(&self) {
            self.stops.store(true, Ordering::SeqCst);
        }
    }

    fn chunk_ms(ms: u64, seq: u64) -> AudioChunk {
        // PCM16 mono at 24 kHz: 48 bytes per ms
        AudioChunk::new(vec![0u8; (ms * 48) as usize], 24000, seq)
    }

    fn loud_chunk_ms(ms: u64, seq: u64) -> AudioChunk {
        AudioChunk::new(vec![0x10u8; (ms * 48) as usize], 24000, seq)
    }

    fn scheduler(
        tuning: PlaybackTuning,
    ) -> (Arc<PlaybackScheduler>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let (events, _rx) = event_channel();
        let scheduler = Arc::new(PlaybackScheduler::new(tuning, sink.clone(), events));
        (scheduler, sink)
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_playback_below_warm_threshold() {
        let (scheduler, sink) = scheduler(PlaybackTuning::default());
        let pump = scheduler.clone().spawn_pump();

        scheduler.push(chunk_ms(20, 0));
        scheduler.push(chunk_ms(20, 1));
        tokio::time::sleep(Duration::from_millis(200)).await;
        scheduler.cancel();

        assert!(sink.scheduled.lock().is_empty());
        assert_eq!(scheduler.queued(), 0);
        pump.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_plays_gapless() {
        // Small merge cap so the burst produces several scheduled buffers.
        let tuning = PlaybackTuning {
            max_merge_ms: 40,
            ..Default::default()
        };
        let (scheduler, sink) = scheduler(tuning);
        let pump = scheduler.clone().spawn_pump();

        for seq in 0..5 {
            scheduler.push(chunk_ms(20, seq));
        }
        // 5 × 20 ms of audio plus grace: well within 200 ms of paused time.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let scheduled = sink.scheduled.lock();
        let total_ms: u128 = scheduled.iter().map(|b| b.duration.as_millis()).sum();
        assert_eq!(total_ms, 100, "all five chunks scheduled");
        assert!(scheduled.len() >= 2, "merge cap splits the burst");
        for pair in scheduled.windows(2) {
            assert_eq!(
                pair[1].start,
                pair[0].start + pair[0].duration,
                "buffers must be back-to-back"
            );
        }
        drop(scheduled);

        assert!(!scheduler.is_playing(), "episode concluded after silence");
        pump.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_grace_bridges_brief_gap() {
        let (scheduler, sink) = scheduler(PlaybackTuning::default());
        let pump = scheduler.clone().spawn_pump();

        for seq in 0..3 {
            scheduler.push(chunk_ms(20, seq));
        }
        // Let the merged buffer schedule, then feed one more within the grace.
        tokio::time::sleep(Duration::from_millis(10)).await;
        scheduler.push(chunk_ms(20, 3));
        tokio::time::sleep(Duration::from_millis(200)).await;

        let scheduled = sink.scheduled.lock();
        let total_ms: u128 = scheduled.iter().map(|b| b.duration.as_millis()).sum();
        assert_eq!(total_ms, 80, "late chunk joined the same episode");
        pump.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent_and_synchronous() {
        let (scheduler, sink) = scheduler(PlaybackTuning::default());
        let pump = scheduler.clone().spawn_pump();

        for seq in 0..6 {
            scheduler.push(chunk_ms(20, seq));
        }
        scheduler.cancel();
        assert_eq!(scheduler.queued(), 0);
        assert!(sink.stops.load(Ordering::SeqCst));

        // Second cancel with an empty queue is a no-op, not an error.
        scheduler.cancel();
        assert_eq!(scheduler.queued(), 0);
        pump.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_episode_halts_scheduling() {
        let tuning = PlaybackTuning {
            max_merge_ms: 20,
            ..Default::default()
        };
        let (scheduler, sink) = scheduler(tuning);
        let pump = scheduler.clone().spawn_pump();

        for seq in 0..3 {
            scheduler.push(chunk_ms(20, seq));
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        let before = sink.scheduled.lock().len();

        scheduler.cancel();
        // Push more audio; below the warm threshold nothing may play.
        scheduler.push(chunk_ms(20, 3));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(sink.scheduled.lock().len(), before);
        assert!(!scheduler.is_playing());
        pump.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_plays_response_below_warm_threshold() {
        let (scheduler, sink) = scheduler(PlaybackTuning::default());
        let pump = scheduler.clone().spawn_pump();

        scheduler.push(chunk_ms(20, 0));
        scheduler.push(chunk_ms(20, 1));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sink.scheduled.lock().is_empty(), "still below warm threshold");

        scheduler.flush();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let total_ms: u128 = sink
            .scheduled
            .lock()
            .iter()
            .map(|b| b.duration.as_millis())
            .sum();
        assert_eq!(total_ms, 40, "both chunks played on flush");
        assert_eq!(scheduler.queued(), 0);
        pump.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_keeps_responses_isolated() {
        let (scheduler, sink) = scheduler(PlaybackTuning::default());
        let pump = scheduler.clone().spawn_pump();

        // A one-chunk response, flushed when its audio stream ends.
        scheduler.push(loud_chunk_ms(20, 0));
        scheduler.flush();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sink.scheduled.lock().len(), 1, "short response played out");

        // The next response's audio must not be preceded by stale samples.
        for seq in 1..4 {
            scheduler.push(chunk_ms(20, seq));
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let scheduled = sink.scheduled.lock();
        assert!(scheduled.len() >= 2);
        assert!(scheduled[0].samples.iter().any(|s| *s != 0.0));
        assert!(
            scheduled[1..]
                .iter()
                .all(|b| b.samples.iter().all(|s| *s == 0.0)),
            "no carryover into the next response"
        );
        pump.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_discards_pending_flush() {
        let (scheduler, sink) = scheduler(PlaybackTuning::default());

        scheduler.push(chunk_ms(20, 0));
        scheduler.flush();
        scheduler.cancel();

        // Only now start the pump: the cancelled flush must not replay.
        let pump = scheduler.clone().spawn_pump();
        scheduler.push(chunk_ms(20, 1));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(sink.scheduled.lock().is_empty());
        pump.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_snaps_forward_when_behind() {
        let (scheduler, _sink) = scheduler(PlaybackTuning::default());
        // Pretend the previous buffer was scheduled long ago.
        *scheduler.next_start.lock() = Some(Instant::now());
        tokio::time::advance(Duration::from_secs(1)).await;

        scheduler.schedule_merged(vec![chunk_ms(20, 0)]);
        let clock = scheduler.next_start.lock().unwrap();
        assert!(clock > Instant::now(), "clock snapped past now");
    }
}
