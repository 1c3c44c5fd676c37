//! Audio pipeline: shared chunk type, PCM conversion and resampling,
//! capture encoding, and gapless playback scheduling.

pub mod capture;
#[cfg(feature = "audio-io")]
pub mod device;
pub mod playback;
pub mod resample;

pub use capture::{CaptureEncoder, CaptureSource};
#[cfg(feature = "audio-io")]
pub use device::{CpalCaptureSource, CpalSink};
pub use playback::{AudioSink, PlaybackScheduler, ScheduledBuffer};

use bytes::Bytes;

/// A fixed-format buffer of 16-bit signed PCM samples.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Raw PCM16 little-endian bytes
    pub data: Bytes,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Monotonic sequence number within the stream
    pub seq: u64,
}

impl AudioChunk {
    /// Create a chunk from raw PCM16 bytes.
    pub fn new(data: impl Into<Bytes>, sample_rate: u32, seq: u64) -> Self {
        Self {
            data: data.into(),
            sample_rate,
            seq,
        }
    }

    /// Number of samples in this chunk.
    pub fn sample_count(&self) -> usize {
        self.data.len() / 2
    }

    /// Duration of this chunk.
    pub fn duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.sample_count() as f64 / self.sample_rate as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_duration() {
        // 480 samples at 24 kHz = 20 ms
        let chunk = AudioChunk::new(vec![0u8; 960], 24000, 0);
        assert_eq!(chunk.sample_count(), 480);
        assert_eq!(chunk.duration(), std::time::Duration::from_millis(20));
    }
}
