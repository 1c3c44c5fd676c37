//! PCM sample conversion and linear-interpolation resampling.
//!
//! The wire carries 16-bit signed little-endian PCM; capture devices hand us
//! f32 frames at whatever rate the hardware runs. Conversion rules:
//!
//! - f32 → i16: clamp to [-1, 1], then scale by 32767 for non-negative and
//!   32768 for negative values.
//! - i16 → f32: divide by 32768.
//! - Resampling is linear: output sample `i` blends `input[floor(i·ratio)]`
//!   and the following sample by the fractional remainder, clamped at the
//!   buffer end.

/// Resample `input` from `from_rate` to `to_rate` using linear interpolation.
///
/// Output length is `len(input) * to_rate / from_rate` (integer truncation),
/// so an all-zero input of any length yields an all-zero output of the
/// expected length.
pub fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if input.is_empty() || from_rate == 0 || to_rate == 0 {
        return Vec::new();
    }
    if from_rate == to_rate {
        return input.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((input.len() as u64 * to_rate as u64) / from_rate as u64) as usize;
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = (src_pos - idx as f64) as f32;

        let a = input[idx.min(input.len() - 1)];
        let b = input[(idx + 1).min(input.len() - 1)];
        output.push(a + (b - a) * frac);
    }

    output
}

/// Convert f32 samples in [-1, 1] to PCM16 little-endian bytes.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let value = if clamped >= 0.0 {
            (clamped * 32767.0) as i16
        } else {
            (clamped * 32768.0) as i16
        };
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Convert PCM16 little-endian bytes to normalized f32 samples.
///
/// A trailing odd byte is ignored.
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}

/// Root-mean-square energy of a sample buffer, scaled and clamped to [0, 1].
///
/// Published per merged playback buffer for level metering only; it has no
/// effect on control flow.
pub fn rms_level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let mean_square = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    // Speech RMS rarely exceeds ~0.25; scale up so normal levels use the range.
    (mean_square.sqrt() * 4.0).clamp(0.0, 1.0)
}
