//! # Audio Codec
//!
//! Pure, stateless conversions between captured audio and the canonical format the
//! voice backend speaks: **16-bit signed little-endian PCM, 16 kHz, mono**.
//!
//! ## Key Functions:
//! - **resample**: nearest-index resampling between arbitrary rates
//! - **quantize_to_pcm16**: float samples in [-1, 1] → PCM16 bytes
//! - **dequantize_from_pcm16**: PCM16 bytes → float samples in [-1, 1)
//!
//! ## Quality trade-off:
//! Resampling copies the nearest source sample and applies no anti-aliasing filter.
//! Content above the new Nyquist limit aliases. That is accepted for speech input.

use crate::error::RelayError;
use byteorder::{ByteOrder, LittleEndian};

/// Sample rate the backend expects for input audio.
pub const BACKEND_SAMPLE_RATE: u32 = 16_000;

/// Channel count the backend expects.
pub const BACKEND_CHANNELS: u8 = 1;

/// Bits per sample the backend expects.
pub const BACKEND_BITS_PER_SAMPLE: u8 = 16;

/// MIME type attached to every audio chunk sent to the backend.
pub const BACKEND_AUDIO_MIME: &str = "audio/pcm;rate=16000";

/// An immutable block of PCM16 audio tagged with its format.
///
/// Frames can only be built in the canonical backend format, so anything holding
/// an `AudioFrame` has already been converted. Conversion happens before the
/// backend boundary, never after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    data: Vec<u8>,
    sample_rate: u32,
    channels: u8,
    bits_per_sample: u8,
}

impl AudioFrame {
    /// Wrap bytes that are already PCM16/16 kHz/mono.
    ///
    /// Fails with a Codec error when the byte length is odd; the bytes are never
    /// silently truncated.
    pub fn from_pcm16_bytes(data: Vec<u8>) -> Result<Self, RelayError> {
        ensure_pcm16(&data)?;
        Ok(Self {
            data,
            sample_rate: BACKEND_SAMPLE_RATE,
            channels: BACKEND_CHANNELS,
            bits_per_sample: BACKEND_BITS_PER_SAMPLE,
        })
    }

    /// Convert mono float capture at any rate into a backend-ready frame.
    pub fn from_capture(samples: &[f32], sample_rate: u32) -> Result<Self, RelayError> {
        let resampled = resample(samples, sample_rate, BACKEND_SAMPLE_RATE)?;
        Self::from_pcm16_bytes(quantize_to_pcm16(&resampled))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn bits_per_sample(&self) -> u8 {
        self.bits_per_sample
    }

    pub fn sample_count(&self) -> usize {
        self.data.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Playback length of this frame in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        (self.sample_count() as u64 * 1000) / self.sample_rate as u64
    }
}

/// Reject byte sequences that cannot be PCM16.
pub fn ensure_pcm16(data: &[u8]) -> Result<(), RelayError> {
    if data.len() % 2 != 0 {
        return Err(RelayError::Codec(format!(
            "PCM16 audio must have an even byte length, got {} bytes",
            data.len()
        )));
    }
    Ok(())
}

/// Nearest-index resampling.
///
/// Output length is `round(len / (from_rate / to_rate))`. Output sample `i` copies
/// the input sample at `round(i * from_rate / to_rate)`, clamped to the last input
/// index. Matching rates return the input unchanged.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, RelayError> {
    if from_rate == 0 || to_rate == 0 {
        return Err(RelayError::Codec(format!(
            "cannot resample from {} Hz to {} Hz",
            from_rate, to_rate
        )));
    }

    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).round() as usize;
    let last = samples.len() - 1;

    let resampled = (0..output_len)
        .map(|i| {
            let source_index = ((i as f64 * ratio).round() as usize).min(last);
            samples[source_index]
        })
        .collect();

    Ok(resampled)
}

/// Clamp to [-1, 1], scale by 32767, round, and emit little-endian i16 pairs.
pub fn quantize_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = vec![0u8; samples.len() * 2];
    for (chunk, &sample) in bytes.chunks_exact_mut(2).zip(samples) {
        let scaled = (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16;
        LittleEndian::write_i16(chunk, scaled);
    }
    bytes
}

/// Read little-endian i16 samples and map them to [-1, 1) by dividing by 32768.
///
/// Zero maps to exactly 0.0 so silence survives a round trip unchanged.
pub fn dequantize_from_pcm16(bytes: &[u8]) -> Result<Vec<f32>, RelayError> {
    ensure_pcm16(bytes)?;
    Ok(bytes
        .chunks_exact(2)
        .map(|chunk| LittleEndian::read_i16(chunk) as f32 / 32768.0)
        .collect())
}
