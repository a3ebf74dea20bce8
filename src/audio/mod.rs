//! # Audio Module
//!
//! Format conversion between captured audio and the backend's canonical input.
//!
//! ## Audio Format Requirements (backend side):
//! - **Sample Rate**: 16kHz (16,000 Hz)
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers

pub mod codec;

pub use codec::{
    dequantize_from_pcm16, ensure_pcm16, quantize_to_pcm16, resample, AudioFrame,
    BACKEND_AUDIO_MIME, BACKEND_SAMPLE_RATE,
};
