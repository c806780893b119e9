//! Audio seams and PCM plumbing.
//!
//! The session core never touches a concrete device: capture and render sit
//! behind [`AudioCapturer`] and [`AudioRenderer`] so hosts can plug in real
//! hardware and tests can plug in fakes.

pub(crate) mod capture;
pub(crate) mod playback;
pub mod wav;

use std::path::Path;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;

use crate::error::{CaptureError, PlaybackError};

/// Sample rate the remote protocol expects on both directions.
pub const WIRE_SAMPLE_RATE: u32 = 24_000;

/// Fixed PCM parameters for one audio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl AudioFormat {
    pub const fn pcm16_mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
            bits_per_sample: 16,
        }
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::pcm16_mono(WIRE_SAMPLE_RATE)
    }
}

/// Records one bounded segment at a time and yields wire-rate mono PCM.
#[async_trait]
pub trait AudioCapturer: Send + Sync {
    async fn start(&self) -> Result<(), CaptureError>;

    /// Stops the running segment and drains everything it captured.
    async fn stop(&self) -> Result<Vec<i16>, CaptureError>;
}

/// Plays a synthesized container from disk; `play` resolves when the audio
/// has finished or `stop` was called.
#[async_trait]
pub trait AudioRenderer: Send + Sync {
    async fn play(&self, container: &Path, format: &AudioFormat) -> Result<(), PlaybackError>;

    /// Cuts active playback short. No-op when idle.
    fn stop(&self);
}

pub fn encode_pcm16_base64(samples: &[i16]) -> String {
    let bytes: Vec<u8> = samples
        .iter()
        .flat_map(|sample| sample.to_le_bytes())
        .collect();
    base64::engine::general_purpose::STANDARD.encode(&bytes)
}

pub fn decode_pcm16_base64(payload: &str) -> Result<Bytes, base64::DecodeError> {
    base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map(Bytes::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_base64_round_trip() {
        let samples = [256i16, -256, 0, i16::MAX, i16::MIN];
        let encoded = encode_pcm16_base64(&samples);
        let decoded = decode_pcm16_base64(&encoded).unwrap();
        let back: Vec<i16> = decoded
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        assert_eq!(back, samples);
    }

    #[test]
    fn invalid_base64_is_an_error_not_silence() {
        assert!(decode_pcm16_base64("not base64!").is_err());
    }

    #[test]
    fn default_format_matches_the_wire() {
        let format = AudioFormat::default();
        assert_eq!(format.sample_rate, WIRE_SAMPLE_RATE);
        assert_eq!(format.channels, 1);
        assert_eq!(format.bits_per_sample, 16);
    }
}
