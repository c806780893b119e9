//! Minimal WAV container synthesis.
//!
//! Pure byte assembly so the header can be verified against fixtures without
//! touching a device or the filesystem.

use super::AudioFormat;

const HEADER_LEN: usize = 44;

/// Wraps raw little-endian PCM in a canonical RIFF/WAVE container.
pub fn encode_wav(pcm: &[u8], format: &AudioFormat) -> Vec<u8> {
    let block_align = format.channels * (format.bits_per_sample / 8);
    let byte_rate = format.sample_rate * u32::from(block_align);
    let data_len = pcm.len() as u32;

    let mut out = Vec::with_capacity(HEADER_LEN + pcm.len());
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // uncompressed PCM
    out.extend_from_slice(&format.channels.to_le_bytes());
    out.extend_from_slice(&format.sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&format.bits_per_sample.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.extend_from_slice(pcm);
    out
}

/// The PCM payload of a container produced by [`encode_wav`].
pub fn data_section(container: &[u8]) -> &[u8] {
    &container[HEADER_LEN.min(container.len())..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_header_matches_fixture() {
        let format = AudioFormat::pcm16_mono(24_000);
        let container = encode_wav(&[], &format);
        #[rustfmt::skip]
        let expected: [u8; 44] = [
            b'R', b'I', b'F', b'F', 36, 0, 0, 0,
            b'W', b'A', b'V', b'E',
            b'f', b'm', b't', b' ', 16, 0, 0, 0,
            1, 0,                   // PCM
            1, 0,                   // mono
            0xC0, 0x5D, 0x00, 0x00, // 24_000 Hz
            0x80, 0xBB, 0x00, 0x00, // 48_000 bytes/s
            2, 0,                   // block align
            16, 0,                  // bits per sample
            b'd', b'a', b't', b'a', 0, 0, 0, 0,
        ];
        assert_eq!(container, expected);
    }

    #[test]
    fn payload_is_appended_verbatim_and_sized() {
        let format = AudioFormat::pcm16_mono(24_000);
        let pcm = [0x01u8, 0x02, 0x03, 0x04];
        let container = encode_wav(&pcm, &format);
        assert_eq!(container.len(), 44 + pcm.len());
        assert_eq!(&container[4..8], &(36u32 + 4).to_le_bytes());
        assert_eq!(&container[40..44], &4u32.to_le_bytes());
        assert_eq!(data_section(&container), pcm);
    }

    #[test]
    fn stereo_rates_derive_from_the_format() {
        let format = AudioFormat {
            sample_rate: 16_000,
            channels: 2,
            bits_per_sample: 16,
        };
        let container = encode_wav(&[], &format);
        // byte rate = 16_000 * 2 channels * 2 bytes
        assert_eq!(&container[28..32], &64_000u32.to_le_bytes());
        assert_eq!(&container[32..34], &4u16.to_le_bytes());
    }
}
