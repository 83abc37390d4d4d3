//! PCM decoding
//!
//! The speech service returns base64-encoded, signed 16-bit little-endian
//! PCM. Samples are normalized with `s / 32768.0`, so the decoded range is
//! [-1.0, 0.99997]. The encoder in `wav.rs` mirrors this asymmetry; keep
//! the two in step or previously generated audio stops round-tripping.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::warn;

use crate::engine::buffer::SampleBuffer;
use crate::engine::wav::quantize;
use crate::error::DecodeError;

/// Normalization divisor for 16-bit PCM
pub const PCM16_SCALE: f32 = 32768.0;

/// A decoded buffer together with any non-fatal decode problem
#[derive(Debug, Clone)]
pub struct DecodeReport {
    pub buffer: SampleBuffer,
    /// `Some(DecodeError::TruncatedFrame { .. })` when trailing bytes were dropped
    pub warning: Option<DecodeError>,
}

/// Decode interleaved 16-bit LE PCM into a sample buffer
///
/// # Arguments
/// * `bytes` - Raw PCM bytes, frame-major interleaved
/// * `sample_rate` - Sample rate in Hz
/// * `channel_count` - Number of interleaved channels
///
/// # Errors
/// * `EmptyInput` if `bytes` is empty
/// * `InvalidSampleRate` / `InvalidChannelCount` for zero arguments
///
/// Trailing bytes that do not complete a frame are dropped without error.
///
/// # Example
/// ```
/// use reverie::engine::pcm::decode;
///
/// let bytes = [0x00, 0x80, 0xff, 0x7f]; // -32768, 32767
/// let buffer = decode(&bytes, 24000, 1).unwrap();
/// assert_eq!(buffer.channel(0)[0], -1.0);
/// assert!(buffer.channel(0)[1] < 1.0);
/// ```
pub fn decode(
    bytes: &[u8],
    sample_rate: u32,
    channel_count: usize,
) -> Result<SampleBuffer, DecodeError> {
    decode_report(bytes, sample_rate, channel_count).map(|report| report.buffer)
}

/// Decode PCM and report trailing bytes that were dropped
pub fn decode_report(
    bytes: &[u8],
    sample_rate: u32,
    channel_count: usize,
) -> Result<DecodeReport, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::EmptyInput);
    }
    if sample_rate == 0 {
        return Err(DecodeError::InvalidSampleRate);
    }
    if channel_count == 0 {
        return Err(DecodeError::InvalidChannelCount);
    }

    let frame_bytes = 2 * channel_count;
    let frame_count = bytes.len() / frame_bytes;
    let dropped_bytes = bytes.len() - frame_count * frame_bytes;

    let mut channels = vec![Vec::with_capacity(frame_count); channel_count];
    for frame in bytes.chunks_exact(frame_bytes) {
        for (ch, pair) in frame.chunks_exact(2).enumerate() {
            let value = i16::from_le_bytes([pair[0], pair[1]]);
            channels[ch].push(value as f32 / PCM16_SCALE);
        }
    }

    let warning = if dropped_bytes > 0 {
        let warning = DecodeError::TruncatedFrame { dropped_bytes };
        warn!("{}", warning);
        Some(warning)
    } else {
        None
    };

    // Channel count and rate were checked above, so construction cannot fail.
    let buffer = SampleBuffer::from_channels(channels, sample_rate)
        .map_err(|_| DecodeError::InvalidChannelCount)?;

    Ok(DecodeReport { buffer, warning })
}

/// Decode a base64 transport payload of 16-bit LE PCM
///
/// Leading and trailing whitespace is ignored.
pub fn decode_base64(
    text: &str,
    sample_rate: u32,
    channel_count: usize,
) -> Result<SampleBuffer, DecodeError> {
    let bytes = STANDARD
        .decode(text.trim())
        .map_err(|e| DecodeError::InvalidBase64 {
            reason: e.to_string(),
        })?;
    decode(&bytes, sample_rate, channel_count)
}

/// Encode raw bytes with the transport's base64 alphabet
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Quantize a buffer to interleaved 16-bit LE PCM (no container)
///
/// Uses the same quantizer as the WAV encoder.
pub fn to_pcm16(buffer: &SampleBuffer) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(buffer.frame_count() * buffer.channel_count() * 2);
    for frame in 0..buffer.frame_count() {
        for channel in buffer.channels() {
            bytes.extend_from_slice(&quantize(channel[frame]).to_le_bytes());
        }
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_asymmetric_scaling() {
        let bytes = [
            (-32768_i16).to_le_bytes(),
            32767_i16.to_le_bytes(),
            0_i16.to_le_bytes(),
        ]
        .concat();
        let buffer = decode(&bytes, 24000, 1).unwrap();
        assert_eq!(buffer.channel(0)[0], -1.0);
        assert_relative_eq!(buffer.channel(0)[1], 0.999_969_5, epsilon = 1e-6);
        assert!(buffer.channel(0)[1] < 1.0);
        assert_eq!(buffer.channel(0)[2], 0.0);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(decode(&[], 24000, 1).unwrap_err(), DecodeError::EmptyInput);
    }

    #[test]
    fn test_zero_params_rejected() {
        assert_eq!(
            decode(&[0, 0], 0, 1).unwrap_err(),
            DecodeError::InvalidSampleRate
        );
        assert_eq!(
            decode(&[0, 0], 24000, 0).unwrap_err(),
            DecodeError::InvalidChannelCount
        );
    }

    #[test]
    fn test_interleaved_stereo() {
        let bytes = [
            1000_i16.to_le_bytes(),
            (-1000_i16).to_le_bytes(),
            2000_i16.to_le_bytes(),
            (-2000_i16).to_le_bytes(),
        ]
        .concat();
        let buffer = decode(&bytes, 24000, 2).unwrap();
        assert_eq!(buffer.frame_count(), 2);
        assert_relative_eq!(buffer.channel(0)[1], 2000.0 / 32768.0);
        assert_relative_eq!(buffer.channel(1)[0], -1000.0 / 32768.0);
    }

    #[test]
    fn test_trailing_bytes_dropped() {
        // 7 bytes, stereo: one full frame (4 bytes), 3 bytes dropped
        let bytes = [0u8, 0, 0, 0, 1, 2, 3];
        let report = decode_report(&bytes, 24000, 2).unwrap();
        assert_eq!(report.buffer.frame_count(), 1);
        assert_eq!(
            report.warning,
            Some(DecodeError::TruncatedFrame { dropped_bytes: 3 })
        );

        // Odd byte count in mono
        let buffer = decode(&[0u8, 0, 9], 24000, 1).unwrap();
        assert_eq!(buffer.frame_count(), 1);
    }

    #[test]
    fn test_short_input_yields_empty_buffer() {
        let report = decode_report(&[7u8], 24000, 1).unwrap();
        assert!(report.buffer.is_empty());
        assert!(report.warning.is_some());
    }

    #[test]
    fn test_decode_base64() {
        let pcm = [0x00u8, 0x40, 0x00, 0xc0]; // 16384, -16384
        let text = format!("  {}\n", encode_base64(&pcm));
        let buffer = decode_base64(&text, 24000, 1).unwrap();
        assert_eq!(buffer.channel(0), &[0.5, -0.5]);
    }

    #[test]
    fn test_decode_base64_invalid() {
        let err = decode_base64("not base64!!", 24000, 1).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidBase64 { .. }));
    }

    #[test]
    fn test_to_pcm16_matches_source_bytes() {
        let pcm: Vec<u8> = [-32768_i16, -1, 0, 1, 12345, 32767]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let buffer = decode(&pcm, 24000, 1).unwrap();
        // Positive values are re-scaled by 32767, so only non-positive
        // samples are guaranteed to be bit-exact.
        let back = to_pcm16(&buffer);
        assert_eq!(&back[0..6], &pcm[0..6]);
        assert_eq!(back.len(), pcm.len());
    }
}
