//! RIFF/WAVE export and import
//!
//! Export writes the classic 44-byte PCM header by hand so the output is
//! byte-exact; import goes through `hound` and accepts 16-bit PCM only.
//!
//! Quantization is asymmetric: non-positive samples are scaled by 32768,
//! positive samples by 32767. Silence and the negative peak survive a
//! decode/encode round trip exactly; the positive peak does not. This
//! matches the upstream encoder and must not be "fixed".

use std::fs;
use std::path::Path;

use hound::{SampleFormat, WavReader};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::engine::buffer::SampleBuffer;
use crate::engine::pcm::PCM16_SCALE;
use crate::error::{ReverieError, Result};

/// MIME type of exported files
pub const WAV_CONTENT_TYPE: &str = "audio/wav";

/// Size of the canonical PCM header in bytes
pub const WAV_HEADER_LEN: usize = 44;

/// Default file name offered for downloads
pub const DEFAULT_DOWNLOAD_NAME: &str = "Meditation.wav";

const BITS_PER_SAMPLE: u16 = 16;
const FORMAT_PCM: u16 = 1;
const FMT_CHUNK_LEN: u32 = 16;

/// Convert one float sample to a 16-bit integer
///
/// Clamps to [-1, 1], then truncates toward zero after scaling.
#[inline]
pub fn quantize(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0) as f64;
    if s <= 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Encode a buffer as a 16-bit PCM RIFF/WAVE file
///
/// # Example
/// ```
/// use reverie::engine::{wav, SampleBuffer};
///
/// let buffer = SampleBuffer::silent(1, 24000, 24000).unwrap();
/// let bytes = wav::encode(&buffer);
/// assert_eq!(bytes.len(), 48044);
/// assert_eq!(&bytes[0..4], b"RIFF");
/// ```
pub fn encode(buffer: &SampleBuffer) -> Vec<u8> {
    let channels = buffer.channel_count() as u16;
    let sample_rate = buffer.sample_rate();
    let block_align = channels * (BITS_PER_SAMPLE / 8);
    let byte_rate = sample_rate * block_align as u32;
    let data_len = (buffer.frame_count() * block_align as usize) as u32;

    let mut out = Vec::with_capacity(WAV_HEADER_LEN + data_len as usize);

    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(WAV_HEADER_LEN as u32 - 8 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&FMT_CHUNK_LEN.to_le_bytes());
    out.extend_from_slice(&FORMAT_PCM.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());

    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());

    for frame in 0..buffer.frame_count() {
        for channel in buffer.channels() {
            out.extend_from_slice(&quantize(channel[frame]).to_le_bytes());
        }
    }

    out
}

/// Encode a buffer and write it to disk
pub fn write_wav(path: &Path, buffer: &SampleBuffer) -> Result<()> {
    let bytes = encode(buffer);
    fs::write(path, &bytes)?;
    debug!(path = %path.display(), bytes = bytes.len(), "wrote wav");
    Ok(())
}

/// Read a 16-bit PCM WAV file
///
/// Uses the same `/32768` normalization as the PCM decoder.
///
/// # Errors
/// * `Io` if the file cannot be opened
/// * `UnsupportedFormat` for anything other than 16-bit integer PCM
pub fn read_wav(path: &Path) -> Result<SampleBuffer> {
    let reader = WavReader::open(path).map_err(|e| match e {
        hound::Error::IoError(io) => ReverieError::Io(io),
        other => ReverieError::UnsupportedFormat {
            format: other.to_string(),
        },
    })?;

    let spec = reader.spec();
    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != BITS_PER_SAMPLE {
        return Err(ReverieError::UnsupportedFormat {
            format: format!(
                "{}-bit {:?} audio (only 16-bit PCM supported)",
                spec.bits_per_sample, spec.sample_format
            ),
        });
    }

    let samples = reader
        .into_samples::<i16>()
        .map(|s| s.map(|v| v as f32 / PCM16_SCALE))
        .collect::<std::result::Result<Vec<f32>, _>>()
        .map_err(|e| ReverieError::UnsupportedFormat {
            format: format!("Failed to read 16-bit samples: {}", e),
        })?;

    Ok(SampleBuffer::from_interleaved(
        &samples,
        spec.channels as usize,
        spec.sample_rate,
    )?)
}

/// An encoded file ready to hand to the host for saving
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

impl Download {
    /// Wrap encoded WAV bytes under a caller-supplied file name
    pub fn wav(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type: WAV_CONTENT_TYPE,
            bytes,
        }
    }

    /// Hex SHA-256 of the file contents
    pub fn sha256_hex(&self) -> String {
        sha256_hex(&self.bytes)
    }
}

/// Hex SHA-256 of a byte slice
pub fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::tempdir;
    use test_case::test_case;

    fn u32_at(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ])
    }

    fn u16_at(bytes: &[u8], offset: usize) -> u16 {
        u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
    }

    #[test]
    fn test_header_layout_mono() {
        let n = 100;
        let buffer = SampleBuffer::silent(1, n, 24000).unwrap();
        let bytes = encode(&buffer);

        assert_eq!(bytes.len(), 44 + 2 * n);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(u32_at(&bytes, 4), (44 + 2 * n - 8) as u32);
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(&bytes[12..16], b"fmt ");
        assert_eq!(u32_at(&bytes, 16), 16);
        assert_eq!(u16_at(&bytes, 20), 1);
        assert_eq!(u16_at(&bytes, 22), 1);
        assert_eq!(u32_at(&bytes, 24), 24000);
        assert_eq!(u32_at(&bytes, 28), 48000);
        assert_eq!(u16_at(&bytes, 32), 2);
        assert_eq!(u16_at(&bytes, 34), 16);
        assert_eq!(&bytes[36..40], b"data");
        assert_eq!(u32_at(&bytes, 40), (2 * n) as u32);
    }

    #[test]
    fn test_header_layout_stereo() {
        let buffer = SampleBuffer::silent(2, 10, 48000).unwrap();
        let bytes = encode(&buffer);
        assert_eq!(u16_at(&bytes, 22), 2);
        assert_eq!(u32_at(&bytes, 28), 48000 * 4);
        assert_eq!(u16_at(&bytes, 32), 4);
        assert_eq!(u32_at(&bytes, 40), 40);
    }

    #[test_case(-1.0 => -32768 ; "full scale negative")]
    #[test_case(1.0 => 32767 ; "full scale positive")]
    #[test_case(0.0 => 0 ; "zero")]
    #[test_case(-0.5 => -16384 ; "half negative")]
    #[test_case(0.5 => 16383 ; "half positive truncates")]
    #[test_case(3.0 => 32767 ; "clamped high")]
    #[test_case(-3.0 => -32768 ; "clamped low")]
    fn test_quantize_asymmetric(sample: f32) -> i16 {
        quantize(sample)
    }

    #[test]
    fn test_interleaving_order() {
        let buffer =
            SampleBuffer::from_channels(vec![vec![-0.5, 0.0], vec![-1.0, 0.25]], 24000).unwrap();
        let bytes = encode(&buffer);
        let data: Vec<i16> = bytes[44..]
            .chunks_exact(2)
            .map(|p| i16::from_le_bytes([p[0], p[1]]))
            .collect();
        assert_eq!(data, vec![-16384, -32768, 0, 8191]);
    }

    #[test]
    fn test_hound_reads_encoded_output() {
        let buffer =
            SampleBuffer::from_channels(vec![vec![0.0, -0.5, 0.25], vec![0.1, 0.2, -1.0]], 22050)
                .unwrap();
        let bytes = encode(&buffer);
        let reader = WavReader::new(Cursor::new(bytes)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 22050);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(reader.len(), 6);
    }

    #[test]
    fn test_write_and_read_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("roundtrip.wav");

        let original =
            SampleBuffer::from_channels(vec![vec![-1.0, -0.25, 0.0, 0.5]], 24000).unwrap();
        write_wav(&path, &original).unwrap();
        let imported = read_wav(&path).unwrap();

        assert_eq!(imported.sample_rate(), 24000);
        assert_eq!(imported.frame_count(), 4);
        for (a, b) in original.channel(0).iter().zip(imported.channel(0)) {
            assert!((a - b).abs() <= 1.0 / 32768.0 + 1e-9);
        }
    }

    #[test]
    fn test_read_missing_file() {
        let result = read_wav(Path::new("/nonexistent/path/audio.wav"));
        assert!(matches!(result, Err(ReverieError::Io(_))));
    }

    #[test]
    fn test_download_checksum() {
        let download = Download::wav("a.wav", b"abc".to_vec());
        assert_eq!(download.content_type, "audio/wav");
        assert_eq!(
            download.sha256_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
