//! Sample Buffer
//!
//! The in-memory representation shared by every stage of the pipeline:
//! non-interleaved 32-bit float channels at a fixed sample rate.

use std::ops::Range;

use crate::error::BufferError;

// ============================================================================
// Constants
// ============================================================================

/// Sample rate emitted by the speech service
pub const SPEECH_SAMPLE_RATE: u32 = 24000;

/// Channel count emitted by the speech service
pub const SPEECH_CHANNELS: usize = 1;

// ============================================================================
// Helper Functions
// ============================================================================

/// Convert linear amplitude to decibels
///
/// Returns `f32::NEG_INFINITY` for zero or negative input.
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * linear.log10()
    }
}

/// Root mean square of a slice, accumulated in f64
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

// ============================================================================
// Sample Buffer
// ============================================================================

/// Multi-channel float audio at a known sample rate
///
/// Every channel holds the same number of frames. Samples are not clamped
/// here; clamping happens only when the buffer is encoded.
///
/// # Example
/// ```
/// use reverie::engine::SampleBuffer;
///
/// let buffer = SampleBuffer::silent(1, 24000, 24000).unwrap();
/// assert_eq!(buffer.channel_count(), 1);
/// assert_eq!(buffer.frame_count(), 24000);
/// assert_eq!(buffer.duration_secs(), 1.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl SampleBuffer {
    /// Create a buffer from per-channel sample vectors
    ///
    /// # Errors
    /// * `NoChannels` if `channels` is empty
    /// * `InvalidSampleRate` if `sample_rate` is zero
    /// * `ChannelLengthMismatch` if the channels differ in length
    pub fn from_channels(channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self, BufferError> {
        if channels.is_empty() {
            return Err(BufferError::NoChannels);
        }
        if sample_rate == 0 {
            return Err(BufferError::InvalidSampleRate);
        }

        let expected = channels[0].len();
        if let Some((channel, ch)) = channels
            .iter()
            .enumerate()
            .find(|(_, ch)| ch.len() != expected)
        {
            return Err(BufferError::ChannelLengthMismatch {
                channel,
                expected,
                actual: ch.len(),
            });
        }

        Ok(Self {
            channels,
            sample_rate,
        })
    }

    /// Build a buffer whose shape the caller has already guaranteed
    pub(crate) fn from_parts(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        debug_assert!(!channels.is_empty() && sample_rate > 0);
        debug_assert!(channels.iter().all(|ch| ch.len() == channels[0].len()));
        Self {
            channels,
            sample_rate,
        }
    }

    /// Create a buffer of zeroed samples
    pub fn silent(
        channel_count: usize,
        frame_count: usize,
        sample_rate: u32,
    ) -> Result<Self, BufferError> {
        Self::from_channels(vec![vec![0.0; frame_count]; channel_count], sample_rate)
    }

    /// Create a buffer from interleaved (frame-major) samples
    ///
    /// Trailing samples that do not complete a frame are ignored.
    pub fn from_interleaved(
        interleaved: &[f32],
        channel_count: usize,
        sample_rate: u32,
    ) -> Result<Self, BufferError> {
        if channel_count == 0 {
            return Err(BufferError::NoChannels);
        }
        let frames = interleaved.len() / channel_count;
        let mut channels = vec![Vec::with_capacity(frames); channel_count];
        for frame in interleaved.chunks_exact(channel_count) {
            for (ch, &sample) in frame.iter().enumerate() {
                channels[ch].push(sample);
            }
        }
        Self::from_channels(channels, sample_rate)
    }

    /// Convert the buffer to interleaved format (L, R, L, R, ...)
    pub fn to_interleaved(&self) -> Vec<f32> {
        let mut interleaved = Vec::with_capacity(self.channel_count() * self.frame_count());
        for frame in 0..self.frame_count() {
            for channel in &self.channels {
                interleaved.push(channel[frame]);
            }
        }
        interleaved
    }

    /// Number of channels
    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of frames (samples per channel)
    #[inline]
    pub fn frame_count(&self) -> usize {
        self.channels.first().map(|ch| ch.len()).unwrap_or(0)
    }

    /// Sample rate in Hz
    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Check if the buffer holds no frames
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frame_count() == 0
    }

    /// Duration in seconds
    #[inline]
    pub fn duration_secs(&self) -> f64 {
        self.frame_count() as f64 / self.sample_rate as f64
    }

    /// Samples of one channel
    ///
    /// # Panics
    /// Panics if the channel index is out of bounds
    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    /// All channels
    #[inline]
    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    /// Consume the buffer, returning its channels
    pub fn into_channels(self) -> Vec<Vec<f32>> {
        self.channels
    }

    /// Get a sample, or None if out of bounds
    #[inline]
    pub fn get_sample(&self, channel: usize, frame: usize) -> Option<f32> {
        self.channels.get(channel).and_then(|ch| ch.get(frame).copied())
    }

    /// Check if all samples are finite (not NaN or Infinity)
    pub fn is_finite(&self) -> bool {
        self.channels
            .iter()
            .flat_map(|ch| ch.iter())
            .all(|s| s.is_finite())
    }

    /// Peak absolute sample value across all channels
    pub fn peak(&self) -> f32 {
        self.channels
            .iter()
            .flat_map(|ch| ch.iter())
            .map(|s| s.abs())
            .fold(0.0_f32, f32::max)
    }

    /// RMS over a frame range, averaged across channels
    ///
    /// The range is clipped to the buffer length.
    pub fn rms_range(&self, frames: Range<usize>) -> f32 {
        let end = frames.end.min(self.frame_count());
        let start = frames.start.min(end);
        let per_channel: Vec<f32> = self
            .channels
            .iter()
            .map(|ch| rms(&ch[start..end]))
            .collect();
        let mean_square: f32 =
            per_channel.iter().map(|r| r * r).sum::<f32>() / per_channel.len().max(1) as f32;
        mean_square.sqrt()
    }
}

/// Generate a mono sine tone
///
/// Useful for exercising the pipeline without a speech source.
pub fn generate_test_tone(
    frequency: f32,
    amplitude: f32,
    duration_secs: f32,
    sample_rate: u32,
) -> SampleBuffer {
    let frames = (duration_secs * sample_rate as f32) as usize;
    let angular_freq = 2.0 * std::f64::consts::PI * frequency as f64 / sample_rate as f64;
    let samples = (0..frames)
        .map(|i| (amplitude as f64 * (angular_freq * i as f64).sin()) as f32)
        .collect();
    SampleBuffer {
        channels: vec![samples],
        sample_rate,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_channels_rejects_mismatch() {
        let err = SampleBuffer::from_channels(vec![vec![0.0; 4], vec![0.0; 3]], 24000).unwrap_err();
        assert_eq!(
            err,
            BufferError::ChannelLengthMismatch {
                channel: 1,
                expected: 4,
                actual: 3
            }
        );
    }

    #[test]
    fn test_from_channels_rejects_empty_and_zero_rate() {
        assert_eq!(
            SampleBuffer::from_channels(Vec::new(), 24000).unwrap_err(),
            BufferError::NoChannels
        );
        assert_eq!(
            SampleBuffer::from_channels(vec![vec![0.0]], 0).unwrap_err(),
            BufferError::InvalidSampleRate
        );
    }

    #[test]
    fn test_interleave_roundtrip() {
        let buffer =
            SampleBuffer::from_channels(vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]], 24000)
                .unwrap();
        let interleaved = buffer.to_interleaved();
        assert_eq!(interleaved, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);

        let back = SampleBuffer::from_interleaved(&interleaved, 2, 24000).unwrap();
        assert_eq!(back, buffer);
    }

    #[test]
    fn test_silent_buffer() {
        let buffer = SampleBuffer::silent(2, 100, 48000).unwrap();
        assert_eq!(buffer.frame_count(), 100);
        assert_eq!(buffer.peak(), 0.0);
        assert_eq!(buffer.rms_range(0..100), 0.0);
    }

    #[test]
    fn test_rms_of_sine() {
        // Sine with amplitude 1.0 has RMS of 1/sqrt(2)
        let tone = generate_test_tone(1000.0, 1.0, 1.0, 48000);
        let value = tone.rms_range(0..tone.frame_count());
        assert!((value - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-3);
        assert!((linear_to_db(value) + 3.01).abs() < 0.05);
    }

    #[test]
    fn test_rms_range_clipped_to_length() {
        let buffer = SampleBuffer::from_channels(vec![vec![0.5; 10]], 24000).unwrap();
        assert!((buffer.rms_range(5..1000) - 0.5).abs() < 1e-6);
        assert_eq!(buffer.rms_range(20..30), 0.0);
    }
}
