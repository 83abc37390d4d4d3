//! Synthetic impulse responses
//!
//! The reverb kernel is decaying white noise: each channel draws its own
//! noise so the tail is decorrelated between left and right.

use rand::Rng;

use crate::engine::buffer::SampleBuffer;
use crate::error::GraphError;

/// Default reverb tail length in seconds
pub const DEFAULT_IMPULSE_DURATION_SECS: f32 = 2.5;

/// Default decay exponent
pub const DEFAULT_IMPULSE_DECAY: f32 = 2.0;

/// A two-channel reverb kernel
#[derive(Debug, Clone, PartialEq)]
pub struct ImpulseResponse {
    buffer: SampleBuffer,
}

impl ImpulseResponse {
    /// Wrap an existing buffer as a kernel
    ///
    /// # Errors
    /// `InvalidImpulse` unless the buffer has exactly 2 channels and at
    /// least one frame.
    pub fn from_buffer(buffer: SampleBuffer) -> Result<Self, GraphError> {
        if buffer.channel_count() != 2 {
            return Err(GraphError::InvalidImpulse {
                reason: format!("expected 2 channels, got {}", buffer.channel_count()),
            });
        }
        if buffer.is_empty() {
            return Err(GraphError::InvalidImpulse {
                reason: "impulse has no frames".to_string(),
            });
        }
        Ok(Self { buffer })
    }

    /// Kernel length in frames
    pub fn len(&self) -> usize {
        self.buffer.frame_count()
    }

    /// True when the kernel holds no frames
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn sample_rate(&self) -> u32 {
        self.buffer.sample_rate()
    }

    pub fn left(&self) -> &[f32] {
        self.buffer.channel(0)
    }

    pub fn right(&self) -> &[f32] {
        self.buffer.channel(1)
    }

    pub fn as_buffer(&self) -> &SampleBuffer {
        &self.buffer
    }
}

/// Synthesize a decaying-noise impulse response with the thread RNG
///
/// `length = round(sample_rate * duration_secs)`, and each sample is
/// `uniform(-1, 1) * (1 - i / length) ^ decay`.
pub fn synthesize(
    sample_rate: u32,
    duration_secs: f32,
    decay: f32,
) -> Result<ImpulseResponse, GraphError> {
    synthesize_with_rng(&mut rand::thread_rng(), sample_rate, duration_secs, decay)
}

/// Synthesize an impulse response from a caller-supplied RNG
pub fn synthesize_with_rng<R: Rng + ?Sized>(
    rng: &mut R,
    sample_rate: u32,
    duration_secs: f32,
    decay: f32,
) -> Result<ImpulseResponse, GraphError> {
    if sample_rate == 0 {
        return Err(GraphError::InvalidImpulse {
            reason: "sample rate must be positive".to_string(),
        });
    }
    if !duration_secs.is_finite() || duration_secs <= 0.0 {
        return Err(GraphError::InvalidImpulse {
            reason: format!("duration must be positive, got {}", duration_secs),
        });
    }
    if !decay.is_finite() || decay < 0.0 {
        return Err(GraphError::InvalidImpulse {
            reason: format!("decay must be non-negative, got {}", decay),
        });
    }

    let length = (sample_rate as f64 * duration_secs as f64).round() as usize;
    if length == 0 {
        return Err(GraphError::InvalidImpulse {
            reason: "duration rounds to zero frames".to_string(),
        });
    }

    let mut channels = vec![Vec::with_capacity(length); 2];
    for i in 0..length {
        let envelope = (1.0 - i as f64 / length as f64).powf(decay as f64) as f32;
        for channel in channels.iter_mut() {
            let noise: f32 = rng.gen_range(-1.0..1.0);
            channel.push(noise * envelope);
        }
    }

    let buffer = SampleBuffer::from_channels(channels, sample_rate).map_err(|e| {
        GraphError::InvalidImpulse {
            reason: e.to_string(),
        }
    })?;
    ImpulseResponse::from_buffer(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_length_and_channels() {
        let ir = synthesize(24000, 2.5, 2.0).unwrap();
        assert_eq!(ir.len(), 60000);
        assert_eq!(ir.as_buffer().channel_count(), 2);
        assert_eq!(ir.sample_rate(), 24000);
    }

    #[test]
    fn test_length_rounds() {
        let mut rng = StdRng::seed_from_u64(1);
        let ir = synthesize_with_rng(&mut rng, 1000, 0.0015, 2.0).unwrap();
        assert_eq!(ir.len(), 2);
    }

    #[test]
    fn test_decay_envelope() {
        let ir = synthesize(24000, 2.5, 2.0).unwrap();
        let len = ir.len();
        // Mean-square energy, not amplitude
        let head = ir.as_buffer().rms_range(0..len / 10).powi(2);
        let tail = ir.as_buffer().rms_range(len / 2..len).powi(2);
        assert!(
            tail < head * 0.1,
            "tail energy {} should be under 10% of head energy {}",
            tail,
            head
        );
    }

    #[test]
    fn test_samples_bounded_by_envelope() {
        let mut rng = StdRng::seed_from_u64(7);
        let ir = synthesize_with_rng(&mut rng, 8000, 0.5, 3.0).unwrap();
        let len = ir.len() as f64;
        for (i, &s) in ir.left().iter().enumerate() {
            let envelope = (1.0 - i as f64 / len).powf(3.0) as f32;
            assert!(s.abs() <= envelope + 1e-6);
        }
    }

    #[test]
    fn test_channels_decorrelated() {
        let mut rng = StdRng::seed_from_u64(42);
        let ir = synthesize_with_rng(&mut rng, 24000, 0.5, 0.0).unwrap();
        assert_ne!(ir.left(), ir.right());

        let dot: f64 = ir
            .left()
            .iter()
            .zip(ir.right())
            .map(|(&l, &r)| l as f64 * r as f64)
            .sum();
        let norm: f64 = ir.left().iter().map(|&l| (l as f64).powi(2)).sum();
        assert!((dot / norm).abs() < 0.1);
    }

    #[test]
    fn test_seeded_is_deterministic() {
        let a = synthesize_with_rng(&mut StdRng::seed_from_u64(3), 8000, 0.1, 2.0).unwrap();
        let b = synthesize_with_rng(&mut StdRng::seed_from_u64(3), 8000, 0.1, 2.0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(synthesize(0, 2.5, 2.0).is_err());
        assert!(synthesize(24000, 0.0, 2.0).is_err());
        assert!(synthesize(24000, -1.0, 2.0).is_err());
        assert!(synthesize(24000, 1.0, -2.0).is_err());
        assert!(synthesize(24000, 1e-9, 2.0).is_err());
    }

    #[test]
    fn test_from_buffer_requires_stereo() {
        let mono = SampleBuffer::silent(1, 10, 24000).unwrap();
        assert!(ImpulseResponse::from_buffer(mono).is_err());
    }

    #[test]
    fn test_from_buffer_rejects_empty() {
        let empty = SampleBuffer::silent(2, 0, 24000).unwrap();
        assert!(ImpulseResponse::from_buffer(empty).is_err());

        let ir = ImpulseResponse::from_buffer(SampleBuffer::silent(2, 1, 24000).unwrap()).unwrap();
        assert_eq!(ir.len(), 1);
        assert!(!ir.is_empty());
    }
}
