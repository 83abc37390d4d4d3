//! Effects graph
//!
//! `output = dry * dry_gain + convolve(dry, impulse) * wet_gain`, summed
//! per output channel. The same description is evaluated two ways:
//! [`EffectsGraph::render_offline`] renders the whole buffer including the
//! reverb tail, and [`LiveGraph`] renders fixed-size quanta for playback.
//! Over their common duration the two agree within [`EQUIVALENCE_TOLERANCE`].
//!
//! Live playback stops at the end of the source, so the reverb tail that
//! the offline render keeps is cut off. That divergence is accepted.

use tracing::debug;

use crate::dsp::convolution::{convolve, PartitionedConvolver};
use crate::dsp::impulse::ImpulseResponse;
use crate::engine::buffer::SampleBuffer;
use crate::error::GraphError;

/// Default dry (unprocessed) gain
pub const DEFAULT_DRY_GAIN: f32 = 0.7;

/// Default wet (reverb) gain
pub const DEFAULT_WET_GAIN: f32 = 0.35;

/// Frames rendered per live processing call
pub const RENDER_QUANTUM: usize = 128;

/// Maximum absolute sample difference allowed between live and offline renders
pub const EQUIVALENCE_TOLERANCE: f32 = 1e-4;

// ============================================================================
// Configuration
// ============================================================================

/// Immutable mix description
///
/// Gains must lie in [0, 1] but need not sum to 1; the defaults
/// (0.7 / 0.35) intentionally add a little loudness.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectsConfig {
    dry_gain: f32,
    wet_gain: f32,
    impulse: ImpulseResponse,
    output_channels: usize,
}

impl EffectsConfig {
    /// Build a validated configuration
    ///
    /// # Errors
    /// * `InvalidGain` if a gain is outside [0, 1] or not finite
    /// * `ChannelMismatch` if `output_channels` is not 1 or 2
    pub fn new(
        dry_gain: f32,
        wet_gain: f32,
        impulse: ImpulseResponse,
        output_channels: usize,
    ) -> Result<Self, GraphError> {
        validate_gain("dry", dry_gain)?;
        validate_gain("wet", wet_gain)?;
        if !(1..=2).contains(&output_channels) {
            return Err(GraphError::ChannelMismatch {
                count: output_channels,
            });
        }
        Ok(Self {
            dry_gain,
            wet_gain,
            impulse,
            output_channels,
        })
    }

    /// Default gains with stereo output
    pub fn with_defaults(impulse: ImpulseResponse) -> Self {
        Self {
            dry_gain: DEFAULT_DRY_GAIN,
            wet_gain: DEFAULT_WET_GAIN,
            impulse,
            output_channels: 2,
        }
    }

    pub fn dry_gain(&self) -> f32 {
        self.dry_gain
    }

    pub fn wet_gain(&self) -> f32 {
        self.wet_gain
    }

    pub fn impulse(&self) -> &ImpulseResponse {
        &self.impulse
    }

    pub fn output_channels(&self) -> usize {
        self.output_channels
    }

    /// Kernel feeding output channel `channel`
    ///
    /// Stereo output uses the matching impulse channel; mono output uses
    /// the speaker down-mix `0.5 * (L + R)`.
    fn kernel(&self, channel: usize) -> Vec<f32> {
        if self.output_channels == 1 {
            self.impulse
                .left()
                .iter()
                .zip(self.impulse.right())
                .map(|(&l, &r)| 0.5 * (l + r))
                .collect()
        } else if channel == 0 {
            self.impulse.left().to_vec()
        } else {
            self.impulse.right().to_vec()
        }
    }
}

fn validate_gain(param: &'static str, value: f32) -> Result<(), GraphError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(GraphError::InvalidGain { param, value });
    }
    Ok(())
}

/// Dry input channel feeding output channel `channel`
#[inline]
fn source_channel(channel: usize, input_channels: usize) -> usize {
    channel.min(input_channels.saturating_sub(1))
}

// ============================================================================
// Offline evaluation
// ============================================================================

/// Render `dry` through the effects described by `config`
///
/// The result is `dry.len + impulse.len - 1` frames long.
pub fn apply(dry: &SampleBuffer, config: &EffectsConfig) -> SampleBuffer {
    EffectsGraph::new(config.clone()).render_offline(dry)
}

/// The effects description shared by live and offline rendering
#[derive(Debug, Clone)]
pub struct EffectsGraph {
    config: EffectsConfig,
}

impl EffectsGraph {
    pub fn new(config: EffectsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EffectsConfig {
        &self.config
    }

    /// Render the whole buffer, including the reverb tail
    pub fn render_offline(&self, dry: &SampleBuffer) -> SampleBuffer {
        let config = &self.config;
        let frames = dry.frame_count();
        let out_len = if frames == 0 {
            0
        } else {
            frames + config.impulse.len() - 1
        };

        if dry.sample_rate() != config.impulse.sample_rate() {
            debug!(
                dry_rate = dry.sample_rate(),
                impulse_rate = config.impulse.sample_rate(),
                "impulse sample rate differs from source"
            );
        }

        let channels = (0..config.output_channels)
            .map(|c| {
                let source = dry.channel(source_channel(c, dry.channel_count()));
                let wet = convolve(source, &config.kernel(c));
                (0..out_len)
                    .map(|i| {
                        let dry_part = source.get(i).copied().unwrap_or(0.0) * config.dry_gain;
                        let wet_part = wet.get(i).copied().unwrap_or(0.0) * config.wet_gain;
                        dry_part + wet_part
                    })
                    .collect()
            })
            .collect();

        SampleBuffer::from_parts(channels, dry.sample_rate())
    }

    /// Build a live evaluator for `input_channels` source channels
    pub fn instantiate(&self, input_channels: usize, quantum: usize) -> LiveGraph {
        LiveGraph::new(&self.config, input_channels, quantum)
    }

    /// Compare live and offline renders over the first `probe_frames` frames
    ///
    /// # Errors
    /// `EquivalenceViolation` naming the first sample that differs by more
    /// than [`EQUIVALENCE_TOLERANCE`].
    pub fn check_equivalence(
        &self,
        dry: &SampleBuffer,
        probe_frames: usize,
        quantum: usize,
    ) -> Result<(), GraphError> {
        let frames = probe_frames.min(dry.frame_count());
        if frames == 0 {
            return Ok(());
        }
        let prefix: Vec<Vec<f32>> = dry.channels().iter().map(|ch| ch[..frames].to_vec()).collect();
        let prefix = SampleBuffer::from_parts(prefix, dry.sample_rate());

        let offline = self.render_offline(&prefix);
        let live = self.instantiate(prefix.channel_count(), quantum).render_all(&prefix, frames);
        compare_renders(&live, &offline, frames)
    }
}

/// First sample where `live` and `offline` differ by the tolerance or more
fn compare_renders(
    live: &[Vec<f32>],
    offline: &SampleBuffer,
    frames: usize,
) -> Result<(), GraphError> {
    for (channel, (live_ch, offline_ch)) in live.iter().zip(offline.channels()).enumerate() {
        for (frame, (a, b)) in live_ch.iter().zip(offline_ch).take(frames).enumerate() {
            let delta = (a - b).abs();
            if delta >= EQUIVALENCE_TOLERANCE || !delta.is_finite() {
                return Err(GraphError::EquivalenceViolation {
                    channel,
                    frame,
                    delta,
                });
            }
        }
    }
    Ok(())
}

// ============================================================================
// Live evaluation
// ============================================================================

/// Block-by-block evaluator of an [`EffectsConfig`]
///
/// Each call to [`process`](Self::process) consumes exactly one quantum
/// per input channel and produces one quantum per output channel.
pub struct LiveGraph {
    dry_gain: f32,
    wet_gain: f32,
    quantum: usize,
    input_channels: usize,
    convolvers: Vec<PartitionedConvolver>,
    wet: Vec<f32>,
}

impl LiveGraph {
    fn new(config: &EffectsConfig, input_channels: usize, quantum: usize) -> Self {
        let quantum = quantum.max(1);
        let convolvers = (0..config.output_channels)
            .map(|c| PartitionedConvolver::new(&config.kernel(c), quantum))
            .collect();
        Self {
            dry_gain: config.dry_gain,
            wet_gain: config.wet_gain,
            quantum,
            input_channels: input_channels.max(1),
            convolvers,
            wet: vec![0.0; quantum],
        }
    }

    pub fn quantum(&self) -> usize {
        self.quantum
    }

    pub fn output_channels(&self) -> usize {
        self.convolvers.len()
    }

    /// Render one quantum
    ///
    /// `input` holds one slice per source channel, `output` one vector per
    /// output channel; every slice must be `quantum()` long.
    pub fn process(&mut self, input: &[Vec<f32>], output: &mut [Vec<f32>]) {
        for (c, (convolver, out)) in self.convolvers.iter_mut().zip(output.iter_mut()).enumerate() {
            let source = &input[source_channel(c, self.input_channels.min(input.len()))];
            convolver.process_block(source, &mut self.wet);
            for ((o, &d), &w) in out.iter_mut().zip(source.iter()).zip(self.wet.iter()) {
                *o = d * self.dry_gain + w * self.wet_gain;
            }
        }
    }

    /// Clear convolution history
    pub fn reset(&mut self) {
        for convolver in self.convolvers.iter_mut() {
            convolver.reset();
        }
    }

    /// Stream `buffer` through the graph quantum by quantum
    ///
    /// Input past the end of the buffer is silence, so `total_frames`
    /// larger than the buffer renders the reverb tail.
    pub fn render_all(&mut self, buffer: &SampleBuffer, total_frames: usize) -> Vec<Vec<f32>> {
        let out_channels = self.output_channels();
        let mut rendered = vec![Vec::with_capacity(total_frames); out_channels];
        let mut input = vec![vec![0.0; self.quantum]; buffer.channel_count()];
        let mut output = vec![vec![0.0; self.quantum]; out_channels];

        let mut pos = 0;
        while pos < total_frames {
            for (ch, block) in input.iter_mut().enumerate() {
                let source = buffer.channel(ch);
                for (i, slot) in block.iter_mut().enumerate() {
                    *slot = source.get(pos + i).copied().unwrap_or(0.0);
                }
            }
            self.process(&input, &mut output);
            for (dst, src) in rendered.iter_mut().zip(&output) {
                dst.extend_from_slice(src);
            }
            pos += self.quantum;
        }

        for channel in rendered.iter_mut() {
            channel.truncate(total_frames);
        }
        rendered
    }
}
