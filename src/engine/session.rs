//! Live rendering for one playback session
//!
//! A `LiveRenderer` owns the per-session node chain:
//!
//! ```text
//! source ─▶ time stretch ─▶ effects graph ─▶ panner ─▶ (+ binaural bed) ─▶ device
//! ```
//!
//! It renders in fixed quanta and buffers the result so the device can pull
//! any number of frames. The renderer is shared with the device callback as
//! a [`SharedRenderer`]; a new session always builds a new renderer.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::dsp::binaural::{BinauralBed, BinauralParams};
use crate::dsp::graph::{EffectsGraph, LiveGraph, RENDER_QUANTUM};
use crate::dsp::pan::{StereoPanner, DEFAULT_PAN_SMOOTHING_SECS};
use crate::dsp::stretch::{TimeStretcher, DEFAULT_GRAIN_LEN};
use crate::engine::buffer::SampleBuffer;

/// Output channel count of the live chain
pub const LIVE_OUTPUT_CHANNELS: usize = 2;

/// Renderer shared between the controller and the device callback
pub type SharedRenderer = Arc<Mutex<LiveRenderer>>;

/// Lock a shared renderer, recovering from a poisoned lock
pub fn lock_renderer(renderer: &SharedRenderer) -> MutexGuard<'_, LiveRenderer> {
    renderer.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-session settings for [`LiveRenderer::new`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderOptions {
    pub quantum: usize,
    pub pan_smoothing_secs: f32,
    pub looping: bool,
    pub rate: f32,
    pub binaural: BinauralParams,
    pub binaural_enabled: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            quantum: RENDER_QUANTUM,
            pan_smoothing_secs: DEFAULT_PAN_SMOOTHING_SECS,
            looping: false,
            rate: 1.0,
            binaural: BinauralParams::default(),
            binaural_enabled: false,
        }
    }
}

pub struct LiveRenderer {
    source: SampleBuffer,
    quantum: usize,
    playhead: usize,
    looping: bool,
    rate: f32,
    stretcher: TimeStretcher,
    graph: LiveGraph,
    panner: StereoPanner,
    binaural: BinauralBed,
    ended: bool,
    loops: u64,
    frames_rendered: u64,
    input: Vec<Vec<f32>>,
    wet: Vec<Vec<f32>>,
    fifo: [VecDeque<f32>; LIVE_OUTPUT_CHANNELS],
}

impl LiveRenderer {
    pub fn new(source: SampleBuffer, graph: &EffectsGraph, options: RenderOptions) -> Self {
        let quantum = options.quantum.max(1);
        let channels = source.channel_count();
        let sample_rate = source.sample_rate();

        let mut stretcher = TimeStretcher::new(channels, DEFAULT_GRAIN_LEN);
        stretcher.set_rate(options.rate as f64);
        if options.rate != 1.0 {
            stretcher.seek(&source, 0, options.looping);
        }

        let mut binaural = BinauralBed::new(sample_rate, options.binaural);
        if options.binaural_enabled {
            binaural.set_enabled(true);
        }

        let live_graph = graph.instantiate(channels, quantum);
        let wet = vec![vec![0.0; quantum]; live_graph.output_channels()];

        Self {
            quantum,
            playhead: 0,
            looping: options.looping,
            rate: options.rate,
            stretcher,
            graph: live_graph,
            panner: StereoPanner::new(sample_rate, options.pan_smoothing_secs),
            binaural,
            ended: false,
            loops: 0,
            frames_rendered: 0,
            input: vec![vec![0.0; quantum]; channels],
            wet,
            fifo: [
                VecDeque::with_capacity(quantum * 2),
                VecDeque::with_capacity(quantum * 2),
            ],
            source,
        }
    }

    /// Wrap in the shared handle the device expects
    pub fn into_shared(self) -> SharedRenderer {
        Arc::new(Mutex::new(self))
    }

    pub fn sample_rate(&self) -> u32 {
        self.source.sample_rate()
    }

    pub fn source(&self) -> &SampleBuffer {
        &self.source
    }

    /// Current source position in seconds
    pub fn position_secs(&self) -> f64 {
        let frame = if self.rate == 1.0 {
            self.playhead as f64
        } else {
            self.stretcher.position()
        };
        frame / self.source.sample_rate() as f64
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    /// Takes effect from the next rendered quantum
    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
        if looping {
            self.ended = false;
            self.stretcher.rearm();
        }
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    /// Change playback speed without changing pitch
    ///
    /// Rate 1 reads the source directly; any other rate goes through the
    /// time stretcher, which picks up from the current position.
    pub fn set_rate(&mut self, rate: f32) {
        if !rate.is_finite() || rate <= 0.0 || rate == self.rate {
            return;
        }
        if self.rate == 1.0 {
            self.stretcher.seek(&self.source, self.playhead, self.looping);
        } else if rate == 1.0 {
            let len = self.source.frame_count();
            let frame = self.stretcher.position().round().max(0.0) as usize;
            self.playhead = if self.looping && len > 0 {
                frame % len
            } else {
                frame.min(len)
            };
        }
        self.stretcher.set_rate(rate as f64);
        debug!(from = self.rate, to = rate, "live rate changed");
        self.rate = rate;
    }

    pub fn set_pan_target(&mut self, pan: f32) {
        self.panner.set_target(pan);
    }

    pub fn snap_pan(&mut self, pan: f32) {
        self.panner.snap_to(pan);
    }

    pub fn pan(&self) -> f32 {
        self.panner.current()
    }

    pub fn pan_target(&self) -> f32 {
        self.panner.target()
    }

    pub fn set_binaural(&mut self, enabled: bool) {
        self.binaural.set_enabled(enabled);
    }

    pub fn set_binaural_volume(&mut self, volume: f32) {
        self.binaural.set_volume(volume);
    }

    pub fn binaural(&self) -> &BinauralBed {
        &self.binaural
    }

    /// The non-looping source has been consumed and all output delivered
    pub fn is_finished(&self) -> bool {
        self.ended && self.fifo[0].is_empty()
    }

    /// Times playback wrapped back to the start
    pub fn loop_count(&self) -> u64 {
        self.loops
    }

    /// Frames delivered to the device
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Fill two output channels
    pub fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        let frames = left.len().min(right.len());
        let mut written = 0;
        while written < frames {
            if self.fifo[0].is_empty() {
                if self.ended {
                    break;
                }
                self.render_quantum();
            }
            let available = self.fifo[0].len().min(frames - written);
            for (queue, out) in self.fifo.iter_mut().zip([&mut *left, &mut *right]) {
                for (slot, sample) in out[written..written + available]
                    .iter_mut()
                    .zip(queue.drain(..available))
                {
                    *slot = sample;
                }
            }
            written += available;
        }
        left[written..].fill(0.0);
        right[written..].fill(0.0);
        self.frames_rendered += written as u64;
    }

    /// Fill an interleaved device buffer with `channels` channels
    ///
    /// Mono devices get the average of left and right; channels past the
    /// second are silent.
    pub fn render_interleaved(&mut self, data: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let frames = data.len() / channels;
        let mut left = vec![0.0; frames];
        let mut right = vec![0.0; frames];
        self.render(&mut left, &mut right);
        for (i, frame) in data.chunks_exact_mut(channels).enumerate() {
            if channels == 1 {
                frame[0] = 0.5 * (left[i] + right[i]);
                continue;
            }
            frame[0] = left[i];
            frame[1] = right[i];
            frame[2..].fill(0.0);
        }
    }

    fn render_quantum(&mut self) {
        if self.rate == 1.0 {
            self.read_direct();
        } else {
            let status = self
                .stretcher
                .process(&self.source, self.looping, &mut self.input);
            if status.ended {
                self.ended = true;
            }
        }

        self.graph.process(&self.input, &mut self.wet);

        let mut stereo = self.wet.clone();
        self.panner.process(&mut stereo);
        if let [left, right] = stereo.as_mut_slice() {
            self.binaural.mix_into(left, right);
        }

        for (queue, channel) in self.fifo.iter_mut().zip(&stereo) {
            queue.extend(channel.iter().copied());
        }
    }

    fn read_direct(&mut self) {
        let len = self.source.frame_count();
        let mut written = 0;
        while written < self.quantum {
            if self.playhead >= len {
                if self.looping && len > 0 {
                    self.playhead = 0;
                    self.loops += 1;
                    debug!(loops = self.loops, "source wrapped");
                } else {
                    break;
                }
            }
            let take = (len - self.playhead).min(self.quantum - written);
            for (dst, src) in self.input.iter_mut().zip(self.source.channels()) {
                dst[written..written + take]
                    .copy_from_slice(&src[self.playhead..self.playhead + take]);
            }
            self.playhead += take;
            written += take;
        }
        for dst in self.input.iter_mut() {
            dst[written..].fill(0.0);
        }
        if len == 0 || (!self.looping && self.playhead >= len) {
            self.ended = true;
        }
    }
}
