//! Pitch-preserving time stretch (WSOLA)
//!
//! Output is assembled from Hann-windowed grains overlapped at half a
//! grain. Grains are taken from the source every `rate * hop` frames; each
//! grain's start is nudged within ±`tolerance` frames to the offset whose
//! opening best matches the natural continuation of the previous grain, so
//! waveforms line up and pitch is left alone.
//!
//! The stretcher owns the read position. Looping sources wrap by modulo;
//! a non-looping source ends once the read position passes its last frame.

use std::collections::VecDeque;
use std::f64::consts::PI;

use crate::engine::buffer::SampleBuffer;

/// Grain length in frames
pub const DEFAULT_GRAIN_LEN: usize = 1024;

/// Playback rates visited by [`next_rate`]
pub const RATE_STEPS: [f32; 3] = [1.0, 1.5, 2.0];

/// The next rate in the 1 → 1.5 → 2 → 1 cycle
///
/// Rates not in the cycle return to 1.
pub fn next_rate(current: f32) -> f32 {
    RATE_STEPS
        .iter()
        .position(|&r| (r - current).abs() < 1e-6)
        .map(|i| RATE_STEPS[(i + 1) % RATE_STEPS.len()])
        .unwrap_or(RATE_STEPS[0])
}

/// Result of one [`TimeStretcher::process`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StretchStatus {
    /// Frames of source material written; the rest of the block is silence
    pub frames_written: usize,
    /// The non-looping source has been fully consumed
    pub ended: bool,
}

pub struct TimeStretcher {
    grain_len: usize,
    hop: usize,
    tolerance: usize,
    window: Vec<f32>,
    rate: f64,
    /// Nominal source position of the next grain
    analysis_pos: f64,
    /// Actual start of the previous grain
    prev_start: i64,
    /// Second half of the previous windowed grain, per channel
    overlap: Vec<Vec<f32>>,
    pending: Vec<VecDeque<f32>>,
    ended: bool,
}

impl TimeStretcher {
    pub fn new(channels: usize, grain_len: usize) -> Self {
        let grain_len = (grain_len.max(4) / 2) * 2;
        let hop = grain_len / 2;
        let window = (0..grain_len)
            .map(|i| (0.5 - 0.5 * (2.0 * PI * i as f64 / grain_len as f64).cos()) as f32)
            .collect();
        let channels = channels.max(1);
        Self {
            grain_len,
            hop,
            tolerance: hop / 4,
            window,
            rate: 1.0,
            analysis_pos: 0.0,
            prev_start: -(hop as i64),
            overlap: vec![vec![0.0; hop]; channels],
            pending: vec![VecDeque::with_capacity(grain_len); channels],
            ended: false,
        }
    }

    pub fn grain_len(&self) -> usize {
        self.grain_len
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Change the rate; takes effect from the next grain
    pub fn set_rate(&mut self, rate: f64) {
        if rate.is_finite() && rate > 0.0 {
            self.rate = rate;
        }
    }

    /// Source frame the next grain will be read from
    pub fn position(&self) -> f64 {
        self.analysis_pos
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Allow grains again after the source ran out
    ///
    /// Used when looping is switched on after a non-looping end; the next
    /// grain wraps the read position back into the source.
    pub fn rearm(&mut self) {
        self.ended = false;
    }

    /// Restart at `frame`, discarding buffered output
    ///
    /// The first hop after a seek reproduces the source exactly.
    pub fn seek(&mut self, source: &SampleBuffer, frame: usize, looping: bool) {
        self.analysis_pos = frame as f64;
        self.prev_start = frame as i64 - self.hop as i64;
        self.ended = false;
        for queue in self.pending.iter_mut() {
            queue.clear();
        }
        // A virtual previous grain starting one hop earlier whose second
        // half covers [frame, frame + hop).
        for (ch, overlap) in self.overlap.iter_mut().enumerate() {
            for (i, slot) in overlap.iter_mut().enumerate() {
                *slot = read(source, ch, frame as i64 + i as i64, looping)
                    * self.window[self.hop + i];
            }
        }
    }

    /// Fill `output` with stretched audio
    ///
    /// `output` holds one equally long vector per source channel.
    pub fn process(
        &mut self,
        source: &SampleBuffer,
        looping: bool,
        output: &mut [Vec<f32>],
    ) -> StretchStatus {
        let frames = output.first().map(|ch| ch.len()).unwrap_or(0);
        let mut written = 0;

        while written < frames {
            if self.pending[0].is_empty() {
                if self.ended || !self.next_grain(source, looping) {
                    break;
                }
            }
            let available = self.pending[0].len().min(frames - written);
            for (queue, out) in self.pending.iter_mut().zip(output.iter_mut()) {
                let drained = queue.drain(..available);
                for (slot, sample) in out[written..written + available].iter_mut().zip(drained) {
                    *slot = sample;
                }
            }
            written += available;
        }

        for out in output.iter_mut() {
            out[written..].fill(0.0);
        }
        StretchStatus {
            frames_written: written,
            ended: self.ended && self.pending[0].is_empty(),
        }
    }

    /// Synthesize one hop of output; false once a non-looping source is exhausted
    fn next_grain(&mut self, source: &SampleBuffer, looping: bool) -> bool {
        let len = source.frame_count();
        if len == 0 {
            self.ended = true;
            return false;
        }
        if looping {
            let wrapped = self.analysis_pos.rem_euclid(len as f64);
            let shift = (self.analysis_pos - wrapped).round() as i64;
            self.analysis_pos = wrapped;
            self.prev_start -= shift;
        } else if self.analysis_pos >= len as f64 {
            self.ended = true;
            return false;
        }

        let nominal = self.analysis_pos.round() as i64;
        let start = nominal + self.best_offset(source, nominal, looping);

        for (ch, overlap) in self.overlap.iter_mut().enumerate() {
            let queue = &mut self.pending[ch];
            for i in 0..self.hop {
                let sample = read(source, ch, start + i as i64, looping) * self.window[i];
                queue.push_back(overlap[i] + sample);
            }
            for (i, slot) in overlap.iter_mut().enumerate() {
                let k = self.hop + i;
                *slot = read(source, ch, start + k as i64, looping) * self.window[k];
            }
        }

        self.prev_start = start;
        self.analysis_pos += self.rate * self.hop as f64;
        true
    }

    /// Offset within ±tolerance whose opening best matches the previous grain's continuation
    fn best_offset(&self, source: &SampleBuffer, nominal: i64, looping: bool) -> i64 {
        let natural = self.prev_start + self.hop as i64;
        if natural == nominal {
            return 0;
        }

        let target: Vec<f32> = (0..self.hop)
            .map(|i| mix(source, natural + i as i64, looping))
            .collect();
        let tolerance = self.tolerance as i64;

        let mut best = 0;
        let mut best_score = f64::NEG_INFINITY;
        for delta in std::iter::once(0).chain((1..=tolerance).flat_map(|d| [-d, d])) {
            let start = nominal + delta;
            if !looping && start < 0 {
                continue;
            }
            let mut dot = 0.0_f64;
            let mut energy = 0.0_f64;
            for (i, &t) in target.iter().enumerate() {
                let s = mix(source, start + i as i64, looping) as f64;
                dot += s * t as f64;
                energy += s * s;
            }
            let score = if energy > 0.0 { dot / energy.sqrt() } else { 0.0 };
            if score > best_score {
                best_score = score;
                best = delta;
            }
        }
        best
    }
}

#[inline]
fn read(source: &SampleBuffer, channel: usize, index: i64, looping: bool) -> f32 {
    let len = source.frame_count() as i64;
    if len == 0 {
        return 0.0;
    }
    let channel = channel.min(source.channel_count() - 1);
    let index = if looping {
        index.rem_euclid(len)
    } else if (0..len).contains(&index) {
        index
    } else {
        return 0.0;
    };
    source.channel(channel)[index as usize]
}

#[inline]
fn mix(source: &SampleBuffer, index: i64, looping: bool) -> f32 {
    (0..source.channel_count())
        .map(|ch| read(source, ch, index, looping))
        .sum()
}
