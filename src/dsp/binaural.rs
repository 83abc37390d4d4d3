//! Binaural beat bed
//!
//! Two sine oscillators hard-panned left and right, `beat` Hz apart. The
//! bed is mixed after the panner, so it never moves with the 8D automation.
//! It starts muted; enabling it glides the gain up to the configured volume.

use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};

use crate::dsp::pan::smoothing_coefficient;

/// Left-ear carrier frequency (Hz)
pub const DEFAULT_BASE_FREQUENCY: f32 = 432.0;

/// Right-ear offset from the carrier (Hz)
pub const DEFAULT_BEAT_FREQUENCY: f32 = 4.0;

/// Default bed volume
pub const DEFAULT_BINAURAL_VOLUME: f32 = 0.05;

/// Gain time constant when toggling the bed on or off
pub const TOGGLE_SMOOTHING_SECS: f32 = 0.2;

/// Gain time constant when changing the volume while enabled
pub const VOLUME_SMOOTHING_SECS: f32 = 0.1;

/// Oscillator settings for the bed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinauralParams {
    pub base_frequency: f32,
    pub beat_frequency: f32,
    pub volume: f32,
}

impl Default for BinauralParams {
    fn default() -> Self {
        Self {
            base_frequency: DEFAULT_BASE_FREQUENCY,
            beat_frequency: DEFAULT_BEAT_FREQUENCY,
            volume: DEFAULT_BINAURAL_VOLUME,
        }
    }
}

/// Stereo binaural layer with smoothed gain
#[derive(Debug, Clone)]
pub struct BinauralBed {
    sample_rate: u32,
    left_freq: f64,
    right_freq: f64,
    left_phase: f64,
    right_phase: f64,
    enabled: bool,
    volume: f32,
    gain: f32,
    target: f32,
    coeff: f32,
}

impl BinauralBed {
    pub fn new(sample_rate: u32, params: BinauralParams) -> Self {
        Self {
            sample_rate,
            left_freq: params.base_frequency as f64,
            right_freq: (params.base_frequency + params.beat_frequency) as f64,
            left_phase: 0.0,
            right_phase: 0.0,
            enabled: false,
            volume: params.volume.clamp(0.0, 1.0),
            gain: 0.0,
            target: 0.0,
            coeff: smoothing_coefficient(TOGGLE_SMOOTHING_SECS, sample_rate),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Current (smoothed) gain
    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn frequencies(&self) -> (f32, f32) {
        (self.left_freq as f32, self.right_freq as f32)
    }

    /// Fade the bed in or out
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.target = if enabled { self.volume } else { 0.0 };
        self.coeff = smoothing_coefficient(TOGGLE_SMOOTHING_SECS, self.sample_rate);
    }

    /// Change the volume; audible immediately only while enabled
    pub fn set_volume(&mut self, volume: f32) {
        if !volume.is_finite() {
            return;
        }
        self.volume = volume.clamp(0.0, 1.0);
        if self.enabled {
            self.target = self.volume;
            self.coeff = smoothing_coefficient(VOLUME_SMOOTHING_SECS, self.sample_rate);
        }
    }

    /// True when the bed contributes nothing and can be skipped
    pub fn is_silent(&self) -> bool {
        self.target == 0.0 && self.gain.abs() < 1e-6
    }

    /// Add the bed into a stereo block
    pub fn mix_into(&mut self, left: &mut [f32], right: &mut [f32]) {
        if self.is_silent() {
            self.gain = 0.0;
            return;
        }
        let left_step = TAU * self.left_freq / self.sample_rate as f64;
        let right_step = TAU * self.right_freq / self.sample_rate as f64;

        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            self.gain += (self.target - self.gain) * self.coeff;
            *l += self.left_phase.sin() as f32 * self.gain;
            *r += self.right_phase.sin() as f32 * self.gain;
            self.left_phase = (self.left_phase + left_step) % TAU;
            self.right_phase = (self.right_phase + right_step) % TAU;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zero_crossings(samples: &[f32]) -> usize {
        samples
            .windows(2)
            .filter(|w| w[0] <= 0.0 && w[1] > 0.0)
            .count()
    }

    #[test]
    fn test_starts_muted() {
        let mut bed = BinauralBed::new(24000, BinauralParams::default());
        let mut left = vec![0.0; 256];
        let mut right = vec![0.0; 256];
        bed.mix_into(&mut left, &mut right);
        assert!(left.iter().chain(&right).all(|&s| s == 0.0));
    }

    #[test]
    fn test_beat_frequencies() {
        let sample_rate = 24000;
        let mut bed = BinauralBed::new(sample_rate, BinauralParams::default());
        bed.set_enabled(true);
        assert_eq!(bed.frequencies(), (432.0, 436.0));

        let mut left = vec![0.0; sample_rate as usize];
        let mut right = vec![0.0; sample_rate as usize];
        bed.mix_into(&mut left, &mut right);

        let l = zero_crossings(&left) as i64;
        let r = zero_crossings(&right) as i64;
        assert!((l - 432).abs() <= 1, "left {}", l);
        assert!((r - 436).abs() <= 1, "right {}", r);
    }

    #[test]
    fn test_gain_settles_at_volume() {
        let mut bed = BinauralBed::new(1000, BinauralParams::default());
        bed.set_enabled(true);
        let mut left = vec![0.0; 3000];
        let mut right = vec![0.0; 3000];
        bed.mix_into(&mut left, &mut right);
        assert!((bed.gain() - 0.05).abs() < 1e-4);
        let peak = left[2000..].iter().fold(0.0_f32, |m, s| m.max(s.abs()));
        assert!(peak <= 0.0501);
    }

    #[test]
    fn test_disable_fades_out() {
        let mut bed = BinauralBed::new(1000, BinauralParams::default());
        bed.set_enabled(true);
        let mut left = vec![0.0; 2000];
        let mut right = vec![0.0; 2000];
        bed.mix_into(&mut left, &mut right);

        bed.set_enabled(false);
        let mut left = vec![0.0; 200];
        let mut right = vec![0.0; 200];
        bed.mix_into(&mut left, &mut right);
        // One time constant (0.2 s) in: still fading, not cut
        assert!(bed.gain() > 0.01 && bed.gain() < 0.025);
    }

    #[test]
    fn test_volume_change_while_disabled_is_silent() {
        let mut bed = BinauralBed::new(1000, BinauralParams::default());
        bed.set_volume(0.5);
        assert!(bed.is_silent());
        bed.set_enabled(true);
        assert_eq!(bed.volume(), 0.5);
        bed.set_volume(4.0);
        assert_eq!(bed.volume(), 1.0);
    }
}
