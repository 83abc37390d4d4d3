//! 8D panning automation
//!
//! A repeating four-segment cycle moves the source 0 → -1 → 0 → +1 → 0.
//! Each segment holds its waypoint for `hold_secs`, then glides linearly to
//! the next waypoint over `transition_secs`.
//!
//! [`pan_at`] is a pure function of elapsed audio-clock time. The live
//! [`StereoPanner`] does not jump to the scheduled value; it approaches the
//! target with a one-pole smoother so parameter changes never click.

use std::f32::consts::FRAC_PI_2;

use serde::{Deserialize, Serialize};

use crate::error::{ReverieError, Result};

/// Default time each waypoint is held (seconds)
pub const DEFAULT_HOLD_SECS: f64 = 20.0;

/// Default glide time between waypoints (seconds)
pub const DEFAULT_TRANSITION_SECS: f64 = 5.0;

/// Default smoothing time constant for pan changes (seconds)
pub const DEFAULT_PAN_SMOOTHING_SECS: f32 = 0.1;

/// Pan positions visited in order; the cycle wraps back to the first
const WAYPOINTS: [f32; 5] = [0.0, -1.0, 0.0, 1.0, 0.0];

// ============================================================================
// Schedule
// ============================================================================

/// Timing of the panning cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PanAutomationParams {
    pub hold_secs: f64,
    pub transition_secs: f64,
}

impl Default for PanAutomationParams {
    fn default() -> Self {
        Self {
            hold_secs: DEFAULT_HOLD_SECS,
            transition_secs: DEFAULT_TRANSITION_SECS,
        }
    }
}

impl PanAutomationParams {
    pub fn new(hold_secs: f64, transition_secs: f64) -> Result<Self> {
        let params = Self {
            hold_secs,
            transition_secs,
        };
        params.validate()?;
        Ok(params)
    }

    /// Hold must be finite and non-negative, transition finite and positive
    pub fn validate(&self) -> Result<()> {
        if !self.hold_secs.is_finite() || self.hold_secs < 0.0 {
            return Err(ReverieError::InvalidConfig {
                reason: format!("pan hold must be >= 0, got {}", self.hold_secs),
            });
        }
        if !self.transition_secs.is_finite() || self.transition_secs <= 0.0 {
            return Err(ReverieError::InvalidConfig {
                reason: format!("pan transition must be > 0, got {}", self.transition_secs),
            });
        }
        Ok(())
    }

    /// Length of one hold-then-glide segment
    #[inline]
    pub fn segment_secs(&self) -> f64 {
        self.hold_secs + self.transition_secs
    }

    /// Length of a full 0 → -1 → 0 → +1 → 0 cycle
    #[inline]
    pub fn cycle_secs(&self) -> f64 {
        4.0 * self.segment_secs()
    }
}

/// Scheduled pan position after `elapsed_secs` of playback
///
/// Negative or non-finite elapsed time is treated as zero. The result is
/// always within [-1, 1].
///
/// # Example
/// ```
/// use reverie::dsp::pan::{pan_at, PanAutomationParams};
///
/// let params = PanAutomationParams::default();
/// assert_eq!(pan_at(0.0, &params), 0.0);
/// assert_eq!(pan_at(25.0, &params), -1.0);
/// assert_eq!(pan_at(22.5, &params), -0.5);
/// ```
pub fn pan_at(elapsed_secs: f64, params: &PanAutomationParams) -> f32 {
    let segment = params.segment_secs();
    let cycle = params.cycle_secs();
    if !(segment > 0.0) || !cycle.is_finite() {
        return 0.0;
    }

    let elapsed = if elapsed_secs.is_finite() {
        elapsed_secs.max(0.0)
    } else {
        0.0
    };
    let time_in_cycle = elapsed.rem_euclid(cycle);
    let index = ((time_in_cycle / segment) as usize).min(3);
    let within = time_in_cycle - index as f64 * segment;

    let from = WAYPOINTS[index];
    let to = WAYPOINTS[index + 1];
    let value = if within < params.hold_secs {
        from
    } else {
        let progress = ((within - params.hold_secs) / params.transition_secs).clamp(0.0, 1.0);
        from + (to - from) * progress as f32
    };

    value.clamp(-1.0, 1.0)
}

// ============================================================================
// Smoothed Panner
// ============================================================================

/// Per-sample coefficient of a one-pole smoother with time constant `tau`
///
/// Zero (or negative) `tau` snaps immediately.
#[inline]
pub fn smoothing_coefficient(tau_secs: f32, sample_rate: u32) -> f32 {
    if tau_secs <= 0.0 || sample_rate == 0 {
        1.0
    } else {
        1.0 - (-1.0 / (tau_secs * sample_rate as f32)).exp()
    }
}

/// Equal-power stereo panner with a smoothed position
#[derive(Debug, Clone)]
pub struct StereoPanner {
    current: f32,
    target: f32,
    coeff: f32,
}

impl StereoPanner {
    pub fn new(sample_rate: u32, smoothing_secs: f32) -> Self {
        Self {
            current: 0.0,
            target: 0.0,
            coeff: smoothing_coefficient(smoothing_secs, sample_rate),
        }
    }

    /// Set the position to approach; clamped to [-1, 1]
    pub fn set_target(&mut self, pan: f32) {
        if pan.is_finite() {
            self.target = pan.clamp(-1.0, 1.0);
        }
    }

    /// Jump straight to `pan` without smoothing
    pub fn snap_to(&mut self, pan: f32) {
        self.set_target(pan);
        self.current = self.target;
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    #[inline]
    fn advance(&mut self) -> f32 {
        self.current += (self.target - self.current) * self.coeff;
        self.current
    }

    /// Pan a block in place
    ///
    /// A single input channel is treated as mono and spread into both
    /// outputs; two channels use the stereo balance law. `channels` must
    /// hold two equally long vectors on return, so a mono block is widened.
    pub fn process(&mut self, channels: &mut Vec<Vec<f32>>) {
        match channels.len() {
            0 => {}
            1 => {
                let mono = std::mem::take(&mut channels[0]);
                let mut left = Vec::with_capacity(mono.len());
                let mut right = Vec::with_capacity(mono.len());
                for &sample in &mono {
                    let (l, r) = pan_mono(sample, self.advance());
                    left.push(l);
                    right.push(r);
                }
                channels[0] = left;
                channels.push(right);
            }
            _ => {
                let (left, rest) = channels.split_at_mut(1);
                for (l, r) in left[0].iter_mut().zip(rest[0].iter_mut()) {
                    let (nl, nr) = pan_stereo(*l, *r, self.advance());
                    *l = nl;
                    *r = nr;
                }
            }
        }
    }
}

/// Equal-power pan of a mono sample
#[inline]
pub fn pan_mono(input: f32, pan: f32) -> (f32, f32) {
    let x = (pan.clamp(-1.0, 1.0) + 1.0) * 0.5;
    let angle = x * FRAC_PI_2;
    (input * angle.cos(), input * angle.sin())
}

/// Equal-power balance of a stereo pair
///
/// Panning left folds part of the right channel into the left; panning
/// right does the opposite. At centre the pair passes through unchanged.
#[inline]
pub fn pan_stereo(left: f32, right: f32, pan: f32) -> (f32, f32) {
    let pan = pan.clamp(-1.0, 1.0);
    if pan <= 0.0 {
        let angle = (pan + 1.0) * FRAC_PI_2;
        (left + right * angle.cos(), right * angle.sin())
    } else {
        let angle = pan * FRAC_PI_2;
        (left * angle.cos(), right + left * angle.sin())
    }
}
