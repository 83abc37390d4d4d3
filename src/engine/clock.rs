//! Audio clock
//!
//! Playback time is read from the audio device, not the wall clock, so it
//! freezes while the device is suspended. `ManualClock` is a clock that
//! only moves when told to, for deterministic tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Source of audio-clock time
///
/// `suspend` and `resume` are idempotent.
pub trait Clock: Send {
    /// Seconds of audio rendered since the clock was created
    fn now(&self) -> f64;

    fn suspend(&mut self);

    fn resume(&mut self);

    fn is_running(&self) -> bool;
}

/// Frame counter shared between a device callback and its owner
///
/// Time is `frames / sample_rate`; the counter only advances while running.
#[derive(Debug, Clone)]
pub struct FrameClock {
    frames: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    sample_rate: u32,
}

impl FrameClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            frames: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(false)),
            sample_rate: sample_rate.max(1),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Record `frames` rendered; ignored while suspended
    pub fn add_frames(&self, frames: u64) {
        if self.running.load(Ordering::Acquire) {
            self.frames.fetch_add(frames, Ordering::AcqRel);
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }
}

impl Clock for FrameClock {
    fn now(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    fn suspend(&mut self) {
        self.running.store(false, Ordering::Release);
    }

    fn resume(&mut self) {
        self.running.store(true, Ordering::Release);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// A clock advanced by hand
///
/// # Example
/// ```
/// use reverie::engine::clock::{Clock, ManualClock};
///
/// let mut clock = ManualClock::new();
/// clock.advance(1.0); // suspended: no effect
/// clock.resume();
/// clock.advance(2.5);
/// assert_eq!(clock.now(), 2.5);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: f64,
    running: bool,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward if running; returns the seconds actually advanced
    pub fn advance(&mut self, secs: f64) -> f64 {
        if !self.running || !secs.is_finite() || secs <= 0.0 {
            return 0.0;
        }
        self.now += secs;
        secs
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.now
    }

    fn suspend(&mut self) {
        self.running = false;
    }

    fn resume(&mut self) {
        self.running = true;
    }

    fn is_running(&self) -> bool {
        self.running
    }
}
