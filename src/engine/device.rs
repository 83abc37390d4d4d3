//! Audio output devices
//!
//! An [`AudioDevice`] pulls frames from an attached [`SharedRenderer`] and
//! doubles as the session's [`Clock`]. Two implementations:
//!
//! - [`ManualDevice`]: renders only when [`ManualDevice::advance`] is
//!   called and keeps everything it rendered. Used by tests and the CLI's
//!   offline paths.
//! - `CpalDevice` (feature `device`): the default system output.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::engine::clock::{Clock, ManualClock};
use crate::engine::session::{lock_renderer, SharedRenderer, LIVE_OUTPUT_CHANNELS};
use crate::error::EngineError;

/// Output device driven by a renderer
pub trait AudioDevice: Clock {
    /// Start pulling audio from `renderer`, replacing any previous one
    fn attach(&mut self, renderer: SharedRenderer) -> Result<(), EngineError>;

    /// Release the output stream and drop the renderer
    fn detach(&mut self);

    fn is_attached(&self) -> bool;
}

// ============================================================================
// Manual Device
// ============================================================================

#[derive(Default)]
struct ManualState {
    clock: ManualClock,
    renderer: Option<SharedRenderer>,
    captured: [Vec<f32>; LIVE_OUTPUT_CHANNELS],
    sample_rate: u32,
    /// Fractional frame carried between `advance` calls
    remainder: f64,
    fail_attach: Option<String>,
    attach_count: usize,
}

/// A device whose clock and rendering are advanced by hand
///
/// Clones share the same state, so a test can keep one handle while the
/// controller owns another.
///
/// # Example
/// ```
/// use reverie::engine::clock::Clock;
/// use reverie::engine::device::ManualDevice;
///
/// let mut device = ManualDevice::new(24000);
/// device.resume();
/// device.advance(0.5);
/// assert_eq!(device.now(), 0.5);
/// ```
#[derive(Clone)]
pub struct ManualDevice {
    state: Arc<Mutex<ManualState>>,
}

impl ManualDevice {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(ManualState {
                sample_rate: sample_rate.max(1),
                ..ManualState::default()
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Advance the clock and render the matching number of frames
    ///
    /// Nothing happens while suspended. Returns the frames rendered.
    pub fn advance(&self, secs: f64) -> usize {
        let mut state = self.state();
        let advanced = state.clock.advance(secs);
        if advanced <= 0.0 {
            return 0;
        }

        let exact = advanced * state.sample_rate as f64 + state.remainder;
        let frames = exact.floor() as usize;
        state.remainder = exact - frames as f64;

        let Some(renderer) = state.renderer.clone() else {
            return 0;
        };
        let mut left = vec![0.0; frames];
        let mut right = vec![0.0; frames];
        lock_renderer(&renderer).render(&mut left, &mut right);
        state.captured[0].extend_from_slice(&left);
        state.captured[1].extend_from_slice(&right);
        frames
    }

    /// Everything rendered so far, per output channel
    pub fn captured(&self) -> [Vec<f32>; LIVE_OUTPUT_CHANNELS] {
        self.state().captured.clone()
    }

    pub fn clear_captured(&self) {
        let mut state = self.state();
        for channel in state.captured.iter_mut() {
            channel.clear();
        }
    }

    /// Make the next `attach` fail with `DeviceUnavailable`
    pub fn fail_next_attach(&self, reason: impl Into<String>) {
        self.state().fail_attach = Some(reason.into());
    }

    /// Number of successful attaches
    pub fn attach_count(&self) -> usize {
        self.state().attach_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.state().sample_rate
    }
}

impl Clock for ManualDevice {
    fn now(&self) -> f64 {
        self.state().clock.now()
    }

    fn suspend(&mut self) {
        self.state().clock.suspend();
    }

    fn resume(&mut self) {
        self.state().clock.resume();
    }

    fn is_running(&self) -> bool {
        self.state().clock.is_running()
    }
}

impl AudioDevice for ManualDevice {
    fn attach(&mut self, renderer: SharedRenderer) -> Result<(), EngineError> {
        let mut state = self.state();
        if let Some(reason) = state.fail_attach.take() {
            warn!(%reason, "manual device refused attach");
            return Err(EngineError::DeviceUnavailable { reason });
        }
        state.renderer = Some(renderer);
        state.remainder = 0.0;
        state.attach_count += 1;
        debug!("manual device attached");
        Ok(())
    }

    fn detach(&mut self) {
        let mut state = self.state();
        state.renderer = None;
        state.clock.suspend();
    }

    fn is_attached(&self) -> bool {
        self.state().renderer.is_some()
    }
}

// ============================================================================
// Cpal Device
// ============================================================================

#[cfg(feature = "device")]
pub use self::cpal_device::CpalDevice;

#[cfg(feature = "device")]
mod cpal_device {
    use std::thread::{self, JoinHandle};

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
    use tracing::{debug, info, warn};

    use super::AudioDevice;
    use crate::engine::clock::{Clock, FrameClock};
    use crate::engine::session::SharedRenderer;
    use crate::error::EngineError;

    enum StreamCommand {
        Play,
        Pause,
        Shutdown,
    }

    /// The default system output
    ///
    /// The cpal stream lives on its own thread and is driven by commands,
    /// so the device itself can be moved between threads. The clock counts
    /// frames handed to the hardware.
    pub struct CpalDevice {
        sample_rate: u32,
        clock: FrameClock,
        commands: Option<Sender<StreamCommand>>,
        worker: Option<JoinHandle<()>>,
    }

    impl CpalDevice {
        /// Prepare a device that will open the default output at `sample_rate`
        pub fn new(sample_rate: u32) -> Self {
            Self {
                sample_rate,
                clock: FrameClock::new(sample_rate),
                commands: None,
                worker: None,
            }
        }

        fn send(&self, command: StreamCommand) {
            if let Some(commands) = &self.commands {
                if commands.send(command).is_err() {
                    warn!("audio stream thread has exited");
                }
            }
        }
    }

    fn open_stream(
        sample_rate: u32,
        renderer: SharedRenderer,
        clock: FrameClock,
    ) -> Result<cpal::Stream, EngineError> {
        let unavailable = |reason: String| EngineError::DeviceUnavailable { reason };

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| unavailable("no output device".to_string()))?;

        let range = device
            .supported_output_configs()
            .map_err(|e| unavailable(e.to_string()))?
            .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
            .find(|c| {
                c.min_sample_rate().0 <= sample_rate && c.max_sample_rate().0 >= sample_rate
            })
            .ok_or_else(|| unavailable(format!("no f32 output at {} Hz", sample_rate)))?;
        let config: cpal::StreamConfig = range.with_sample_rate(cpal::SampleRate(sample_rate)).into();
        let channels = config.channels as usize;

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if !clock.is_running() {
                        data.fill(0.0);
                        return;
                    }
                    // Never block the audio thread on the controller
                    match renderer.try_lock() {
                        Ok(mut live) => {
                            live.render_interleaved(data, channels);
                            clock.add_frames((data.len() / channels.max(1)) as u64);
                        }
                        Err(_) => data.fill(0.0),
                    }
                },
                |e| warn!(error = %e, "audio stream error"),
                None,
            )
            .map_err(|e| unavailable(e.to_string()))?;

        info!(
            device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
            sample_rate,
            channels,
            "opened output stream"
        );
        Ok(stream)
    }

    fn run_stream(stream: cpal::Stream, commands: Receiver<StreamCommand>) {
        for command in commands.iter() {
            let result = match command {
                StreamCommand::Play => stream.play().map_err(|e| e.to_string()),
                StreamCommand::Pause => stream.pause().map_err(|e| e.to_string()),
                StreamCommand::Shutdown => break,
            };
            if let Err(e) = result {
                warn!(error = %e, "audio stream command failed");
            }
        }
        debug!("audio stream closed");
    }

    impl Clock for CpalDevice {
        fn now(&self) -> f64 {
            self.clock.now()
        }

        fn suspend(&mut self) {
            self.clock.suspend();
            self.send(StreamCommand::Pause);
        }

        fn resume(&mut self) {
            self.clock.resume();
            self.send(StreamCommand::Play);
        }

        fn is_running(&self) -> bool {
            self.clock.is_running()
        }
    }

    impl AudioDevice for CpalDevice {
        fn attach(&mut self, renderer: SharedRenderer) -> Result<(), EngineError> {
            self.detach();

            let (command_tx, command_rx) = unbounded();
            let (ready_tx, ready_rx) = bounded(1);
            let sample_rate = self.sample_rate;
            let clock = self.clock.clone();

            let worker = thread::Builder::new()
                .name("reverie-audio".to_string())
                .spawn(move || match open_stream(sample_rate, renderer, clock) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        run_stream(stream, command_rx);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                })
                .map_err(|e| EngineError::DeviceUnavailable {
                    reason: e.to_string(),
                })?;

            let opened = ready_rx.recv().unwrap_or_else(|_| {
                Err(EngineError::DeviceUnavailable {
                    reason: "audio thread exited during startup".to_string(),
                })
            });
            match opened {
                Ok(()) => {
                    self.commands = Some(command_tx);
                    self.worker = Some(worker);
                    Ok(())
                }
                Err(e) => {
                    let _ = worker.join();
                    Err(e)
                }
            }
        }

        fn detach(&mut self) {
            self.clock.suspend();
            self.send(StreamCommand::Shutdown);
            self.commands = None;
            if let Some(worker) = self.worker.take() {
                if worker.join().is_err() {
                    warn!("audio stream thread panicked");
                }
            }
        }

        fn is_attached(&self) -> bool {
            self.worker.is_some()
        }
    }

    impl Drop for CpalDevice {
        fn drop(&mut self) {
            self.detach();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::graph::{EffectsConfig, EffectsGraph};
    use crate::dsp::impulse::synthesize_with_rng;
    use crate::engine::buffer::SampleBuffer;
    use crate::engine::session::{LiveRenderer, RenderOptions};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn renderer() -> SharedRenderer {
        let mut rng = StdRng::seed_from_u64(4);
        let impulse = synthesize_with_rng(&mut rng, 1000, 0.01, 2.0).unwrap();
        let graph = EffectsGraph::new(EffectsConfig::with_defaults(impulse));
        let source = SampleBuffer::from_channels(vec![vec![0.5; 1000]], 1000).unwrap();
        LiveRenderer::new(source, &graph, RenderOptions::default()).into_shared()
    }

    #[test]
    fn test_advance_renders_only_while_running() {
        let mut device = ManualDevice::new(1000);
        device.attach(renderer()).unwrap();

        assert_eq!(device.advance(0.1), 0);
        device.resume();
        assert_eq!(device.advance(0.1), 100);
        assert_eq!(device.captured()[0].len(), 100);

        device.suspend();
        assert_eq!(device.advance(0.1), 0);
        assert_eq!(device.now(), 0.1);
    }

    #[test]
    fn test_fractional_frames_accumulate() {
        let mut device = ManualDevice::new(4);
        device.attach(renderer()).unwrap();
        device.resume();
        let total: usize = (0..4).map(|_| device.advance(0.0625)).sum();
        assert_eq!(total, 1);
    }

    #[test]
    fn test_clones_share_state() {
        let mut device = ManualDevice::new(1000);
        let handle = device.clone();
        device.attach(renderer()).unwrap();
        device.resume();
        handle.advance(0.05);
        assert_eq!(device.captured()[1].len(), 50);
        assert!(handle.is_attached());

        device.detach();
        assert!(!handle.is_attached());
        assert!(!handle.is_running());
    }

    #[test]
    fn test_forced_attach_failure() {
        let mut device = ManualDevice::new(1000);
        device.fail_next_attach("unplugged");
        let err = device.attach(renderer()).unwrap_err();
        assert!(matches!(err, EngineError::DeviceUnavailable { .. }));
        assert!(device.attach(renderer()).is_ok());
        assert_eq!(device.attach_count(), 1);
    }
}
