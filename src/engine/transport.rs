//! Playback State Machine for Reverie
//!
//! `PlaybackController` owns the retained buffer, the audio device and at
//! most one live session. Every operation is a guarded transition on a
//! closed phase enum: an operation that makes no sense in the current
//! phase is rejected with `EngineError::InvalidTransition` instead of being
//! guessed at.
//!
//! ```text
//!            begin_generate          complete_generate(Ok)
//!   Idle ───────────────▶ Generating ──────────────────▶ Playing ◀──▶ Paused
//!    ▲                        │ Err                        │   natural end
//!    │ reset                  ▼                            ▼   (no loop)
//!    └──────────────────── Error                         Ready
//! ```
//!
//! Stopping returns to `Idle` but keeps the buffer, so it can still be
//! replayed or downloaded without decoding again.

use std::fmt;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, info_span, warn, Span};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::dsp::binaural::BinauralParams;
use crate::dsp::graph::{EffectsConfig, EffectsGraph};
use crate::dsp::impulse::{synthesize, synthesize_with_rng, ImpulseResponse};
use crate::dsp::pan::{pan_at, PanAutomationParams};
use crate::dsp::stretch::next_rate;
use crate::engine::buffer::SampleBuffer;
use crate::engine::clock::Clock;
use crate::engine::device::AudioDevice;
use crate::engine::poll::CancellationToken;
use crate::engine::session::{lock_renderer, LiveRenderer, RenderOptions, SharedRenderer};
use crate::engine::wav::{self, Download};
use crate::error::{EngineError, Result};

/// Frames compared between live and offline renders before a debug-build download
pub const EQUIVALENCE_PROBE_FRAMES: usize = 4096;

// ============================================================================
// States
// ============================================================================

/// Observable playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    /// Nothing playing; a stopped buffer may still be retained
    #[default]
    Idle,
    /// Waiting for an external producer to deliver a buffer
    Generating,
    Playing,
    Paused,
    /// Played to the end without looping; the buffer is retained
    Ready,
    Error,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackState::Idle => write!(f, "Idle"),
            PlaybackState::Generating => write!(f, "Generating"),
            PlaybackState::Playing => write!(f, "Playing"),
            PlaybackState::Paused => write!(f, "Paused"),
            PlaybackState::Ready => write!(f, "Ready"),
            PlaybackState::Error => write!(f, "Error"),
        }
    }
}

/// One run of the live chain, from start until stop or natural end
pub struct PlaybackSession {
    id: Uuid,
    renderer: SharedRenderer,
    /// Device clock reading when the session started
    clock_origin: f64,
    token: CancellationToken,
    span: Span,
}

impl PlaybackSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn clock_origin(&self) -> f64 {
        self.clock_origin
    }
}

enum Phase {
    Idle,
    Generating,
    Playing(PlaybackSession),
    Paused(PlaybackSession),
    Ready,
    Error(String),
}

impl Phase {
    fn state(&self) -> PlaybackState {
        match self {
            Phase::Idle => PlaybackState::Idle,
            Phase::Generating => PlaybackState::Generating,
            Phase::Playing(_) => PlaybackState::Playing,
            Phase::Paused(_) => PlaybackState::Paused,
            Phase::Ready => PlaybackState::Ready,
            Phase::Error(_) => PlaybackState::Error,
        }
    }

    fn session(&self) -> Option<&PlaybackSession> {
        match self {
            Phase::Playing(session) | Phase::Paused(session) => Some(session),
            _ => None,
        }
    }
}

fn invalid(state: PlaybackState, action: &'static str) -> EngineError {
    EngineError::InvalidTransition {
        from: state.to_string(),
        action,
    }
}

// ============================================================================
// Controller
// ============================================================================

pub struct PlaybackController {
    phase: Phase,
    buffer: Option<SampleBuffer>,
    device: Box<dyn AudioDevice>,
    config: EngineConfig,
    pan: PanAutomationParams,
    looping: bool,
    rate: f32,
    binaural_enabled: bool,
    binaural_volume: f32,
    /// Reused for every session and download while the sample rate matches
    impulse: Option<ImpulseResponse>,
    impulse_seed: Option<u64>,
    ticks: u64,
}

impl PlaybackController {
    /// Create a controller driving `device`
    ///
    /// # Example
    /// ```
    /// use reverie::config::EngineConfig;
    /// use reverie::engine::device::ManualDevice;
    /// use reverie::engine::transport::{PlaybackController, PlaybackState};
    ///
    /// let device = ManualDevice::new(24000);
    /// let controller = PlaybackController::new(EngineConfig::default(), Box::new(device)).unwrap();
    /// assert_eq!(controller.state(), PlaybackState::Idle);
    /// ```
    pub fn new(config: EngineConfig, device: Box<dyn AudioDevice>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            phase: Phase::Idle,
            buffer: None,
            device,
            pan: config.pan.params(),
            looping: false,
            rate: 1.0,
            binaural_enabled: false,
            binaural_volume: config.binaural.volume,
            impulse: None,
            impulse_seed: None,
            ticks: 0,
            config,
        })
    }

    /// Synthesize impulses from a fixed seed instead of the thread RNG
    pub fn with_impulse_seed(mut self, seed: u64) -> Self {
        self.impulse_seed = Some(seed);
        self
    }

    // ========================================================================
    // Generation
    // ========================================================================

    /// Wait for an external producer (speech synthesis) to deliver audio
    ///
    /// Any retained buffer is dropped.
    pub fn begin_generate(&mut self) -> Result<()> {
        match self.state() {
            PlaybackState::Idle | PlaybackState::Ready | PlaybackState::Error => {
                self.buffer = None;
                self.phase = Phase::Generating;
                debug!("generation started");
                Ok(())
            }
            state => Err(invalid(state, "generate").into()),
        }
    }

    /// Deliver the producer's result
    ///
    /// A buffer starts playback immediately; a failure moves to `Error`.
    pub fn complete_generate<E: fmt::Display>(
        &mut self,
        outcome: std::result::Result<SampleBuffer, E>,
    ) -> Result<()> {
        let state = self.state();
        if state != PlaybackState::Generating {
            return Err(invalid(state, "complete generation").into());
        }
        match outcome {
            Ok(buffer) => {
                self.buffer = Some(buffer);
                self.start_session()
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(%reason, "generation failed");
                self.phase = Phase::Error(reason.clone());
                Err(EngineError::GenerationFailed { reason }.into())
            }
        }
    }

    // ========================================================================
    // Transport Controls
    // ========================================================================

    /// Replace the retained buffer and start playing it
    pub fn load(&mut self, buffer: SampleBuffer) -> Result<()> {
        let state = self.state();
        if state == PlaybackState::Generating {
            return Err(invalid(state, "load").into());
        }
        self.end_session("replaced");
        self.buffer = Some(buffer);
        self.start_session()
    }

    /// Start from the beginning, or continue if paused
    ///
    /// # Errors
    /// * `BufferNotLoaded` from `Idle` with nothing retained
    /// * `DeviceUnavailable` if the device fails to start (state becomes `Error`)
    pub fn play(&mut self) -> Result<()> {
        match self.state() {
            PlaybackState::Paused => self.resume(),
            PlaybackState::Playing => Ok(()),
            PlaybackState::Idle if self.buffer.is_none() => Err(EngineError::BufferNotLoaded.into()),
            PlaybackState::Idle | PlaybackState::Ready => self.start_session(),
            state => Err(invalid(state, "play").into()),
        }
    }

    /// Freeze playback and the audio clock; pausing twice is a no-op
    pub fn pause(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Playing(session) => {
                self.device.suspend();
                session
                    .span
                    .in_scope(|| debug!(at = self.device.now(), "paused"));
                self.phase = Phase::Paused(session);
                Ok(())
            }
            phase @ Phase::Paused(_) => {
                self.phase = phase;
                Ok(())
            }
            phase => {
                let state = phase.state();
                self.phase = phase;
                Err(invalid(state, "pause").into())
            }
        }
    }

    /// Continue from the frozen clock; resuming while playing is a no-op
    pub fn resume(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Paused(session) => {
                self.device.resume();
                session
                    .span
                    .in_scope(|| debug!(at = self.device.now(), "resumed"));
                self.phase = Phase::Playing(session);
                Ok(())
            }
            phase @ Phase::Playing(_) => {
                self.phase = phase;
                Ok(())
            }
            phase => {
                let state = phase.state();
                self.phase = phase;
                Err(invalid(state, "resume").into())
            }
        }
    }

    /// End the session and return to `Idle`, keeping the buffer
    ///
    /// Polling for the session is cancelled before this returns.
    pub fn stop(&mut self) -> Result<()> {
        match self.state() {
            PlaybackState::Playing | PlaybackState::Paused => {
                self.end_session("stopped");
                self.phase = Phase::Idle;
                Ok(())
            }
            PlaybackState::Idle | PlaybackState::Ready => {
                self.phase = Phase::Idle;
                Ok(())
            }
            state => Err(invalid(state, "stop").into()),
        }
    }

    /// Leave `Error` so generation or playback can be retried
    pub fn reset(&mut self) -> Result<()> {
        match self.state() {
            PlaybackState::Error | PlaybackState::Idle => {
                self.phase = Phase::Idle;
                Ok(())
            }
            state => Err(invalid(state, "reset").into()),
        }
    }

    /// Release the device and cancel polling
    pub fn teardown(&mut self) {
        self.end_session("teardown");
        self.phase = Phase::Idle;
        self.device.detach();
    }

    // ========================================================================
    // Session Parameters
    // ========================================================================

    /// Loop at the end of the buffer; applies to a running session at once
    pub fn set_loop(&mut self, looping: bool) {
        self.looping = looping;
        if let Some(session) = self.phase.session() {
            lock_renderer(&session.renderer).set_looping(looping);
        }
    }

    /// Change playback speed, keeping pitch
    ///
    /// # Errors
    /// * `InvalidRate` unless `rate` is positive and finite
    /// * `InvalidTransition` outside `Playing` / `Paused`
    pub fn set_rate(&mut self, rate: f32) -> Result<()> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(EngineError::InvalidRate { rate }.into());
        }
        let Some(session) = self.phase.session() else {
            return Err(invalid(self.state(), "set rate").into());
        };
        lock_renderer(&session.renderer).set_rate(rate);
        session.span.in_scope(|| debug!(rate, "rate changed"));
        self.rate = rate;
        Ok(())
    }

    /// Step the rate 1 → 1.5 → 2 → 1
    pub fn cycle_rate(&mut self) -> Result<f32> {
        let rate = next_rate(self.rate);
        self.set_rate(rate)?;
        Ok(rate)
    }

    /// Fade the binaural bed in or out
    pub fn set_binaural(&mut self, enabled: bool) {
        self.binaural_enabled = enabled;
        if let Some(session) = self.phase.session() {
            lock_renderer(&session.renderer).set_binaural(enabled);
        }
    }

    /// Set the binaural bed volume, clamped to [0, 1]
    pub fn set_binaural_volume(&mut self, volume: f32) {
        if !volume.is_finite() {
            return;
        }
        self.binaural_volume = volume.clamp(0.0, 1.0);
        if let Some(session) = self.phase.session() {
            lock_renderer(&session.renderer).set_binaural_volume(self.binaural_volume);
        }
    }

    // ========================================================================
    // Polling
    // ========================================================================

    /// Poll body: detect the end of playback and update the pan target
    ///
    /// Call on a fixed wall-clock interval while playing (see `PanPoller`).
    /// The pan position comes from the device clock, so it stands still
    /// while paused and is unaffected by the playback rate.
    pub fn tick(&mut self) -> PlaybackState {
        self.ticks += 1;

        let finished = match &self.phase {
            Phase::Playing(session) => {
                let elapsed = self.device.now() - session.clock_origin;
                let mut live = lock_renderer(&session.renderer);
                if live.is_finished() {
                    true
                } else {
                    live.set_pan_target(pan_at(elapsed, &self.pan));
                    false
                }
            }
            _ => false,
        };

        if finished {
            self.end_session("finished");
            self.phase = Phase::Ready;
        }
        self.state()
    }

    /// Token cancelled when the current session ends
    pub fn session_token(&self) -> Option<CancellationToken> {
        self.phase.session().map(|s| s.token.clone())
    }

    // ========================================================================
    // Export
    // ========================================================================

    /// Render the retained buffer through the effects offline and encode it
    ///
    /// Uses the same impulse as live playback. Pan automation and playback
    /// rate are not applied. Debug builds first check that the live and
    /// offline renders agree.
    pub fn download(&mut self) -> Result<Download> {
        let sample_rate = self
            .buffer
            .as_ref()
            .ok_or(EngineError::BufferNotLoaded)?
            .sample_rate();
        let graph = EffectsGraph::new(self.effects_for(sample_rate)?);
        let buffer = self.buffer.as_ref().ok_or(EngineError::BufferNotLoaded)?;

        #[cfg(debug_assertions)]
        graph.check_equivalence(buffer, EQUIVALENCE_PROBE_FRAMES, self.config.render_quantum)?;

        let rendered = graph.render_offline(buffer);
        let bytes = wav::encode(&rendered);
        info!(
            frames = rendered.frame_count(),
            channels = rendered.channel_count(),
            bytes = bytes.len(),
            "rendered download"
        );
        Ok(Download::wav(self.config.download_filename.clone(), bytes))
    }

    // ========================================================================
    // State Queries
    // ========================================================================

    pub fn state(&self) -> PlaybackState {
        self.phase.state()
    }

    /// Reason for the last failure while in `Error`
    pub fn error_reason(&self) -> Option<&str> {
        match &self.phase {
            Phase::Error(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn session(&self) -> Option<&PlaybackSession> {
        self.phase.session()
    }

    pub fn buffer(&self) -> Option<&SampleBuffer> {
        self.buffer.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn is_binaural_enabled(&self) -> bool {
        self.binaural_enabled
    }

    pub fn binaural_volume(&self) -> f32 {
        self.binaural_volume
    }

    /// Audio-clock seconds since the session started
    pub fn elapsed_secs(&self) -> Option<f64> {
        self.phase
            .session()
            .map(|s| self.device.now() - s.clock_origin)
    }

    /// Current source position in seconds
    pub fn position_secs(&self) -> Option<f64> {
        self.phase
            .session()
            .map(|s| lock_renderer(&s.renderer).position_secs())
    }

    /// Smoothed pan position of the live chain
    pub fn pan(&self) -> Option<f32> {
        self.phase
            .session()
            .map(|s| lock_renderer(&s.renderer).pan())
    }

    /// Pan position the live chain is moving towards
    pub fn pan_target(&self) -> Option<f32> {
        self.phase
            .session()
            .map(|s| lock_renderer(&s.renderer).pan_target())
    }

    /// Number of `tick()` calls so far
    pub fn tick_count(&self) -> u64 {
        self.ticks
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn effects_for(&mut self, sample_rate: u32) -> Result<EffectsConfig> {
        let effects = &self.config.effects;
        let impulse = match &self.impulse {
            Some(impulse) if impulse.sample_rate() == sample_rate => impulse.clone(),
            _ => {
                let impulse = match self.impulse_seed {
                    Some(seed) => synthesize_with_rng(
                        &mut StdRng::seed_from_u64(seed),
                        sample_rate,
                        effects.impulse_duration_secs,
                        effects.impulse_decay,
                    )?,
                    None => synthesize(
                        sample_rate,
                        effects.impulse_duration_secs,
                        effects.impulse_decay,
                    )?,
                };
                debug!(sample_rate, frames = impulse.len(), "synthesized impulse");
                self.impulse = Some(impulse.clone());
                impulse
            }
        };
        Ok(EffectsConfig::new(
            effects.dry_gain,
            effects.wet_gain,
            impulse,
            effects.output_channels,
        )?)
    }

    fn start_session(&mut self) -> Result<()> {
        let buffer = self.buffer.clone().ok_or(EngineError::BufferNotLoaded)?;
        let graph = EffectsGraph::new(self.effects_for(buffer.sample_rate())?);

        let options = RenderOptions {
            quantum: self.config.render_quantum,
            pan_smoothing_secs: self.config.pan.smoothing_secs,
            looping: self.looping,
            rate: self.rate,
            binaural: BinauralParams {
                volume: self.binaural_volume,
                ..self.config.binaural
            },
            binaural_enabled: self.binaural_enabled,
        };
        let frames = buffer.frame_count();
        let sample_rate = buffer.sample_rate();
        let renderer = LiveRenderer::new(buffer, &graph, options).into_shared();
        lock_renderer(&renderer).snap_pan(pan_at(0.0, &self.pan));

        if let Err(e) = self.device.attach(renderer.clone()) {
            warn!(error = %e, "audio device failed to start");
            self.phase = Phase::Error(e.to_string());
            return Err(e.into());
        }
        self.device.resume();

        let id = Uuid::new_v4();
        let span = info_span!("session", %id);
        span.in_scope(|| {
            info!(
                frames,
                sample_rate,
                looping = self.looping,
                rate = self.rate,
                "session started"
            )
        });
        self.phase = Phase::Playing(PlaybackSession {
            id,
            renderer,
            clock_origin: self.device.now(),
            token: CancellationToken::new(),
            span,
        });
        Ok(())
    }

    /// Cancel polling and release the device for the current session, if any
    fn end_session(&mut self, reason: &'static str) {
        let phase = std::mem::replace(&mut self.phase, Phase::Idle);
        match phase {
            Phase::Playing(session) | Phase::Paused(session) => {
                session.token.cancel();
                self.device.detach();
                session.span.in_scope(|| info!(reason, "session ended"));
            }
            other => self.phase = other,
        }
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.teardown();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::device::ManualDevice;
    use crate::error::ReverieError;

    const RATE: u32 = 8000;

    fn test_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.sample_rate = RATE;
        config.effects.impulse_duration_secs = 0.05;
        config.pan.hold_secs = 1.0;
        config.pan.transition_secs = 1.0;
        config
    }

    fn setup() -> (PlaybackController, ManualDevice) {
        let device = ManualDevice::new(RATE);
        let controller = PlaybackController::new(test_config(), Box::new(device.clone()))
            .unwrap()
            .with_impulse_seed(7);
        (controller, device)
    }

    fn tone(secs: f32) -> SampleBuffer {
        crate::engine::buffer::generate_test_tone(220.0, 0.5, secs, RATE)
    }

    fn assert_transition(result: Result<()>) {
        assert!(matches!(
            result,
            Err(ReverieError::Engine(EngineError::InvalidTransition { .. }))
        ));
    }

    #[test]
    fn test_initial_state() {
        let (controller, _) = setup();
        assert_eq!(controller.state(), PlaybackState::Idle);
        assert!(controller.buffer().is_none());
        assert_eq!(controller.rate(), 1.0);
        assert!(!controller.is_looping());
    }

    #[test]
    fn test_load_starts_playing() {
        let (mut controller, device) = setup();
        controller.load(tone(1.0)).unwrap();
        assert_eq!(controller.state(), PlaybackState::Playing);
        assert!(device.is_attached());
        assert!(controller.session().is_some());
    }

    #[test]
    fn test_play_without_buffer() {
        let (mut controller, _) = setup();
        let err = controller.play().unwrap_err();
        assert_eq!(err.error_code(), "BUFFER_NOT_LOADED");
    }

    #[test]
    fn test_pause_is_idempotent() {
        let (mut controller, device) = setup();
        controller.load(tone(2.0)).unwrap();
        device.advance(0.5);

        controller.pause().unwrap();
        let frozen = controller.elapsed_secs().unwrap();
        device.advance(0.5);
        controller.pause().unwrap();
        assert_eq!(controller.state(), PlaybackState::Paused);
        assert_eq!(controller.elapsed_secs().unwrap(), frozen);

        controller.resume().unwrap();
        device.advance(0.25);
        assert!((controller.elapsed_secs().unwrap() - (frozen + 0.25)).abs() < 1e-9);
    }

    #[test]
    fn test_resume_while_playing_is_noop() {
        let (mut controller, _) = setup();
        controller.load(tone(1.0)).unwrap();
        controller.resume().unwrap();
        assert_eq!(controller.state(), PlaybackState::Playing);
    }

    #[test]
    fn test_invalid_transitions() {
        let (mut controller, _) = setup();
        assert_transition(controller.pause());
        assert_transition(controller.resume());
        assert_transition(controller.set_rate(1.5));

        controller.begin_generate().unwrap();
        assert_transition(controller.load(tone(0.1)));
        assert_transition(controller.play());
        assert_transition(controller.begin_generate());
    }

    #[test]
    fn test_generation_success() {
        let (mut controller, _) = setup();
        controller.begin_generate().unwrap();
        assert_eq!(controller.state(), PlaybackState::Generating);
        controller
            .complete_generate::<String>(Ok(tone(0.5)))
            .unwrap();
        assert_eq!(controller.state(), PlaybackState::Playing);
    }

    #[test]
    fn test_generation_failure_and_reset() {
        let (mut controller, _) = setup();
        controller.begin_generate().unwrap();
        let err = controller
            .complete_generate::<&str>(Err("quota exceeded"))
            .unwrap_err();
        assert_eq!(err.error_code(), "GENERATION_FAILED");
        assert_eq!(controller.state(), PlaybackState::Error);
        assert_eq!(controller.error_reason(), Some("quota exceeded"));

        controller.reset().unwrap();
        assert_eq!(controller.state(), PlaybackState::Idle);
        controller.begin_generate().unwrap();
    }

    #[test]
    fn test_begin_generate_drops_retained_buffer() {
        let (mut controller, _) = setup();
        controller.load(tone(0.2)).unwrap();
        controller.stop().unwrap();
        assert!(controller.buffer().is_some());
        controller.begin_generate().unwrap();
        assert!(controller.buffer().is_none());
    }

    #[test]
    fn test_device_failure_moves_to_error() {
        let (mut controller, device) = setup();
        device.fail_next_attach("no output");
        let err = controller.load(tone(0.5)).unwrap_err();
        assert_eq!(err.error_code(), "DEVICE_UNAVAILABLE");
        assert_eq!(controller.state(), PlaybackState::Error);

        controller.reset().unwrap();
        controller.play().unwrap();
        assert_eq!(controller.state(), PlaybackState::Playing);
    }

    #[test]
    fn test_stop_retains_buffer() {
        let (mut controller, device) = setup();
        controller.load(tone(1.0)).unwrap();
        let token = controller.session_token().unwrap();
        controller.stop().unwrap();

        assert_eq!(controller.state(), PlaybackState::Idle);
        assert!(token.is_cancelled());
        assert!(!device.is_attached());
        assert!(controller.buffer().is_some());

        controller.play().unwrap();
        assert_eq!(controller.state(), PlaybackState::Playing);
        assert_eq!(device.attach_count(), 2);
    }

    #[test]
    fn test_natural_end_moves_to_ready() {
        let (mut controller, device) = setup();
        controller.load(tone(0.25)).unwrap();
        device.advance(0.2);
        assert_eq!(controller.tick(), PlaybackState::Playing);
        device.advance(0.2);
        assert_eq!(controller.tick(), PlaybackState::Ready);
        assert!(!device.is_attached());

        // Replay from the start
        controller.play().unwrap();
        assert_eq!(controller.position_secs(), Some(0.0));
    }

    #[test]
    fn test_loop_keeps_playing() {
        let (mut controller, device) = setup();
        controller.set_loop(true);
        controller.load(tone(0.25)).unwrap();
        let origin = controller.session().unwrap().clock_origin();
        for _ in 0..10 {
            device.advance(0.1);
            assert_eq!(controller.tick(), PlaybackState::Playing);
        }
        assert!(controller.position_secs().unwrap() < 0.25);
        assert_eq!(controller.session().unwrap().clock_origin(), origin);
    }

    #[test]
    fn test_enabling_loop_mid_session() {
        let (mut controller, device) = setup();
        controller.load(tone(0.25)).unwrap();
        device.advance(0.1);
        controller.set_loop(true);
        device.advance(0.5);
        assert_eq!(controller.tick(), PlaybackState::Playing);

        controller.set_loop(false);
        device.advance(0.5);
        assert_eq!(controller.tick(), PlaybackState::Ready);
    }

    #[test]
    fn test_set_rate_validation() {
        let (mut controller, _) = setup();
        controller.load(tone(1.0)).unwrap();
        for bad in [0.0, -1.0, f32::NAN, f32::INFINITY] {
            let err = controller.set_rate(bad).unwrap_err();
            assert_eq!(err.error_code(), "INVALID_RATE");
        }
        controller.set_rate(1.5).unwrap();
        assert_eq!(controller.rate(), 1.5);

        controller.pause().unwrap();
        controller.set_rate(0.75).unwrap();
        assert_eq!(controller.rate(), 0.75);
    }

    #[test]
    fn test_cycle_rate() {
        let (mut controller, _) = setup();
        controller.load(tone(1.0)).unwrap();
        assert_eq!(controller.cycle_rate().unwrap(), 1.5);
        assert_eq!(controller.cycle_rate().unwrap(), 2.0);
        assert_eq!(controller.cycle_rate().unwrap(), 1.0);
    }

    #[test]
    fn test_pan_follows_audio_clock() {
        let (mut controller, device) = setup();
        controller.set_loop(true);
        controller.load(tone(1.0)).unwrap();

        // hold 1 s, transition 1 s: halfway to -1 at 1.5 s
        device.advance(1.5);
        controller.tick();
        assert!((controller.pan_target().unwrap() + 0.5).abs() < 1e-6);

        // Paused time does not move the schedule
        controller.pause().unwrap();
        device.advance(10.0);
        controller.tick();
        assert!((controller.pan_target().unwrap() + 0.5).abs() < 1e-6);

        // Rate changes leave the time basis alone
        controller.resume().unwrap();
        controller.set_rate(2.0).unwrap();
        device.advance(0.5);
        controller.tick();
        assert!((controller.pan_target().unwrap() + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_download_requires_buffer() {
        let (mut controller, _) = setup();
        let err = controller.download().unwrap_err();
        assert_eq!(err.error_code(), "BUFFER_NOT_LOADED");
    }

    #[test]
    fn test_download_renders_effects() {
        let (mut controller, _) = setup();
        let buffer = tone(0.5);
        let frames = buffer.frame_count();
        controller.load(buffer).unwrap();
        controller.set_rate(2.0).unwrap();
        controller.stop().unwrap();

        let download = controller.download().unwrap();
        assert_eq!(download.filename, "Meditation.wav");
        assert_eq!(download.content_type, "audio/wav");

        // Stereo output including the 400-frame tail
        let expected_frames = frames + 400 - 1;
        assert_eq!(download.bytes.len(), 44 + expected_frames * 4);

        // Same impulse every time
        let again = controller.download().unwrap();
        assert_eq!(download.bytes, again.bytes);
    }

    #[test]
    fn test_binaural_settings_carry_into_session() {
        let (mut controller, _) = setup();
        controller.set_binaural(true);
        controller.set_binaural_volume(2.0);
        assert_eq!(controller.binaural_volume(), 1.0);
        controller.load(tone(0.5)).unwrap();
        assert!(controller.is_binaural_enabled());
    }

    #[test]
    fn test_teardown_releases_device() {
        let (mut controller, device) = setup();
        controller.load(tone(1.0)).unwrap();
        let token = controller.session_token().unwrap();
        drop(controller);
        assert!(token.is_cancelled());
        assert!(!device.is_attached());
    }
}
