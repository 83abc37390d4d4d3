//! Reverie - Speech Audio Pipeline
//!
//! Turns synthesized speech into an ambient listening experience:
//! 1. Decode the speech service's base64 16-bit PCM into sample buffers
//! 2. Play it through a convolution reverb with slow 8D stereo panning,
//!    optional binaural bed, looping and pitch-preserving speed changes
//! 3. Render the same effects offline and export a 16-bit PCM WAV
//!
//! # Architecture
//!
//! - [`dsp`]: pure signal processing (impulse synthesis, convolution,
//!   the effects graph, pan automation, time stretching, binaural tones)
//! - [`engine`]: buffers, codecs, devices and the playback state machine
//! - [`config`]: serde configuration for every tunable
//!
//! The live and offline paths share one [`dsp::EffectsGraph`], so the
//! downloaded file matches what was heard at centre pan.

pub mod cli;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;

pub use config::EngineConfig;
pub use error::{ReverieError, Result};
