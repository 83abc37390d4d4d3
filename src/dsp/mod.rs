//! DSP Library
//!
//! Signal processing shared by live playback and offline export:
//! convolution reverb, panning automation, time stretch and the
//! binaural bed.

pub mod binaural;
pub mod convolution;
pub mod graph;
pub mod impulse;
pub mod pan;
pub mod stretch;

pub use binaural::{BinauralBed, BinauralParams};
pub use convolution::{convolve, PartitionedConvolver};
pub use graph::{
    apply, EffectsConfig, EffectsGraph, LiveGraph, DEFAULT_DRY_GAIN, DEFAULT_WET_GAIN,
    EQUIVALENCE_TOLERANCE, RENDER_QUANTUM,
};
pub use impulse::{synthesize, synthesize_with_rng, ImpulseResponse};
pub use pan::{pan_at, PanAutomationParams, StereoPanner};
pub use stretch::{next_rate, TimeStretcher};
