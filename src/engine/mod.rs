//! Audio Engine Module
//!
//! Everything between the speech service and the speakers:
//! - Sample buffers and PCM decoding
//! - WAV encoding for downloads
//! - Audio clocks and output devices
//! - The live renderer and the playback state machine
//! - Pan schedule polling

pub mod buffer;
pub mod clock;
pub mod device;
pub mod pcm;
pub mod poll;
pub mod session;
pub mod transport;
pub mod wav;

pub use buffer::{generate_test_tone, SampleBuffer, SPEECH_CHANNELS, SPEECH_SAMPLE_RATE};
pub use clock::{Clock, FrameClock, ManualClock};
pub use device::{AudioDevice, ManualDevice};
pub use pcm::{decode, decode_base64};
pub use poll::{CancellationToken, PanPoller, SharedController};
pub use session::{LiveRenderer, RenderOptions, SharedRenderer};
pub use transport::{PlaybackController, PlaybackSession, PlaybackState};
pub use wav::Download;

#[cfg(feature = "device")]
pub use device::CpalDevice;
