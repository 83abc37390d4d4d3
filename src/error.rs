//! Error handling for Reverie
//!
//! Each pipeline stage has its own error enum; `ReverieError` wraps them
//! for callers that only want a single type.

use thiserror::Error;

/// Result type alias for Reverie operations
pub type Result<T> = std::result::Result<T, ReverieError>;

/// Errors raised while turning transport bytes into samples
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("PCM input is empty")]
    EmptyInput,

    /// Not fatal: reported alongside a successfully decoded buffer.
    #[error("Dropped {dropped_bytes} trailing byte(s) that did not form a complete frame")]
    TruncatedFrame { dropped_bytes: usize },

    #[error("Invalid base64 payload: {reason}")]
    InvalidBase64 { reason: String },

    #[error("Sample rate must be positive")]
    InvalidSampleRate,

    #[error("Channel count must be positive")]
    InvalidChannelCount,
}

/// Errors raised by the playback controller and audio device
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Audio device unavailable: {reason}")]
    DeviceUnavailable { reason: String },

    #[error("No audio buffer loaded")]
    BufferNotLoaded,

    #[error("Cannot {action} while {from}")]
    InvalidTransition { from: String, action: &'static str },

    #[error("Playback rate must be positive and finite, got {rate}")]
    InvalidRate { rate: f32 },

    #[error("Audio generation failed: {reason}")]
    GenerationFailed { reason: String },
}

/// Errors raised while building or checking the effects graph
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Live and offline renders differ by {delta:e} at channel {channel}, frame {frame}")]
    EquivalenceViolation {
        channel: usize,
        frame: usize,
        delta: f32,
    },

    #[error("Invalid {param} gain {value} (expected 0.0 to 1.0)")]
    InvalidGain { param: &'static str, value: f32 },

    #[error("Invalid impulse response: {reason}")]
    InvalidImpulse { reason: String },

    #[error("Unsupported channel count {count} (expected 1 or 2)")]
    ChannelMismatch { count: usize },
}

/// Errors raised when constructing a sample buffer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("Channel {channel} has {actual} frames, expected {expected}")]
    ChannelLengthMismatch {
        channel: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Sample buffer needs at least one channel")]
    NoChannels,

    #[error("Sample rate must be positive")]
    InvalidSampleRate,
}

/// Top-level error type for Reverie operations
#[derive(Error, Debug)]
pub enum ReverieError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error("Unsupported audio format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ReverieError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            ReverieError::Decode(DecodeError::EmptyInput) => "EMPTY_INPUT",
            ReverieError::Decode(DecodeError::TruncatedFrame { .. }) => "TRUNCATED_FRAME",
            ReverieError::Decode(DecodeError::InvalidBase64 { .. }) => "INVALID_BASE64",
            ReverieError::Decode(_) => "INVALID_PCM_PARAMS",
            ReverieError::Engine(EngineError::DeviceUnavailable { .. }) => "DEVICE_UNAVAILABLE",
            ReverieError::Engine(EngineError::BufferNotLoaded) => "BUFFER_NOT_LOADED",
            ReverieError::Engine(EngineError::InvalidTransition { .. }) => "INVALID_TRANSITION",
            ReverieError::Engine(EngineError::InvalidRate { .. }) => "INVALID_RATE",
            ReverieError::Engine(EngineError::GenerationFailed { .. }) => "GENERATION_FAILED",
            ReverieError::Graph(GraphError::EquivalenceViolation { .. }) => "EQUIVALENCE_VIOLATION",
            ReverieError::Graph(_) => "INVALID_GRAPH",
            ReverieError::Buffer(_) => "INVALID_BUFFER",
            ReverieError::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            ReverieError::InvalidConfig { .. } => "INVALID_CONFIG",
            ReverieError::Io(_) => "IO_ERROR",
            ReverieError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if the caller can retry after this error
    ///
    /// Device and generation failures leave the controller in `Error`,
    /// from which `reset()` and a new attempt recover.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ReverieError::Engine(EngineError::DeviceUnavailable { .. })
                | ReverieError::Engine(EngineError::GenerationFailed { .. })
                | ReverieError::Engine(EngineError::BufferNotLoaded)
                | ReverieError::Decode(DecodeError::TruncatedFrame { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err: ReverieError = DecodeError::EmptyInput.into();
        assert_eq!(err.error_code(), "EMPTY_INPUT");

        let err: ReverieError = EngineError::BufferNotLoaded.into();
        assert_eq!(err.error_code(), "BUFFER_NOT_LOADED");
    }

    #[test]
    fn test_recoverable() {
        let err: ReverieError = EngineError::DeviceUnavailable {
            reason: "no output".to_string(),
        }
        .into();
        assert!(err.is_recoverable());

        let err: ReverieError = GraphError::EquivalenceViolation {
            channel: 0,
            frame: 10,
            delta: 0.5,
        }
        .into();
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_transition_message() {
        let err = EngineError::InvalidTransition {
            from: "Idle".to_string(),
            action: "pause",
        };
        assert_eq!(err.to_string(), "Cannot pause while Idle");
    }
}
