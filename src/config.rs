//! Engine configuration
//!
//! Every tunable of the pipeline in one serde document. Missing fields
//! take their defaults, so a config file only needs the values it changes:
//!
//! ```json
//! { "effects": { "wet_gain": 0.5 }, "pan": { "hold_secs": 10.0 } }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dsp::binaural::BinauralParams;
use crate::dsp::graph::{DEFAULT_DRY_GAIN, DEFAULT_WET_GAIN, RENDER_QUANTUM};
use crate::dsp::impulse::{DEFAULT_IMPULSE_DECAY, DEFAULT_IMPULSE_DURATION_SECS};
use crate::dsp::pan::{
    PanAutomationParams, DEFAULT_HOLD_SECS, DEFAULT_PAN_SMOOTHING_SECS, DEFAULT_TRANSITION_SECS,
};
use crate::engine::buffer::{SPEECH_CHANNELS, SPEECH_SAMPLE_RATE};
use crate::engine::wav::DEFAULT_DOWNLOAD_NAME;
use crate::error::{ReverieError, Result};

/// Default interval between pan schedule polls
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Reverb mix settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectsSettings {
    pub dry_gain: f32,
    pub wet_gain: f32,
    pub impulse_duration_secs: f32,
    pub impulse_decay: f32,
    pub output_channels: usize,
}

impl Default for EffectsSettings {
    fn default() -> Self {
        Self {
            dry_gain: DEFAULT_DRY_GAIN,
            wet_gain: DEFAULT_WET_GAIN,
            impulse_duration_secs: DEFAULT_IMPULSE_DURATION_SECS,
            impulse_decay: DEFAULT_IMPULSE_DECAY,
            output_channels: 2,
        }
    }
}

/// Panning automation settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanSettings {
    pub hold_secs: f64,
    pub transition_secs: f64,
    pub smoothing_secs: f32,
    pub poll_interval_ms: u64,
}

impl Default for PanSettings {
    fn default() -> Self {
        Self {
            hold_secs: DEFAULT_HOLD_SECS,
            transition_secs: DEFAULT_TRANSITION_SECS,
            smoothing_secs: DEFAULT_PAN_SMOOTHING_SECS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl PanSettings {
    pub fn params(&self) -> PanAutomationParams {
        PanAutomationParams {
            hold_secs: self.hold_secs,
            transition_secs: self.transition_secs,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sample rate of decoded speech
    pub sample_rate: u32,
    /// Channel count of decoded speech
    pub channels: usize,
    pub effects: EffectsSettings,
    pub pan: PanSettings,
    /// Frames per live render call
    pub render_quantum: usize,
    pub binaural: BinauralParams,
    pub download_filename: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: SPEECH_SAMPLE_RATE,
            channels: SPEECH_CHANNELS,
            effects: EffectsSettings::default(),
            pan: PanSettings::default(),
            render_quantum: RENDER_QUANTUM,
            binaural: BinauralParams::default(),
            download_filename: DEFAULT_DOWNLOAD_NAME.to_string(),
        }
    }
}

fn invalid(reason: impl Into<String>) -> ReverieError {
    ReverieError::InvalidConfig {
        reason: reason.into(),
    }
}

fn unit_range(name: &str, value: f32) -> Result<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(invalid(format!("{} must be within [0, 1], got {}", name, value)));
    }
    Ok(())
}

impl EngineConfig {
    /// Load a JSON config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config as pretty-printed JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Check every value is in range
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(invalid("sample_rate must be positive"));
        }
        if self.channels == 0 {
            return Err(invalid("channels must be positive"));
        }

        unit_range("effects.dry_gain", self.effects.dry_gain)?;
        unit_range("effects.wet_gain", self.effects.wet_gain)?;
        if !self.effects.impulse_duration_secs.is_finite()
            || self.effects.impulse_duration_secs <= 0.0
        {
            return Err(invalid("effects.impulse_duration_secs must be positive"));
        }
        if !self.effects.impulse_decay.is_finite() || self.effects.impulse_decay < 0.0 {
            return Err(invalid("effects.impulse_decay must be non-negative"));
        }
        if !(1..=2).contains(&self.effects.output_channels) {
            return Err(invalid(format!(
                "effects.output_channels must be 1 or 2, got {}",
                self.effects.output_channels
            )));
        }

        self.pan.params().validate()?;
        if !self.pan.smoothing_secs.is_finite() || self.pan.smoothing_secs < 0.0 {
            return Err(invalid("pan.smoothing_secs must be non-negative"));
        }
        if self.pan.poll_interval_ms == 0 {
            return Err(invalid("pan.poll_interval_ms must be positive"));
        }

        if self.render_quantum == 0 {
            return Err(invalid("render_quantum must be positive"));
        }

        let binaural = &self.binaural;
        if !binaural.base_frequency.is_finite() || binaural.base_frequency <= 0.0 {
            return Err(invalid("binaural.base_frequency must be positive"));
        }
        if !binaural.beat_frequency.is_finite() || binaural.beat_frequency < 0.0 {
            return Err(invalid("binaural.beat_frequency must be non-negative"));
        }
        unit_range("binaural.volume", binaural.volume)?;

        if self.download_filename.trim().is_empty() {
            return Err(invalid("download_filename must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.sample_rate, 24000);
        assert_eq!(config.channels, 1);
        assert_eq!(config.effects.dry_gain, 0.7);
        assert_eq!(config.effects.wet_gain, 0.35);
        assert_eq!(config.effects.impulse_duration_secs, 2.5);
        assert_eq!(config.pan.hold_secs, 20.0);
        assert_eq!(config.pan.transition_secs, 5.0);
        assert_eq!(config.pan.poll_interval_ms, 100);
        assert_eq!(config.render_quantum, 128);
        assert_eq!(config.binaural.base_frequency, 432.0);
        assert_eq!(config.download_filename, "Meditation.wav");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "effects": { "wet_gain": 0.5 }, "pan": { "hold_secs": 10.0 } }"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.effects.wet_gain, 0.5);
        assert_eq!(config.effects.dry_gain, 0.7);
        assert_eq!(config.pan.hold_secs, 10.0);
        assert_eq!(config.pan.transition_secs, 5.0);
        assert_eq!(config.sample_rate, 24000);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reverie.json");

        let mut config = EngineConfig::default();
        config.effects.output_channels = 1;
        config.binaural.volume = 0.1;
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_validation_failures() {
        let mut config = EngineConfig::default();
        config.effects.wet_gain = 1.5;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.pan.transition_secs = 0.0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.effects.output_channels = 6;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.render_quantum = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.download_filename = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{ "sample_rate": 0 }"#).unwrap();
        let err = EngineConfig::load(&path).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");

        fs::write(&path, "not json").unwrap();
        let err = EngineConfig::load(&path).unwrap_err();
        assert_eq!(err.error_code(), "SERIALIZATION_ERROR");
    }
}
