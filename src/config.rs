//! Engine configuration.
//!
//! Every field has a default, so a partial JSON document (or none at all)
//! is a valid configuration.

use crate::error::EngineError;
use crate::timer::check_delay_ms;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Device sample rate (Hz)
    pub sample_rate: f64,
    /// Frames rendered between timer checks
    pub block_size: usize,
    /// Loop length of generated noise buffers
    pub noise_buffer_secs: f64,
    /// Loop length of procedurally generated ambience
    pub ambience_buffer_secs: f64,
    /// Length of an offline export
    pub export_secs: f64,
    /// Ramp window for user-driven parameter changes
    pub user_ramp_ms: f64,
    /// Ramp window for randomization-driven modulation changes
    pub randomization_ramp_ms: f64,
    /// Quiet period between tearing a chain down and rebuilding it
    pub rebuild_settle_ms: f64,
    /// Gain at volume 100 for the tone generator
    pub tone_headroom: f64,
    /// Gain at volume 100 for the noise tools
    pub noise_headroom: f64,
    /// Decoded background sounds kept in memory
    pub ambience_cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100.0,
            block_size: 128,
            noise_buffer_secs: crate::noise::DEFAULT_BUFFER_SECS,
            ambience_buffer_secs: 4.0,
            export_secs: 30.0,
            user_ramp_ms: 10.0,
            randomization_ramp_ms: 50.0,
            rebuild_settle_ms: 50.0,
            tone_headroom: 0.5,
            noise_headroom: 0.5,
            ambience_cache_capacity: 4,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON configuration document
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(EngineError::Config(format!("sample_rate must be positive, got {}", self.sample_rate)));
        }
        if self.block_size == 0 {
            return Err(EngineError::Config("block_size must be non-zero".into()));
        }
        if self.noise_buffer_secs <= 0.0 || self.ambience_buffer_secs <= 0.0 || self.export_secs <= 0.0 {
            return Err(EngineError::Config("buffer durations must be positive".into()));
        }
        let windows = [self.user_ramp_ms, self.randomization_ramp_ms, self.rebuild_settle_ms];
        if windows.iter().any(|&ms| check_delay_ms("timing_window", ms).is_err()) {
            return Err(EngineError::Config("timing windows must lie within 0..=1 h".into()));
        }
        Ok(())
    }

    pub fn user_ramp(&self) -> f64 {
        self.user_ramp_ms / 1000.0
    }

    pub fn randomization_ramp(&self) -> f64 {
        self.randomization_ramp_ms / 1000.0
    }
}
