//! Configuration types for the negotiation kernel.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::location::ScheduleStrategy;

/// Top-level negotiation configuration.
///
/// Loaded from TOML at runtime; every field falls back to its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    /// Maximum negotiation rounds per Traveller (deliberation window budget)
    pub dw_budget: u32,

    /// Ordering used by every Location scheduler
    pub strategy: ScheduleStrategy,

    /// Safety limit on Router ticks; remaining Travellers are terminated
    pub max_ticks: usize,

    /// Travel time and separation constants
    pub timing: TimingConfig,
}

/// Travel time and separation constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Time added to every reserved interval for the tail to clear the road
    pub turn_penalty: i64,

    /// Minimum gap kept between conflicting intervals on top of the turn penalty
    pub minimum_gap: i64,

    /// Multiplier from distance/speed to abstract time units
    pub time_scale: f64,
}

impl TimingConfig {
    /// Shift applied past a conflicting interval's end.
    pub fn separation(&self) -> i64 {
        self.turn_penalty + self.minimum_gap
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            turn_penalty: 4,
            minimum_gap: 2,
            time_scale: 1.0,
        }
    }
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            dw_budget: 5,
            strategy: ScheduleStrategy::EarliestStart,
            max_ticks: 500,
            timing: TimingConfig::default(),
        }
    }
}

impl NegotiationConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Check values that deserialize fine but cannot drive a negotiation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dw_budget == 0 {
            return Err(ConfigError::Invalid("dw_budget must be at least 1".into()));
        }
        if !self.timing.time_scale.is_finite() || self.timing.time_scale <= 0.0 {
            return Err(ConfigError::Invalid(
                "timing.time_scale must be positive and finite".into(),
            ));
        }
        if self.timing.turn_penalty < 0 || self.timing.minimum_gap < 0 {
            return Err(ConfigError::Invalid(
                "timing constants must not be negative".into(),
            ));
        }
        // Conflict resolution shifts by the separation and needs it to make progress
        if self.timing.separation() <= 0 {
            return Err(ConfigError::Invalid(
                "turn_penalty + minimum_gap must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
