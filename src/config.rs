//! Tunable engine constants.
//!
//! Every constant the scheduler relies on lives here so hosts can retune
//! the curve without a rebuild. A config file only needs the keys it
//! overrides:
//!
//! ```toml
//! [interval]
//! max_interval_days = 120
//!
//! [advance]
//! default_threshold = 0.45
//!
//! [[advance.levels]]
//! level = 6
//! accuracy = 0.6
//!
//! [recovery]
//! exit_streak = 2
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub interval: IntervalConfig,
    #[serde(default)]
    pub advance: AdvanceConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalConfig {
    /// Base of the exponential review-count curve
    pub growth_base: f64,
    /// Ceiling applied to the base interval and to the final interval
    pub max_interval_days: u32,
    pub multiplier_floor: f64,
    pub multiplier_span: f64,
    pub multiplier_exponent: f64,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            growth_base: 1.7,
            max_interval_days: 180,
            multiplier_floor: 0.6,
            multiplier_span: 1.4,
            multiplier_exponent: 3.0,
        }
    }
}

/// Override of the accuracy needed to reach one review level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelThreshold {
    pub level: u32,
    pub accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvanceConfig {
    /// Accuracy required to move from level 0 to level 1
    pub first_level: f64,
    /// Accuracy required for every later level without an override
    pub default_threshold: f64,
    pub levels: Vec<LevelThreshold>,
}

impl Default for AdvanceConfig {
    fn default() -> Self {
        Self {
            first_level: 0.0,
            default_threshold: 0.40,
            levels: Vec::new(),
        }
    }
}

impl AdvanceConfig {
    /// Cumulative accuracy a topic needs before its review count may
    /// advance to `target`.
    pub fn required_accuracy(&self, target: u32) -> f64 {
        if target <= 1 {
            return self.first_level;
        }
        self.levels
            .iter()
            .find(|l| l.level == target)
            .map(|l| l.accuracy)
            .unwrap_or(self.default_threshold)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Pre-session interval at or above which a collapse is watched for
    pub collapse_interval_days: u32,
    /// Session accuracy at or below which a long-interval topic collapses
    pub collapse_accuracy: f64,
    /// Review count a collapsed topic is knocked back to
    pub reset_review_count: u32,
    /// Interval ceiling while recovering
    pub max_interval_days: u32,
    /// Session accuracy that counts towards the exit streak
    pub exit_accuracy: f64,
    /// Consecutive qualifying sessions needed to leave recovery
    pub exit_streak: u32,
    pub reject_out_of_order: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            collapse_interval_days: 180,
            collapse_accuracy: 0.30,
            reset_review_count: 2,
            max_interval_days: 7,
            exit_accuracy: 0.70,
            exit_streak: 3,
            reject_out_of_order: true,
        }
    }
}

impl SchedulerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: SchedulerConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let i = &self.interval;
        if !(i.growth_base > 1.0) {
            return Err(invalid("interval.growth_base must be greater than 1"));
        }
        if i.max_interval_days == 0 {
            return Err(invalid("interval.max_interval_days must be at least 1"));
        }
        if !(i.multiplier_floor > 0.0) || !(i.multiplier_span >= 0.0) {
            return Err(invalid("interval multiplier constants must be positive"));
        }
        if !(i.multiplier_exponent > 0.0) {
            return Err(invalid("interval.multiplier_exponent must be positive"));
        }

        let a = &self.advance;
        check_fraction("advance.first_level", a.first_level)?;
        check_fraction("advance.default_threshold", a.default_threshold)?;
        for level in &a.levels {
            check_fraction(&format!("advance.levels[{}]", level.level), level.accuracy)?;
        }

        let r = &self.recovery;
        check_fraction("recovery.collapse_accuracy", r.collapse_accuracy)?;
        check_fraction("recovery.exit_accuracy", r.exit_accuracy)?;
        if r.exit_streak == 0 {
            return Err(invalid("recovery.exit_streak must be at least 1"));
        }
        if r.max_interval_days == 0 {
            return Err(invalid("recovery.max_interval_days must be at least 1"));
        }
        if r.collapse_interval_days == 0 {
            return Err(invalid("recovery.collapse_interval_days must be at least 1"));
        }

        Ok(())
    }
}

fn check_fraction(name: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(&format!("{} must be within [0, 1], got {}", name, value)))
    }
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::Invalid(msg.to_string())
}
