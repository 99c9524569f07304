use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::SettingsError;

/// Network-wide PoET parameters.
///
/// Every field has a default, so a settings file only names what it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoetSettings {
    /// Desired seconds between blocks once the population estimate settles.
    pub target_wait_time: f64,
    /// Local mean while the network has no claim history.
    pub initial_wait_time: f64,
    /// Floor added to every drawn duration.
    pub minimum_wait_time: f64,
    /// Population samples kept for the local mean; also the z-test warm-up length.
    pub population_estimate_sample_size: usize,
    /// K: wins allowed per signup.
    pub key_block_claim_limit: u64,
    /// c: blocks a fresh signup must see before its claims count.
    pub block_claim_delay: u64,
    /// z: largest tolerated win-rate z-score.
    pub ztest_maximum_win_deviation: f64,
    /// Wins below this never trigger the z-test.
    pub ztest_minimum_win_count: u64,
    /// Seconds past expiry after which a timer can no longer be claimed.
    pub timer_timeout_period: f64,
    /// Committed blocks remembered per validator for the z-test.
    pub win_history_limit: usize,
    pub oracle_retry_attempts: u32,
    pub oracle_retry_initial_delay_ms: u64,
    pub oracle_retry_max_delay_ms: u64,
}

impl Default for PoetSettings {
    fn default() -> Self {
        Self {
            target_wait_time: 20.0,
            initial_wait_time: 3000.0,
            minimum_wait_time: 1.0,
            population_estimate_sample_size: 50,
            key_block_claim_limit: 250,
            block_claim_delay: 1,
            ztest_maximum_win_deviation: 3.075,
            ztest_minimum_win_count: 3,
            timer_timeout_period: 30.0,
            win_history_limit: 4096,
            oracle_retry_attempts: 5,
            oracle_retry_initial_delay_ms: 100,
            oracle_retry_max_delay_ms: 5000,
        }
    }
}

fn positive(field: &'static str, v: f64) -> Result<(), SettingsError> {
    if v.is_finite() && v > 0.0 {
        Ok(())
    } else {
        Err(SettingsError::Invalid { field, reason: format!("must be a positive finite number, got {v}") })
    }
}

fn nonzero(field: &'static str, v: u64) -> Result<(), SettingsError> {
    if v == 0 {
        Err(SettingsError::Invalid { field, reason: "must be non-zero".into() })
    } else {
        Ok(())
    }
}

impl PoetSettings {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::Parse` on malformed TOML or unknown keys and
    /// `SettingsError::Invalid` when a value is out of range.
    pub fn from_toml_str(s: &str) -> Result<Self, SettingsError> {
        let settings: Self = toml::from_str(s)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read, parse and validate a TOML file.
    ///
    /// # Errors
    ///
    /// As [`PoetSettings::from_toml_str`], plus `SettingsError::Io`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    /// # Errors
    ///
    /// Returns `SettingsError::Invalid` naming the first bad field.
    pub fn validate(&self) -> Result<(), SettingsError> {
        positive("target_wait_time", self.target_wait_time)?;
        positive("initial_wait_time", self.initial_wait_time)?;
        positive("minimum_wait_time", self.minimum_wait_time)?;
        positive("ztest_maximum_win_deviation", self.ztest_maximum_win_deviation)?;
        if !(self.timer_timeout_period.is_finite() && self.timer_timeout_period >= 0.0) {
            return Err(SettingsError::Invalid {
                field: "timer_timeout_period",
                reason: format!("must be a non-negative finite number, got {}", self.timer_timeout_period),
            });
        }
        nonzero("population_estimate_sample_size", self.population_estimate_sample_size as u64)?;
        nonzero("key_block_claim_limit", self.key_block_claim_limit)?;
        nonzero("win_history_limit", self.win_history_limit as u64)?;
        nonzero("oracle_retry_attempts", u64::from(self.oracle_retry_attempts))?;
        if self.oracle_retry_initial_delay_ms > self.oracle_retry_max_delay_ms {
            return Err(SettingsError::Invalid {
                field: "oracle_retry_initial_delay_ms",
                reason: "exceeds oracle_retry_max_delay_ms".into(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub const fn retry_initial_delay(&self) -> Duration {
        Duration::from_millis(self.oracle_retry_initial_delay_ms)
    }

    #[must_use]
    pub const fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.oracle_retry_max_delay_ms)
    }
}
