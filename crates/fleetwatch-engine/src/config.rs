//! Engine and sampling configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejected configuration values.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be within 0..=100, got {value}")]
    OutOfRange { name: &'static str, value: f64 },

    #[error("limits must satisfy low_limit < high_limit <= high_urgent (got {low} / {high} / {urgent})")]
    LimitOrder { low: f64, high: f64, urgent: f64 },

    #[error("stats_period_secs must be positive")]
    ZeroStatsPeriod,

    #[error("sampling concurrency must be positive")]
    ZeroConcurrency,
}

/// Thresholds and hysteresis depth for the decision engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Projected average (percent) below which the group may shrink.
    pub low_limit: f64,
    /// Average (percent) above which the group may grow.
    pub high_limit: f64,
    /// Single-instance load (percent) that grows the group immediately.
    pub high_urgent: f64,
    /// Extra consecutive low observations required before shrinking.
    pub low_counter_limit: u32,
    /// Extra consecutive high observations required before growing.
    pub high_counter_limit: u32,
    /// Aggregation period of the metrics backend, in seconds.
    pub stats_period_secs: u64,
    /// Capacity of the per-group load history. 0 disables it.
    pub history_size: usize,
    /// Log commands instead of sending them.
    pub dry_run: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            low_limit: 70.0,
            high_limit: 90.0,
            high_urgent: 95.0,
            low_counter_limit: 0,
            high_counter_limit: 0,
            stats_period_secs: 60,
            history_size: 0,
            dry_run: false,
        }
    }
}

impl EngineConfig {
    /// Trailing window requested from the sample source.
    pub fn sample_window(&self) -> Duration {
        Duration::from_secs(self.stats_period_secs.saturating_mul(3))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("low_limit", self.low_limit),
            ("high_limit", self.high_limit),
            ("high_urgent", self.high_urgent),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ConfigError::OutOfRange { name, value });
            }
        }
        if self.low_limit >= self.high_limit || self.high_limit > self.high_urgent {
            return Err(ConfigError::LimitOrder {
                low: self.low_limit,
                high: self.high_limit,
                urgent: self.high_urgent,
            });
        }
        if self.stats_period_secs == 0 {
            return Err(ConfigError::ZeroStatsPeriod);
        }
        Ok(())
    }
}

/// Fan-out settings for per-instance sampling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SamplingConfig {
    /// Maximum in-flight sample requests.
    pub concurrency: usize,
    /// Per-request timeout, in seconds.
    pub timeout_secs: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            timeout_secs: 10,
        }
    }
}

impl SamplingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
        assert!(SamplingConfig::default().validate().is_ok());
    }

    #[test]
    fn window_is_three_periods() {
        let config = EngineConfig {
            stats_period_secs: 300,
            ..Default::default()
        };
        assert_eq!(config.sample_window(), Duration::from_secs(900));
    }

    #[test]
    fn rejects_inverted_limits() {
        let config = EngineConfig {
            low_limit: 90.0,
            high_limit: 80.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::LimitOrder { .. })
        ));
    }

    #[test]
    fn rejects_out_of_range_limit() {
        let config = EngineConfig {
            high_urgent: 120.0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::OutOfRange {
                name: "high_urgent",
                value: 120.0
            })
        );
    }

    #[test]
    fn rejects_zero_period_and_concurrency() {
        let config = EngineConfig {
            stats_period_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroStatsPeriod));

        let sampling = SamplingConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert_eq!(sampling.validate(), Err(ConfigError::ZeroConcurrency));
    }
}
