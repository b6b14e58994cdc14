// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::{
    DEFAULT_INGEST_QUEUE_SIZE, DEFAULT_LAG_POLL_INTERVAL, DEFAULT_LAG_POLL_TIMEOUT,
    DEFAULT_REPORT_INTERVAL, TARGET_POINTS,
};
use crate::errors::ConfigError;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Runtime settings for the aggregator and the services around it
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatorConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Points each retention ring spans
    pub target_points: u64,
    /// Capacity of the ingest channel
    pub ingest_queue_size: usize,
    /// Time between lag polls
    pub lag_poll_interval: Duration,
    /// Upper bound on a single lag poll
    pub lag_poll_timeout: Duration,
    /// JSON lag snapshot to poll; polling is off when unset
    pub lag_snapshot_path: Option<PathBuf>,
    /// Time between summary reports
    pub report_interval: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            target_points: TARGET_POINTS,
            ingest_queue_size: DEFAULT_INGEST_QUEUE_SIZE,
            lag_poll_interval: DEFAULT_LAG_POLL_INTERVAL,
            lag_poll_timeout: DEFAULT_LAG_POLL_TIMEOUT,
            lag_snapshot_path: None,
            report_interval: DEFAULT_REPORT_INTERVAL,
        }
    }
}

impl AggregatorConfig {
    /// Create configuration from `RATE_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let log_level = lookup("RATE_LOG_LEVEL")
            .map(|val| val.trim().to_lowercase())
            .unwrap_or(defaults.log_level);
        let target_points =
            parse_var(&lookup, "RATE_TARGET_POINTS")?.unwrap_or(defaults.target_points);
        let ingest_queue_size =
            parse_var(&lookup, "RATE_INGEST_QUEUE_SIZE")?.unwrap_or(defaults.ingest_queue_size);
        let lag_poll_interval = parse_var(&lookup, "RATE_LAG_POLL_INTERVAL_SECS")?
            .map_or(defaults.lag_poll_interval, Duration::from_secs);
        let lag_poll_timeout = parse_var(&lookup, "RATE_LAG_POLL_TIMEOUT_SECS")?
            .map_or(defaults.lag_poll_timeout, Duration::from_secs);
        let lag_snapshot_path = lookup("RATE_LAG_SNAPSHOT_PATH")
            .filter(|val| !val.trim().is_empty())
            .map(PathBuf::from);
        let report_interval = parse_var(&lookup, "RATE_REPORT_INTERVAL_SECS")?
            .map_or(defaults.report_interval, Duration::from_secs);

        let config = Self {
            log_level,
            target_points,
            ingest_queue_size,
            lag_poll_interval,
            lag_poll_timeout,
            lag_snapshot_path,
            report_interval,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        if self.target_points == 0 {
            return Err(ConfigError::Invalid(
                "RATE_TARGET_POINTS must be greater than 0".to_string(),
            ));
        }

        if self.ingest_queue_size == 0 {
            return Err(ConfigError::Invalid(
                "RATE_INGEST_QUEUE_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.lag_poll_interval.is_zero() || self.lag_poll_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "Lag poll interval and timeout must be greater than 0".to_string(),
            ));
        }

        if self.lag_poll_timeout > self.lag_poll_interval {
            return Err(ConfigError::Invalid(format!(
                "Lag poll timeout {:?} exceeds the poll interval {:?}",
                self.lag_poll_timeout, self.lag_poll_interval
            )));
        }

        if self.report_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "RATE_REPORT_INTERVAL_SECS must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Unparsable { name, value }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<AggregatorConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        AggregatorConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = AggregatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.target_points, 1_000);
        assert!(config.lag_snapshot_path.is_none());
    }

    #[test]
    fn test_empty_environment_yields_defaults() {
        assert_eq!(from_pairs(&[]).unwrap(), AggregatorConfig::default());
    }

    #[test]
    fn test_reads_every_variable() {
        let config = from_pairs(&[
            ("RATE_LOG_LEVEL", "DEBUG"),
            ("RATE_TARGET_POINTS", "500"),
            ("RATE_INGEST_QUEUE_SIZE", "64"),
            ("RATE_LAG_POLL_INTERVAL_SECS", "30"),
            ("RATE_LAG_POLL_TIMEOUT_SECS", " 3 "),
            ("RATE_LAG_SNAPSHOT_PATH", "/tmp/lag.json"),
            ("RATE_REPORT_INTERVAL_SECS", "60"),
        ])
        .unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.target_points, 500);
        assert_eq!(config.ingest_queue_size, 64);
        assert_eq!(config.lag_poll_interval, Duration::from_secs(30));
        assert_eq!(config.lag_poll_timeout, Duration::from_secs(3));
        assert_eq!(config.lag_snapshot_path, Some(PathBuf::from("/tmp/lag.json")));
        assert_eq!(config.report_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_unparsable_value_is_reported() {
        let error = from_pairs(&[("RATE_TARGET_POINTS", "lots")]).unwrap_err();
        assert!(matches!(
            error,
            ConfigError::Unparsable {
                name: "RATE_TARGET_POINTS",
                ..
            }
        ));
    }

    #[test]
    fn test_blank_snapshot_path_disables_polling() {
        let config = from_pairs(&[("RATE_LAG_SNAPSHOT_PATH", "  ")]).unwrap();
        assert!(config.lag_snapshot_path.is_none());
    }

    #[test]
    fn test_validate_zero_target_points() {
        let config = AggregatorConfig {
            target_points: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_queue_size() {
        assert!(from_pairs(&[("RATE_INGEST_QUEUE_SIZE", "0")]).is_err());
    }

    #[test]
    fn test_validate_timeout_longer_than_interval() {
        let config = AggregatorConfig {
            lag_poll_interval: Duration::from_secs(5),
            lag_poll_timeout: Duration::from_secs(6),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = AggregatorConfig {
            lag_poll_interval: Duration::from_secs(5),
            lag_poll_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_report_interval() {
        assert!(from_pairs(&[("RATE_REPORT_INTERVAL_SECS", "0")]).is_err());
    }

    #[test]
    fn test_valid_log_levels() {
        for level in VALID_LOG_LEVELS {
            let config = AggregatorConfig {
                log_level: level.to_string(),
                ..Default::default()
            };
            assert!(
                config.validate().is_ok(),
                "Log level '{}' should be valid",
                level
            );
        }

        let config = AggregatorConfig {
            log_level: "verbose".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
