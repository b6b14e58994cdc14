// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Errors raised while building windows or the aggregator.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Creation {
    #[error("Retention must be greater than zero")]
    ZeroRetention,

    #[error("Target point count must be greater than zero")]
    ZeroTargetPoints,

    #[error("Retention {0:?} does not fit in epoch milliseconds")]
    RetentionOverflow(Duration),
}

/// Errors raised while loading configuration from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Could not parse {name}='{value}'")]
    Unparsable { name: &'static str, value: String },
}

/// Failure reported by an external lag backend.
#[derive(Debug, thiserror::Error)]
pub enum LagSourceError {
    #[error("Failed to read lag snapshot: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decode lag snapshot: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Lag backend unavailable: {0}")]
    Unavailable(String),
}

/// Errors returned by [`crate::aggregator_service::IngestHandle`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IngestError {
    #[error("Ingest queue full, event dropped")]
    QueueFull,

    #[error("Ingest service stopped")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Creation::ZeroRetention.to_string(),
            "Retention must be greater than zero"
        );
        let error = ConfigError::Unparsable {
            name: "RATE_TARGET_POINTS",
            value: "lots".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Could not parse RATE_TARGET_POINTS='lots'"
        );
    }

    #[test]
    fn test_lag_source_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let error: LagSourceError = io.into();
        assert!(matches!(error, LagSourceError::Io(_)));
        assert!(error.to_string().contains("missing"));
    }
}
