// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Typed events accepted by the aggregator.
//!
//! Upstream tailers and queue consumers classify raw input before it reaches
//! this crate; an [`Event`] is either a log line attributed to an origin or a
//! queue record attributed to a topic and the origin that produced or consumed
//! it.
//!
//! Events deserialize from JSON with a `kind` tag:
//!
//! ```json
//! {"kind":"log","origin":"checkout-7d9f","level":"error","timestamp_ms":1700000000000}
//! {"kind":"queue","topic":"orders","origin":"consumer-1","level":"info","timestamp_ms":1700000000000}
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ustr::Ustr;

/// Severity of an event. `Error` and `Fatal` form the error tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Severity {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
}

impl Severity {
    pub const COUNT: usize = 6;

    pub const ALL: [Severity; Self::COUNT] = [
        Severity::Trace,
        Severity::Debug,
        Severity::Info,
        Severity::Warn,
        Severity::Error,
        Severity::Fatal,
    ];

    #[must_use]
    pub fn is_error(self) -> bool {
        matches!(self, Severity::Error | Severity::Fatal)
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl AsRef<str> for Severity {
    fn as_ref(&self) -> &str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// Parses severities case-insensitively.
///
/// `warning` is accepted for `Warn` and `critical` for `Fatal`.
impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(Severity::Trace),
            "debug" => Ok(Severity::Debug),
            "info" => Ok(Severity::Info),
            "warn" | "warning" => Ok(Severity::Warn),
            "error" => Ok(Severity::Error),
            "fatal" | "critical" => Ok(Severity::Fatal),
            _ => Err(format!("unknown severity '{s}'")),
        }
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Severity::from_str(&raw).map_err(serde::de::Error::custom)
    }
}

impl Serialize for Severity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_ref())
    }
}

/// A log line from a pod or service.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct LogEvent {
    pub origin: Ustr,
    pub level: Severity,
    #[serde(default, alias = "timestamp")]
    pub timestamp_ms: i64,
}

/// A record observed on a queue topic.
///
/// `origin` is the producer or consumer the record is attributed to.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct QueueEvent {
    pub topic: Ustr,
    pub origin: Ustr,
    #[serde(default)]
    pub level: Severity,
    #[serde(default, alias = "timestamp")]
    pub timestamp_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    Log(LogEvent),
    Queue(QueueEvent),
}

impl Event {
    pub fn log(origin: &str, level: Severity, timestamp_ms: i64) -> Self {
        Event::Log(LogEvent {
            origin: Ustr::from(origin),
            level,
            timestamp_ms,
        })
    }

    pub fn queue(topic: &str, origin: &str, level: Severity, timestamp_ms: i64) -> Self {
        Event::Queue(QueueEvent {
            topic: Ustr::from(topic),
            origin: Ustr::from(origin),
            level,
            timestamp_ms,
        })
    }

    #[must_use]
    pub fn origin(&self) -> Ustr {
        match self {
            Event::Log(e) => e.origin,
            Event::Queue(e) => e.origin,
        }
    }

    #[must_use]
    pub fn level(&self) -> Severity {
        match self {
            Event::Log(e) => e.level,
            Event::Queue(e) => e.level,
        }
    }

    #[must_use]
    pub fn timestamp_ms(&self) -> i64 {
        match self {
            Event::Log(e) => e.timestamp_ms,
            Event::Queue(e) => e.timestamp_ms,
        }
    }
}
