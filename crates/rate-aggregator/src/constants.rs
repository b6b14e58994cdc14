// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Minimum number of slots every retention ring exposes.
pub const TARGET_POINTS: u64 = 1_000;

/// Retention windows, in minutes, that own a ring pair.
pub const SUPPORTED_RETENTION_MINUTES: [u64; 5] = [5, 15, 60, 360, 1440];

/// Window used to decide which origins count as recently active.
pub const ACTIVE_POD_LOOKBACK_MINUTES: u64 = 5;

/// How far ahead of the clock an event timestamp may be and still be
/// recorded. Anything later would claim a slot still holding live data.
pub const MAX_FUTURE_SKEW: Duration = Duration::from_secs(1);

/// Floor for the time span used as a rate denominator.
pub const MIN_RATE_SPAN: Duration = Duration::from_secs(1);

// Lag buckets: high >= 100, medium 10..=99, low 1..=9
pub const HIGH_LAG_THRESHOLD: u64 = 100;
pub const MEDIUM_LAG_THRESHOLD: u64 = 10;
pub const LOW_LAG_THRESHOLD: u64 = 1;

pub const DEFAULT_INGEST_QUEUE_SIZE: usize = 10_000;
pub const DEFAULT_LAG_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_LAG_POLL_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);

pub(crate) const MILLIS_PER_MINUTE: u64 = 60_000;
