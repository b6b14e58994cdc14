// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helpers for callers that accept arbitrary retention requests.
//!
//! The aggregator itself only answers for [`SUPPORTED_RETENTION_MINUTES`];
//! anything else returns empty results. Facades snap user input first.

pub use crate::constants::SUPPORTED_RETENTION_MINUTES;

#[must_use]
pub fn is_supported(minutes: u64) -> bool {
    SUPPORTED_RETENTION_MINUTES.contains(&minutes)
}

/// Snaps `minutes` to the closest supported retention.
///
/// Ties go to the smaller retention.
///
/// ```
/// use rate_aggregator::retention::nearest_supported;
///
/// assert_eq!(nearest_supported(10), 5);
/// assert_eq!(nearest_supported(30), 15);
/// assert_eq!(nearest_supported(100_000), 1440);
/// ```
#[must_use]
pub fn nearest_supported(minutes: u64) -> u64 {
    let mut best = SUPPORTED_RETENTION_MINUTES[0];
    for candidate in SUPPORTED_RETENTION_MINUTES {
        // Strict comparison keeps the earlier (smaller) candidate on ties
        if candidate.abs_diff(minutes) < best.abs_diff(minutes) {
            best = candidate;
        }
    }
    best
}
