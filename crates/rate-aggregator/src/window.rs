// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Slot sizing for a retention window.
//!
//! A retention `R` is cut into windows of `max(1ms, R / T)` so that the ring
//! covering it has at least `T` slots. This bounds both memory (a constant
//! number of slots per retention tier) and the cost of a full scan.

use std::time::Duration;

use crate::errors::Creation;

/// Immutable sizing of one retention ring.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowSpec {
    retention_ms: i64,
    window_ms: i64,
    capacity: usize,
}

impl WindowSpec {
    /// Computes the window length and slot count for `retention`.
    ///
    /// # Examples
    ///
    /// ```
    /// use rate_aggregator::window::WindowSpec;
    /// use std::time::Duration;
    ///
    /// let spec = WindowSpec::new(Duration::from_secs(5 * 60), 1_000).unwrap();
    /// assert_eq!(spec.window(), Duration::from_millis(300));
    /// assert_eq!(spec.capacity(), 1_000);
    /// ```
    pub fn new(retention: Duration, target_points: u64) -> Result<Self, Creation> {
        if retention.is_zero() {
            return Err(Creation::ZeroRetention);
        }
        if target_points == 0 {
            return Err(Creation::ZeroTargetPoints);
        }

        let retention_ms = i64::try_from(retention.as_millis())
            .map_err(|_| Creation::RetentionOverflow(retention))?;
        if retention_ms == 0 {
            // Sub-millisecond retentions have nothing to index
            return Err(Creation::ZeroRetention);
        }
        let target = i64::try_from(target_points).unwrap_or(i64::MAX);

        let window_ms = (retention_ms / target).max(1);
        let slots = (retention_ms + window_ms - 1) / window_ms;
        let capacity = usize::try_from(slots.max(target))
            .map_err(|_| Creation::RetentionOverflow(retention))?;

        Ok(Self {
            retention_ms,
            window_ms,
            capacity,
        })
    }

    #[must_use]
    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms.unsigned_abs())
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms.unsigned_abs())
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn retention_ms(&self) -> i64 {
        self.retention_ms
    }

    pub(crate) fn window_ms(&self) -> i64 {
        self.window_ms
    }
}
