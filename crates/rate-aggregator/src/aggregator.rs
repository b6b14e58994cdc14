// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The public read/write surface of the engine.
//!
//! An [`Aggregator`] owns one throughput ring and one log-level ring per
//! supported retention, the set of explicitly observed origins, and the
//! consumer-lag table. All of it sits behind a single mutex: writes are O(1)
//! per ring and reads scan at most one ring of about a thousand slots, so the
//! lock is only ever held briefly.
//!
//! Reads copy what they need out of the rings before releasing the lock, so
//! callers always receive immutable snapshots.
//!
//! # Example
//!
//! ```
//! use rate_aggregator::{Aggregator, Event, Severity};
//!
//! let aggregator = Aggregator::with_system_clock(1_000).unwrap();
//! aggregator.record_event(&Event::log("checkout", Severity::Error, 0));
//! aggregator.record_event(&Event::queue("orders", "checkout", Severity::Info, 0));
//!
//! let metrics = aggregator.aggregated_metrics(5);
//! assert_eq!(metrics.total_messages, 2);
//! assert_eq!(metrics.total_errors, 1);
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::hash::BuildHasherDefault;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use hashbrown::HashSet;
use serde::Serialize;
use tracing::{debug, trace};
use ustr::{IdentityHasher, Ustr};

use crate::aggregate::{LogLevelAggregate, ThroughputAggregate};
use crate::clock::{Clock, SystemClock};
use crate::constants::{
    ACTIVE_POD_LOOKBACK_MINUTES, MAX_FUTURE_SKEW, MILLIS_PER_MINUTE, MIN_RATE_SPAN,
    SUPPORTED_RETENTION_MINUTES,
};
use crate::errors::Creation;
use crate::event::{Event, Severity};
use crate::lag::{LagEntry, LagSummary, LagTable};
use crate::ring::{RingBucket, SlotUpdate};
use crate::window::WindowSpec;

/// Throughput of one window, keyed by origin and by topic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ThroughputPoint {
    /// End of the window, epoch milliseconds.
    pub timestamp_ms: i64,
    pub origin_counts: BTreeMap<Ustr, u64>,
    pub topic_counts: BTreeMap<Ustr, u64>,
}

impl ThroughputPoint {
    /// Events in the window.
    ///
    /// A queue event is counted once under its topic and once under its
    /// origin, so the larger of the two sums is used rather than their total.
    #[must_use]
    pub fn total(&self) -> u64 {
        let origins: u64 = self.origin_counts.values().sum();
        let topics: u64 = self.topic_counts.values().sum();
        origins.max(topics)
    }
}

/// Events per severity for one window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LogLevelPoint {
    /// End of the window, epoch milliseconds.
    pub timestamp_ms: i64,
    pub level_counts: BTreeMap<Severity, u64>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct AggregatedMetrics {
    pub total_messages: u64,
    pub total_errors: u64,
    /// Events per second between the oldest and newest window.
    pub average_throughput: f64,
}

struct RetentionRings {
    minutes: u64,
    throughput: RingBucket<ThroughputAggregate>,
    levels: RingBucket<LogLevelAggregate>,
}

type NameSet = HashSet<Ustr, BuildHasherDefault<IdentityHasher>>;

struct State {
    rings: Vec<RetentionRings>,
    active_pods: NameSet,
    lag: LagTable,
    /// Timestamps at or before `now - horizon_ms` are invisible to every ring.
    horizon_ms: i64,
    dropped_late_events: u64,
    dropped_out_of_range_events: u64,
}

impl State {
    fn rings(&self, minutes: u64) -> Option<&RetentionRings> {
        self.rings.iter().find(|r| r.minutes == minutes)
    }

    /// Timestamps too far ahead of `now_ms` or too old for any retention.
    fn out_of_range(&self, timestamp_ms: i64, now_ms: i64) -> bool {
        let skew_ms = i64::try_from(MAX_FUTURE_SKEW.as_millis()).unwrap_or(i64::MAX);
        timestamp_ms > now_ms.saturating_add(skew_ms)
            || timestamp_ms <= now_ms.saturating_sub(self.horizon_ms)
    }

    fn record(&mut self, event: &Event, timestamp_ms: i64, now_ms: i64) {
        if self.out_of_range(timestamp_ms, now_ms) {
            self.dropped_out_of_range_events += 1;
            debug!(
                "Dropping event for {} at {timestamp_ms}, outside the recordable range at {now_ms}",
                event.origin()
            );
            return;
        }

        let level = event.level();
        let mut stale = false;
        let mut unplaced = false;

        for rings in &mut self.rings {
            let levels = rings
                .levels
                .update(timestamp_ms, |agg| agg.increment_level(level));

            let outcome = match event {
                Event::Log(log) => rings
                    .throughput
                    .update(timestamp_ms, |agg| agg.increment_origin(log.origin)),
                Event::Queue(queue) => rings.throughput.update(timestamp_ms, |agg| {
                    agg.increment_topic(queue.topic);
                    agg.increment_origin(queue.origin);
                }),
            };
            for update in [levels, outcome] {
                stale |= update == SlotUpdate::Stale;
                unplaced |= update == SlotUpdate::OutOfRange;
            }
        }

        if unplaced {
            self.dropped_out_of_range_events += 1;
        } else if stale {
            self.dropped_late_events += 1;
            trace!(
                "Event for {} at {timestamp_ms} is a ring lap behind in at least one window",
                event.origin()
            );
        }
    }

    /// `(window_end_ms, total)` per live throughput window.
    fn throughput_totals(&self, minutes: u64, now_ms: i64) -> Vec<(i64, u64)> {
        self.rings(minutes).map_or_else(Vec::new, |rings| {
            rings.throughput.collect_with(now_ms, |end, agg| {
                (end, agg.origin_total().max(agg.topic_total()))
            })
        })
    }

    fn rate(&self, minutes: u64, now_ms: i64) -> f64 {
        let totals = self.throughput_totals(minutes, now_ms);
        let (Some(&(first_ts, first)), Some(&(last_ts, last))) = (totals.first(), totals.last())
        else {
            return 0.0;
        };
        if totals.len() < 2 {
            return 0.0;
        }

        #[allow(clippy::cast_precision_loss)]
        let delta = last as f64 - first as f64;
        let min_span_ms = i64::try_from(MIN_RATE_SPAN.as_millis()).unwrap_or(1_000);
        #[allow(clippy::cast_precision_loss)]
        let span_secs = (last_ts - first_ts).max(min_span_ms) as f64 / 1_000.0;
        delta / span_secs
    }
}

/// Multi-resolution event rate aggregator.
///
/// Share it with `Arc`; every method takes `&self`.
pub struct Aggregator {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("retentions", &SUPPORTED_RETENTION_MINUTES)
            .finish_non_exhaustive()
    }
}

impl Aggregator {
    /// Builds every retention ring up front; nothing is allocated per event
    /// beyond the first write of a name into a slot.
    pub fn new(target_points: u64, clock: Arc<dyn Clock>) -> Result<Self, Creation> {
        let mut rings = Vec::with_capacity(SUPPORTED_RETENTION_MINUTES.len());
        let mut horizon_ms = 0;
        for minutes in SUPPORTED_RETENTION_MINUTES {
            let spec = WindowSpec::new(
                Duration::from_millis(minutes * MILLIS_PER_MINUTE),
                target_points,
            )?;
            debug!(
                "Retention {minutes}m: {} slots of {:?}",
                spec.capacity(),
                spec.window()
            );
            horizon_ms = horizon_ms.max(spec.retention_ms().saturating_add(spec.window_ms()));
            rings.push(RetentionRings {
                minutes,
                throughput: RingBucket::new(spec),
                levels: RingBucket::new(spec),
            });
        }

        Ok(Self {
            state: Mutex::new(State {
                rings,
                active_pods: NameSet::default(),
                lag: LagTable::default(),
                horizon_ms,
                dropped_late_events: 0,
                dropped_out_of_range_events: 0,
            }),
            clock,
        })
    }

    pub fn with_system_clock(target_points: u64) -> Result<Self, Creation> {
        Self::new(target_points, Arc::new(SystemClock))
    }

    // Every critical section leaves the counters consistent, so a panic in
    // another holder does not invalidate the state.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Sizing of the rings backing `minutes`, if supported.
    #[must_use]
    pub fn window_spec(&self, minutes: u64) -> Option<WindowSpec> {
        self.lock().rings(minutes).map(|r| *r.throughput.spec())
    }

    /// Records `event` at the current time.
    pub fn record_event(&self, event: &Event) {
        let now = self.clock.now_millis();
        self.record_event_at(event, now);
    }

    /// Records `event` at `timestamp_ms`, ignoring its embedded timestamp.
    ///
    /// Timestamps more than [`MAX_FUTURE_SKEW`] ahead of the clock, or too
    /// old to appear in any retention, are dropped and counted in
    /// [`Aggregator::dropped_out_of_range_events`].
    pub fn record_event_at(&self, event: &Event, timestamp_ms: i64) {
        let now = self.clock.now_millis();
        self.lock().record(event, timestamp_ms, now);
    }

    /// Records `event` at its own embedded timestamp.
    pub fn replay_event(&self, event: &Event) {
        self.record_event_at(event, event.timestamp_ms());
    }

    /// Events discarded because their window had already been overwritten by
    /// a newer one.
    #[must_use]
    pub fn dropped_late_events(&self) -> u64 {
        self.lock().dropped_late_events
    }

    /// Events discarded because their timestamp was in the future or older
    /// than the longest retention.
    #[must_use]
    pub fn dropped_out_of_range_events(&self) -> u64 {
        self.lock().dropped_out_of_range_events
    }

    pub fn update_lag(&self, entries: Vec<LagEntry>) {
        if entries.is_empty() {
            return;
        }
        let count = entries.len();
        let mut state = self.lock();
        state.lag.upsert(entries);
        debug!(
            "Applied {count} lag entries, tracking {} partitions",
            state.lag.len()
        );
    }

    pub fn register_active_pod(&self, name: &str) {
        if self.lock().active_pods.insert(Ustr::from(name)) {
            debug!("Observing pod {name}");
        }
    }

    pub fn unregister_active_pod(&self, name: &str) {
        if self.lock().active_pods.remove(&Ustr::from(name)) {
            debug!("Stopped observing pod {name}");
        }
    }

    /// Registered pods plus every origin with traffic in the last 5 minutes.
    #[must_use]
    pub fn active_pods(&self) -> BTreeSet<Ustr> {
        let now = self.clock.now_millis();
        let state = self.lock();
        let mut pods: BTreeSet<Ustr> = state.active_pods.iter().copied().collect();
        if let Some(rings) = state.rings(ACTIVE_POD_LOOKBACK_MINUTES) {
            pods.extend(
                rings
                    .throughput
                    .recent_keys(now, |agg| agg.origins().collect::<Vec<_>>()),
            );
        }
        pods
    }

    #[must_use]
    pub fn active_pods_count(&self) -> usize {
        self.active_pods().len()
    }

    /// Throughput windows for `minutes`, oldest first. Empty when `minutes`
    /// is not a supported retention.
    #[must_use]
    pub fn throughput_series(&self, minutes: u64) -> Vec<ThroughputPoint> {
        let now = self.clock.now_millis();
        let state = self.lock();
        let Some(rings) = state.rings(minutes) else {
            return Vec::new();
        };
        rings.throughput.collect_with(now, |end, agg| ThroughputPoint {
            timestamp_ms: end,
            origin_counts: agg.origin_counts().collect(),
            topic_counts: agg.topic_counts().collect(),
        })
    }

    /// Severity windows for `minutes`, oldest first. Empty when `minutes` is
    /// not a supported retention.
    #[must_use]
    pub fn log_level_series(&self, minutes: u64) -> Vec<LogLevelPoint> {
        let now = self.clock.now_millis();
        let state = self.lock();
        let Some(rings) = state.rings(minutes) else {
            return Vec::new();
        };
        rings.levels.collect_with(now, |end, agg| LogLevelPoint {
            timestamp_ms: end,
            level_counts: agg.level_counts().collect(),
        })
    }

    /// Events per second between the oldest and newest throughput window.
    ///
    /// Zero until at least two windows hold data. The span is floored at one
    /// second.
    #[must_use]
    pub fn rate(&self, minutes: u64) -> f64 {
        let now = self.clock.now_millis();
        self.lock().rate(minutes, now)
    }

    #[must_use]
    pub fn aggregated_metrics(&self, minutes: u64) -> AggregatedMetrics {
        let now = self.clock.now_millis();
        let state = self.lock();
        let Some(rings) = state.rings(minutes) else {
            return AggregatedMetrics::default();
        };

        let (total_messages, total_errors) = rings
            .levels
            .collect_with(now, |_, agg| (agg.total(), agg.errors()))
            .into_iter()
            .fold((0, 0), |(total, errors), (t, e)| (total + t, errors + e));

        AggregatedMetrics {
            total_messages,
            total_errors,
            average_throughput: state.rate(minutes, now),
        }
    }

    #[must_use]
    pub fn kafka_lag_summary(&self) -> LagSummary {
        self.lock().lag.summary()
    }

    #[must_use]
    pub fn partition_lag_details(&self, hide_zero_lag: bool) -> Vec<LagEntry> {
        self.lock().lag.details(hide_zero_lag)
    }
}
