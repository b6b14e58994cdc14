// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-slot accumulators.
//!
//! A slot is reset and reused every time its ring index is reassigned to a
//! new window, so accumulators clear their storage instead of dropping it.

use std::hash::BuildHasherDefault;

use hashbrown::HashMap;
use ustr::{IdentityHasher, Ustr};

use crate::event::Severity;

/// Counts keyed by interned name. `Ustr` carries a precomputed hash.
pub type CountMap = HashMap<Ustr, u64, BuildHasherDefault<IdentityHasher>>;

/// Capability shared by everything a [`crate::ring::RingBucket`] can hold.
pub trait Aggregate: Default + Clone + Send {
    /// Clears all counts, keeping allocated storage for reuse.
    fn reset(&mut self);

    fn is_empty(&self) -> bool;
}

/// Throughput counts for one window, by origin and by topic.
///
/// The maps are allocated on first write so idle slots cost no heap.
#[derive(Clone, Debug, Default)]
pub struct ThroughputAggregate {
    origins: Option<CountMap>,
    topics: Option<CountMap>,
    events: u64,
}

impl ThroughputAggregate {
    pub fn increment_origin(&mut self, name: Ustr) {
        *self
            .origins
            .get_or_insert_with(CountMap::default)
            .entry(name)
            .or_insert(0) += 1;
        self.events += 1;
    }

    pub fn increment_topic(&mut self, name: Ustr) {
        *self
            .topics
            .get_or_insert_with(CountMap::default)
            .entry(name)
            .or_insert(0) += 1;
        self.events += 1;
    }

    pub fn origin_counts(&self) -> impl Iterator<Item = (Ustr, u64)> + '_ {
        self.origins
            .iter()
            .flat_map(|m| m.iter().map(|(k, v)| (*k, *v)))
    }

    pub fn topic_counts(&self) -> impl Iterator<Item = (Ustr, u64)> + '_ {
        self.topics
            .iter()
            .flat_map(|m| m.iter().map(|(k, v)| (*k, *v)))
    }

    /// Names with a non-zero origin count.
    pub fn origins(&self) -> impl Iterator<Item = Ustr> + '_ {
        self.origin_counts()
            .filter(|(_, count)| *count > 0)
            .map(|(name, _)| name)
    }

    #[must_use]
    pub fn origin_total(&self) -> u64 {
        self.origin_counts().map(|(_, c)| c).sum()
    }

    #[must_use]
    pub fn topic_total(&self) -> u64 {
        self.topic_counts().map(|(_, c)| c).sum()
    }

    /// Number of increments applied since the last reset.
    #[must_use]
    pub fn events(&self) -> u64 {
        self.events
    }
}

impl Aggregate for ThroughputAggregate {
    fn reset(&mut self) {
        if let Some(origins) = self.origins.as_mut() {
            origins.clear();
        }
        if let Some(topics) = self.topics.as_mut() {
            topics.clear();
        }
        self.events = 0;
    }

    fn is_empty(&self) -> bool {
        self.events == 0
    }
}

/// Event counts per severity for one window.
///
/// Severity is a closed set, so a fixed array replaces the map entirely.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogLevelAggregate {
    levels: [u64; Severity::COUNT],
    events: u64,
}

impl LogLevelAggregate {
    pub fn increment_level(&mut self, level: Severity) {
        self.levels[level.index()] += 1;
        self.events += 1;
    }

    #[must_use]
    pub fn count(&self, level: Severity) -> u64 {
        self.levels[level.index()]
    }

    /// Non-zero counts in severity order.
    pub fn level_counts(&self) -> impl Iterator<Item = (Severity, u64)> + '_ {
        Severity::ALL
            .into_iter()
            .map(|level| (level, self.count(level)))
            .filter(|(_, count)| *count > 0)
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.events
    }

    #[must_use]
    pub fn errors(&self) -> u64 {
        self.level_counts()
            .filter(|(level, _)| level.is_error())
            .map(|(_, count)| count)
            .sum()
    }
}

impl Aggregate for LogLevelAggregate {
    fn reset(&mut self) {
        self.levels = [0; Severity::COUNT];
        self.events = 0;
    }

    fn is_empty(&self) -> bool {
        self.events == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ustr::ustr;

    #[test]
    fn test_new_throughput_is_empty_and_unallocated() {
        let agg = ThroughputAggregate::default();
        assert!(agg.is_empty());
        assert!(agg.origins.is_none());
        assert!(agg.topics.is_none());
        assert_eq!(agg.origin_total(), 0);
    }

    #[test]
    fn test_increment_origin_and_topic() {
        let mut agg = ThroughputAggregate::default();
        agg.increment_origin(ustr("svc-a"));
        agg.increment_origin(ustr("svc-a"));
        agg.increment_topic(ustr("orders"));

        assert!(!agg.is_empty());
        assert_eq!(agg.events(), 3);
        assert_eq!(agg.origin_total(), 2);
        assert_eq!(agg.topic_total(), 1);
        assert!(agg.topics.is_some());
    }

    #[test]
    fn test_reset_keeps_storage() {
        let mut agg = ThroughputAggregate::default();
        for i in 0..64 {
            agg.increment_origin(ustr(&format!("pod-{i}")));
        }
        let capacity = agg.origins.as_ref().map_or(0, |m| m.capacity());

        agg.reset();

        assert!(agg.is_empty());
        assert_eq!(agg.origin_total(), 0);
        let origins = agg.origins.as_ref().map(|m| (m.len(), m.capacity()));
        assert_eq!(origins, Some((0, capacity)));
    }

    #[test]
    fn test_level_counts() {
        let mut agg = LogLevelAggregate::default();
        agg.increment_level(Severity::Info);
        agg.increment_level(Severity::Error);
        agg.increment_level(Severity::Fatal);
        agg.increment_level(Severity::Error);

        assert_eq!(agg.total(), 4);
        assert_eq!(agg.errors(), 3);
        assert_eq!(
            agg.level_counts().collect::<Vec<_>>(),
            vec![
                (Severity::Info, 1),
                (Severity::Error, 2),
                (Severity::Fatal, 1)
            ]
        );

        agg.reset();
        assert!(agg.is_empty());
        assert_eq!(agg, LogLevelAggregate::default());
    }
}
