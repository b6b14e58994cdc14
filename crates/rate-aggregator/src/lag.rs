// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Consumer-group lag table.
//!
//! Entries are keyed by `(group, topic, partition)` and replaced wholesale on
//! every report. Nothing expires: a partition that stops being reported keeps
//! its last known lag until it is reported again.

use std::cmp::Reverse;

use derive_more::Display;
use fnv::FnvBuildHasher;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use ustr::Ustr;

use crate::constants::{HIGH_LAG_THRESHOLD, LOW_LAG_THRESHOLD, MEDIUM_LAG_THRESHOLD};

/// Latest lag reported for one partition of one consumer group.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct LagEntry {
    #[serde(alias = "groupId", alias = "group_id")]
    pub group: Ustr,
    pub topic: Ustr,
    pub partition: i32,
    pub lag: u64,
}

impl LagEntry {
    pub fn new(group: &str, topic: &str, partition: i32, lag: u64) -> Self {
        Self {
            group: Ustr::from(group),
            topic: Ustr::from(topic),
            partition,
            lag,
        }
    }

    #[must_use]
    pub fn key(&self) -> LagKey {
        LagKey {
            group: self.group,
            topic: self.topic,
            partition: self.partition,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
#[display("{group}/{topic}[{partition}]")]
pub struct LagKey {
    pub group: Ustr,
    pub topic: Ustr,
    pub partition: i32,
}

/// Lag summed per severity bucket.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LagSummary {
    pub high: u64,
    pub medium: u64,
    pub low: u64,
}

#[derive(Debug, Default)]
pub struct LagTable {
    entries: HashMap<LagKey, LagEntry, FnvBuildHasher>,
}

impl LagTable {
    /// Inserts or replaces every entry by key. Last write wins.
    pub fn upsert<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = LagEntry>,
    {
        for entry in entries {
            self.entries.insert(entry.key(), entry);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn summary(&self) -> LagSummary {
        let mut summary = LagSummary::default();
        for entry in self.entries.values() {
            match entry.lag {
                lag if lag >= HIGH_LAG_THRESHOLD => summary.high += lag,
                lag if lag >= MEDIUM_LAG_THRESHOLD => summary.medium += lag,
                lag if lag >= LOW_LAG_THRESHOLD => summary.low += lag,
                _ => {}
            }
        }
        summary
    }

    /// All entries sorted by lag, largest first.
    ///
    /// Equal lags are ordered by group, topic and partition.
    #[must_use]
    pub fn details(&self, hide_zero_lag: bool) -> Vec<LagEntry> {
        let mut details: Vec<LagEntry> = self
            .entries
            .values()
            .filter(|entry| !hide_zero_lag || entry.lag > 0)
            .cloned()
            .collect();
        details.sort_unstable_by(|a, b| {
            (Reverse(a.lag), a.group.as_str(), a.topic.as_str(), a.partition).cmp(&(
                Reverse(b.lag),
                b.group.as_str(),
                b.topic.as_str(),
                b.partition,
            ))
        });
        details
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample_table() -> LagTable {
        let mut table = LagTable::default();
        table.upsert(vec![
            LagEntry::new("billing", "orders", 0, 0),
            LagEntry::new("billing", "orders", 1, 5),
            LagEntry::new("billing", "orders", 2, 50),
            LagEntry::new("billing", "payments", 0, 150),
        ]);
        table
    }

    #[test]
    fn test_summary_buckets() {
        assert_eq!(
            sample_table().summary(),
            LagSummary {
                high: 150,
                medium: 50,
                low: 5
            }
        );
    }

    #[test]
    fn test_summary_bucket_edges() {
        let mut table = LagTable::default();
        table.upsert(vec![
            LagEntry::new("g", "t", 0, 100),
            LagEntry::new("g", "t", 1, 99),
            LagEntry::new("g", "t", 2, 10),
            LagEntry::new("g", "t", 3, 9),
            LagEntry::new("g", "t", 4, 1),
        ]);
        assert_eq!(
            table.summary(),
            LagSummary {
                high: 100,
                medium: 109,
                low: 10
            }
        );
    }

    #[test]
    fn test_upsert_last_write_wins() {
        let mut table = sample_table();
        table.upsert(vec![LagEntry::new("billing", "payments", 0, 3)]);
        assert_eq!(table.len(), 4);
        assert_eq!(
            table.summary(),
            LagSummary {
                high: 0,
                medium: 50,
                low: 8
            }
        );
    }

    #[test]
    fn test_upsert_empty_is_noop() {
        let mut table = sample_table();
        table.upsert(Vec::new());
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_same_partition_in_other_group_is_distinct() {
        let mut table = sample_table();
        table.upsert(vec![LagEntry::new("audit", "orders", 0, 7)]);
        assert_eq!(table.len(), 5);
    }

    #[test]
    fn test_details_sorted_and_filtered() {
        let table = sample_table();

        let all = table.details(false);
        let lags: Vec<u64> = all.iter().map(|e| e.lag).collect();
        assert_eq!(lags, vec![150, 50, 5, 0]);

        let non_zero = table.details(true);
        assert_eq!(non_zero.len(), 3);
        assert!(non_zero.iter().all(|e| e.lag > 0));
    }

    #[test]
    fn test_key_display() {
        let key = LagEntry::new("billing", "orders", 3, 1).key();
        assert_eq!(key.to_string(), "billing/orders[3]");
    }

    #[test]
    fn test_deserialize_group_id_alias() {
        let entry: LagEntry = serde_json::from_str(
            r#"{"groupId":"billing","topic":"orders","partition":1,"lag":12}"#,
        )
        .unwrap();
        assert_eq!(entry, LagEntry::new("billing", "orders", 1, 12));
    }
}
