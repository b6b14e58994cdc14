// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fixed-capacity, time-indexed circular buffer of aggregates.
//!
//! # Indexing
//!
//! A timestamp `t` belongs to the window starting at `t - (t mod w)` and that
//! window lives in slot `(start / w) mod capacity`. Since `capacity * w` spans
//! at least the retention, two windows that are both inside the retention
//! never share a slot.
//!
//! # Expiry
//!
//! Nothing is pruned eagerly. Reads skip slots whose window ended before
//! `now - retention`; the storage is recycled by the next write that maps to
//! the same index.
//!
//! ```text
//! slot:   0      1      2      3     ...  capacity-1
//!       [w=N ] [w=N+1] [w=N-998] ...       [w=N-1]
//!          ^ newest        ^ oldest live window
//! ```

use hashbrown::HashSet;
use std::hash::Hash;

use crate::aggregate::Aggregate;
use crate::window::WindowSpec;

#[derive(Clone, Debug, Default)]
struct RingSlot<A> {
    /// Start of the window the aggregate belongs to; `None` until first write.
    window_start: Option<i64>,
    aggregate: A,
}

/// Result of routing one write into the ring.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotUpdate {
    /// The slot already held this window.
    Updated,
    /// The slot held an older window (or nothing) and was recycled.
    Rolled,
    /// The slot holds a newer window; the write was discarded.
    Stale,
    /// The window containing the timestamp is not representable in epoch
    /// milliseconds; the write was discarded.
    OutOfRange,
}

/// One retention window's worth of time slots.
#[derive(Debug)]
pub struct RingBucket<A> {
    spec: WindowSpec,
    slots: Box<[RingSlot<A>]>,
}

impl<A: Aggregate> RingBucket<A> {
    #[must_use]
    pub fn new(spec: WindowSpec) -> Self {
        let slots = (0..spec.capacity())
            .map(|_| RingSlot::default())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { spec, slots }
    }

    #[must_use]
    pub fn spec(&self) -> &WindowSpec {
        &self.spec
    }

    /// `None` when the window start or end falls outside `i64`.
    fn locate(&self, timestamp_ms: i64) -> Option<(i64, usize)> {
        let window_ms = self.spec.window_ms();
        let window_start = timestamp_ms.checked_sub(timestamp_ms.rem_euclid(window_ms))?;
        window_start.checked_add(window_ms)?;
        let window_index = window_start.div_euclid(window_ms);
        let capacity = i64::try_from(self.slots.len()).ok()?;
        let idx = usize::try_from(window_index.rem_euclid(capacity)).ok()?;
        Some((window_start, idx))
    }

    /// Applies `mutate` to the aggregate of the window containing
    /// `timestamp_ms`, recycling the slot first if it belongs to an older
    /// window.
    ///
    /// A write aimed at a window older than the one currently occupying the
    /// slot (a full ring lap behind) is discarded and reported as
    /// [`SlotUpdate::Stale`]. Timestamps whose window overflows `i64` are
    /// reported as [`SlotUpdate::OutOfRange`].
    pub fn update<F>(&mut self, timestamp_ms: i64, mutate: F) -> SlotUpdate
    where
        F: FnOnce(&mut A),
    {
        let Some((window_start, idx)) = self.locate(timestamp_ms) else {
            return SlotUpdate::OutOfRange;
        };
        let slot = &mut self.slots[idx];

        let outcome = match slot.window_start {
            Some(start) if start == window_start => SlotUpdate::Updated,
            Some(start) if start > window_start => return SlotUpdate::Stale,
            _ => {
                slot.aggregate.reset();
                slot.window_start = Some(window_start);
                SlotUpdate::Rolled
            }
        };

        mutate(&mut slot.aggregate);
        outcome
    }

    /// Live, non-empty slots as `(window_end_ms, &aggregate)`, unordered.
    fn live(&self, now_ms: i64) -> impl Iterator<Item = (i64, &A)> + '_ {
        let cutoff = now_ms.saturating_sub(self.spec.retention_ms());
        let window_ms = self.spec.window_ms();
        self.slots.iter().filter_map(move |slot| {
            let start = slot.window_start?;
            let end = start.saturating_add(window_ms);
            (end > cutoff && !slot.aggregate.is_empty()).then_some((end, &slot.aggregate))
        })
    }

    /// Maps every live slot through `f`, ordered by window end ascending.
    pub fn collect_with<T, F>(&self, now_ms: i64, mut f: F) -> Vec<T>
    where
        F: FnMut(i64, &A) -> T,
    {
        let mut live: Vec<(i64, &A)> = self.live(now_ms).collect();
        live.sort_unstable_by_key(|(end, _)| *end);
        live.into_iter().map(|(end, agg)| f(end, agg)).collect()
    }

    /// Snapshot of every live slot as `(window_end_ms, aggregate)`, ordered by
    /// window end ascending.
    #[must_use]
    pub fn collect(&self, now_ms: i64) -> Vec<(i64, A)> {
        self.collect_with(now_ms, |end, agg| (end, agg.clone()))
    }

    /// Union of the keys `selector` yields across live slots.
    pub fn recent_keys<K, I, F>(&self, now_ms: i64, selector: F) -> HashSet<K>
    where
        K: Eq + Hash,
        I: IntoIterator<Item = K>,
        F: Fn(&A) -> I,
    {
        let mut keys = HashSet::new();
        for (_, agg) in self.live(now_ms) {
            keys.extend(selector(agg));
        }
        keys
    }
}
