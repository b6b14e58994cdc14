// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Rate Aggregator
//!
//! Bounded-memory, multi-resolution aggregation of log and message-queue event
//! rates. Every event is fanned out to one fixed-capacity ring per supported
//! retention window (5, 15, 60, 360 and 1440 minutes), so any of those windows
//! can be read at any moment without rescanning history.
//!
//! ## Architecture
//!
//! ```text
//! producers ─┬─> Aggregator::record_event ──> RingBucket<ThroughputAggregate> x5
//!            │        (one mutex)         └─> RingBucket<LogLevelAggregate>  x5
//!            └─> IngestHandle ─(mpsc)─> IngestService ─┘
//!
//! LagSource ─> LagPoller ─> Aggregator::update_lag ──> LagTable
//!
//! readers <── throughput_series / rate / aggregated_metrics / kafka_lag_summary
//! ```
//!
//! - [`window`]: slot sizing per retention
//! - [`aggregate`]: per-slot counters
//! - [`ring`]: the time-indexed circular buffer
//! - [`aggregator`]: the public read/write surface
//! - [`aggregator_service`]: channel-fed single-writer front-end
//! - [`lag_poller`]: periodic consumer-lag refresh

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod aggregate;
pub mod aggregator;
pub mod aggregator_service;
pub mod clock;
pub mod config;
pub mod constants;
pub mod errors;
pub mod event;
pub mod lag;
pub mod lag_poller;
pub mod retention;
pub mod ring;
pub mod window;

pub use aggregator::Aggregator;
pub use event::{Event, LogEvent, QueueEvent, Severity};
pub use lag::LagEntry;
