// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Channel-fed single writer in front of an [`Aggregator`].
//!
//! Producers that must never wait on the aggregator lock send events through
//! an [`IngestHandle`]. The handle uses `try_send` on a bounded channel: when
//! the queue is full the event is dropped and counted instead of blocking the
//! producer. One [`IngestService`] task drains the channel into the shared
//! aggregator, so writes never contend with each other. Readers keep calling
//! the aggregator directly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::aggregator::Aggregator;
use crate::errors::IngestError;
use crate::event::Event;
use crate::lag::LagEntry;

#[derive(Debug)]
pub enum IngestCommand {
    /// Record at the given epoch-millisecond timestamp.
    Record(Event, i64),
    Replay(Event),
    UpdateLag(Vec<LagEntry>),
    RegisterPod(String),
    UnregisterPod(String),
    /// Acknowledged once every command sent before it has been applied.
    Flush(oneshot::Sender<()>),
    Shutdown,
}

#[derive(Clone, Debug)]
pub struct IngestHandle {
    tx: mpsc::Sender<IngestCommand>,
    dropped: Arc<AtomicU64>,
    aggregator: Arc<Aggregator>,
}

impl IngestHandle {
    fn try_send(&self, command: IngestCommand) -> Result<(), IngestError> {
        match self.tx.try_send(command) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                // Warn on powers of two so a saturated queue does not flood the log
                if dropped.is_power_of_two() {
                    warn!("Ingest queue full, {dropped} events dropped so far");
                }
                Err(IngestError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(IngestError::Closed),
        }
    }

    /// Queues `event` stamped with the current time, so a backlog does not
    /// shift it into a later window.
    pub fn record(&self, event: Event) -> Result<(), IngestError> {
        let now = self.aggregator.now_millis();
        self.try_send(IngestCommand::Record(event, now))
    }

    pub fn record_at(&self, event: Event, timestamp_ms: i64) -> Result<(), IngestError> {
        self.try_send(IngestCommand::Record(event, timestamp_ms))
    }

    pub fn replay(&self, event: Event) -> Result<(), IngestError> {
        self.try_send(IngestCommand::Replay(event))
    }

    /// Lag snapshots are infrequent and must not be lost, so this waits for
    /// queue space.
    pub async fn update_lag(&self, entries: Vec<LagEntry>) -> Result<(), IngestError> {
        self.tx
            .send(IngestCommand::UpdateLag(entries))
            .await
            .map_err(|_| IngestError::Closed)
    }

    pub async fn register_pod(&self, name: impl Into<String>) -> Result<(), IngestError> {
        self.tx
            .send(IngestCommand::RegisterPod(name.into()))
            .await
            .map_err(|_| IngestError::Closed)
    }

    pub async fn unregister_pod(&self, name: impl Into<String>) -> Result<(), IngestError> {
        self.tx
            .send(IngestCommand::UnregisterPod(name.into()))
            .await
            .map_err(|_| IngestError::Closed)
    }

    /// Waits until everything queued before this call has reached the
    /// aggregator.
    pub async fn flush(&self) -> Result<(), IngestError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(IngestCommand::Flush(response_tx))
            .await
            .map_err(|_| IngestError::Closed)?;
        response_rx.await.map_err(|_| IngestError::Closed)
    }

    pub async fn shutdown(&self) -> Result<(), IngestError> {
        self.tx
            .send(IngestCommand::Shutdown)
            .await
            .map_err(|_| IngestError::Closed)
    }

    /// Events rejected because the queue was full.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

pub struct IngestService {
    aggregator: Arc<Aggregator>,
    rx: mpsc::Receiver<IngestCommand>,
}

impl IngestService {
    #[must_use]
    pub fn new(aggregator: Arc<Aggregator>, queue_size: usize) -> (Self, IngestHandle) {
        // tokio panics on a zero-sized channel
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        let handle = IngestHandle {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
            aggregator: Arc::clone(&aggregator),
        };
        let service = Self { aggregator, rx };
        (service, handle)
    }

    pub async fn run(mut self) {
        debug!("Ingest service started");

        while let Some(command) = self.rx.recv().await {
            match command {
                IngestCommand::Record(event, timestamp_ms) => {
                    self.aggregator.record_event_at(&event, timestamp_ms);
                }
                IngestCommand::Replay(event) => self.aggregator.replay_event(&event),
                IngestCommand::UpdateLag(entries) => self.aggregator.update_lag(entries),
                IngestCommand::RegisterPod(name) => self.aggregator.register_active_pod(&name),
                IngestCommand::UnregisterPod(name) => {
                    self.aggregator.unregister_active_pod(&name);
                }
                IngestCommand::Flush(response_tx) => {
                    if response_tx.send(()).is_err() {
                        error!("Failed to acknowledge flush - receiver dropped");
                    }
                }
                IngestCommand::Shutdown => {
                    debug!("Ingest service shutting down");
                    break;
                }
            }
        }

        debug!("Ingest service stopped");
    }
}
