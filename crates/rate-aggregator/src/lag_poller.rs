// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Periodic refresh of the consumer-lag table.
//!
//! The lag backend is external; it only has to implement [`LagSource`]. Each
//! poll runs under its own timeout. A failed or slow poll leaves the table as
//! it was, so readers keep seeing the last good snapshot.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::aggregator::Aggregator;
use crate::errors::LagSourceError;
use crate::lag::LagEntry;

#[async_trait]
pub trait LagSource: Send + Sync {
    /// Current lag for every partition the backend knows about.
    async fn fetch(&self) -> Result<Vec<LagEntry>, LagSourceError>;
}

/// Reads a JSON array of [`LagEntry`] from a file on every poll.
#[derive(Clone, Debug)]
pub struct FileLagSource {
    path: PathBuf,
}

impl FileLagSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl LagSource for FileLagSource {
    async fn fetch(&self) -> Result<Vec<LagEntry>, LagSourceError> {
        let raw = tokio::fs::read(&self.path).await?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// Snapshot applied; carries the entry count.
    Applied(usize),
    Failed,
    TimedOut,
}

pub struct LagPoller<S> {
    source: S,
    aggregator: Arc<Aggregator>,
    interval: Duration,
    timeout: Duration,
}

impl<S: LagSource> LagPoller<S> {
    pub fn new(
        source: S,
        aggregator: Arc<Aggregator>,
        poll_interval: Duration,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            source,
            aggregator,
            interval: poll_interval,
            timeout: poll_timeout,
        }
    }

    pub async fn poll_once(&self) -> PollOutcome {
        match timeout(self.timeout, self.source.fetch()).await {
            Ok(Ok(entries)) => {
                let count = entries.len();
                self.aggregator.update_lag(entries);
                debug!("Lag poll applied {count} entries");
                PollOutcome::Applied(count)
            }
            Ok(Err(e)) => {
                warn!("Lag poll failed, keeping previous snapshot: {e}");
                PollOutcome::Failed
            }
            Err(_) => {
                warn!(
                    "Lag poll timed out after {:?}, keeping previous snapshot",
                    self.timeout
                );
                PollOutcome::TimedOut
            }
        }
    }

    /// Polls immediately, then every interval, until `cancel_token` fires.
    pub async fn run(self, cancel_token: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                () = cancel_token.cancelled() => {
                    debug!("Lag poller stopped");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::lag::LagSummary;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    struct ScriptedSource {
        calls: AtomicUsize,
        delay: Duration,
        fail_on: Option<usize>,
    }

    impl ScriptedSource {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
                fail_on: None,
            }
        }
    }

    #[async_trait]
    impl LagSource for ScriptedSource {
        async fn fetch(&self) -> Result<Vec<LagEntry>, LagSourceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail_on == Some(call) {
                return Err(LagSourceError::Unavailable("broker down".to_string()));
            }
            let lag = u64::try_from(call).unwrap() * 10 + 5;
            Ok(vec![LagEntry::new("g", "orders", 0, lag)])
        }
    }

    fn aggregator() -> Arc<Aggregator> {
        Arc::new(Aggregator::new(1_000, Arc::new(ManualClock::new(0))).unwrap())
    }

    fn poller(source: ScriptedSource, aggregator: &Arc<Aggregator>) -> LagPoller<ScriptedSource> {
        LagPoller::new(
            source,
            Arc::clone(aggregator),
            Duration::from_secs(10),
            Duration::from_millis(50),
        )
    }

    #[tokio::test]
    async fn test_poll_once_applies_snapshot() {
        let aggregator = aggregator();
        let poller = poller(ScriptedSource::new(), &aggregator);

        assert_eq!(poller.poll_once().await, PollOutcome::Applied(1));
        assert_eq!(aggregator.kafka_lag_summary().low, 5);
        assert_eq!(poller.poll_once().await, PollOutcome::Applied(1));
        assert_eq!(aggregator.kafka_lag_summary().medium, 15);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failure_keeps_previous_snapshot() {
        let aggregator = aggregator();
        let source = ScriptedSource {
            fail_on: Some(1),
            ..ScriptedSource::new()
        };
        let poller = poller(source, &aggregator);

        assert_eq!(poller.poll_once().await, PollOutcome::Applied(1));
        assert_eq!(poller.poll_once().await, PollOutcome::Failed);
        assert!(logs_contain("broker down"));
        assert_eq!(
            aggregator.kafka_lag_summary(),
            LagSummary {
                high: 0,
                medium: 0,
                low: 5
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_previous_snapshot() {
        let aggregator = aggregator();
        aggregator.update_lag(vec![LagEntry::new("g", "orders", 0, 7)]);
        let source = ScriptedSource {
            delay: Duration::from_secs(1),
            ..ScriptedSource::new()
        };
        let poller = poller(source, &aggregator);

        assert_eq!(poller.poll_once().await, PollOutcome::TimedOut);
        assert_eq!(aggregator.partition_lag_details(false)[0].lag, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_polls_until_cancelled() {
        let aggregator = aggregator();
        let poller = poller(ScriptedSource::new(), &aggregator);
        let cancel_token = CancellationToken::new();
        let task = tokio::spawn(poller.run(cancel_token.clone()));

        // First tick is immediate, then one per 10s
        tokio::time::sleep(Duration::from_secs(25)).await;
        cancel_token.cancel();
        task.await.unwrap();

        // Calls 0, 1, 2 -> last lag is 25
        assert_eq!(aggregator.kafka_lag_summary().medium, 25);
    }

    #[tokio::test]
    async fn test_file_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"group":"g","topic":"orders","partition":0,"lag":150}},
               {{"groupId":"g","topic":"orders","partition":1,"lag":0}}]"#
        )
        .unwrap();

        let entries = FileLagSource::new(file.path()).fetch().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], LagEntry::new("g", "orders", 0, 150));
    }

    #[tokio::test]
    async fn test_file_source_errors() {
        let missing = FileLagSource::new("/nonexistent/lag.json").fetch().await;
        assert!(matches!(missing, Err(LagSourceError::Io(_))));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let garbage = FileLagSource::new(file.path()).fetch().await;
        assert!(matches!(garbage, Err(LagSourceError::Decode(_))));
    }
}
