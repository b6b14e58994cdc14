// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use rate_aggregator::{
    aggregator_service::{IngestHandle, IngestService},
    config::AggregatorConfig,
    constants::SUPPORTED_RETENTION_MINUTES,
    errors::IngestError,
    lag_poller::{FileLagSource, LagPoller},
    Aggregator, Event,
};

#[tokio::main]
pub async fn main() {
    let config = match AggregatorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            init_logging("info");
            error!("Invalid configuration, shutting down: {e}");
            return;
        }
    };

    init_logging(&config.log_level);
    debug!("Logging subsystem enabled");

    let aggregator = match Aggregator::with_system_clock(config.target_points) {
        Ok(aggregator) => Arc::new(aggregator),
        Err(e) => {
            error!("Failed to create aggregator: {e}");
            return;
        }
    };

    let (service, handle) = IngestService::new(Arc::clone(&aggregator), config.ingest_queue_size);
    let service_task = tokio::spawn(service.run());

    let cancel_token = CancellationToken::new();

    if let Some(path) = config.lag_snapshot_path.clone() {
        info!("Polling consumer lag from {}", path.display());
        let poller = LagPoller::new(
            FileLagSource::new(path),
            Arc::clone(&aggregator),
            config.lag_poll_interval,
            config.lag_poll_timeout,
        );
        tokio::spawn(poller.run(cancel_token.clone()));
    } else {
        debug!("RATE_LAG_SNAPSHOT_PATH not set, lag polling disabled");
    }

    let reporter = tokio::spawn(report_loop(
        Arc::clone(&aggregator),
        handle.clone(),
        config.report_interval,
        cancel_token.clone(),
    ));

    tokio::select! {
        () = read_events(handle.clone()) => {
            debug!("Input closed");
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {e}");
            }
            debug!("Received shutdown signal");
        }
    }

    cancel_token.cancel();
    if let Err(e) = handle.flush().await {
        warn!("Failed to flush pending events: {e}");
    }
    if let Err(e) = reporter.await {
        error!("Reporter task failed: {e}");
    }
    report(&aggregator, &handle);

    if let Err(e) = handle.shutdown().await {
        warn!("Ingest service already stopped: {e}");
    }
    if let Err(e) = service_task.await {
        error!("Ingest service task failed: {e}");
    }
    info!("Shut down");
}

fn init_logging(log_level: &str) {
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install log subscriber: {e}");
    }
}

/// Feeds newline-delimited JSON events from stdin until EOF.
///
/// Events carrying a timestamp are replayed at that time; the rest are
/// stamped on arrival.
async fn read_events(handle: IngestHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_number: u64 = 0;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read input: {e}");
                break;
            }
        };
        line_number += 1;

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let event: Event = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                warn!("Skipping malformed event on line {line_number}: {e}");
                continue;
            }
        };

        let result = if event.timestamp_ms() > 0 {
            handle.replay(event)
        } else {
            handle.record(event)
        };
        match result {
            // Already counted and logged by the handle
            Ok(()) | Err(IngestError::QueueFull) => {}
            Err(IngestError::Closed) => {
                error!("Ingest service stopped, no longer reading input");
                break;
            }
        }
    }
}

async fn report_loop(
    aggregator: Arc<Aggregator>,
    handle: IngestHandle,
    report_interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = interval(report_interval);
    ticker.tick().await; // discard first tick, which is instantaneous

    loop {
        tokio::select! {
            _ = ticker.tick() => report(&aggregator, &handle),
            () = cancel_token.cancelled() => break,
        }
    }
}

fn report(aggregator: &Aggregator, handle: &IngestHandle) {
    for minutes in SUPPORTED_RETENTION_MINUTES {
        let metrics = aggregator.aggregated_metrics(minutes);
        info!(
            "{minutes}m: {} messages, {} errors, {:.2} events/s",
            metrics.total_messages, metrics.total_errors, metrics.average_throughput
        );
    }

    let lag = aggregator.kafka_lag_summary();
    info!(
        "Active pods: {}, lag high={} medium={} low={}",
        aggregator.active_pods_count(),
        lag.high,
        lag.medium,
        lag.low
    );

    let queue_drops = handle.dropped_events();
    let late_drops = aggregator.dropped_late_events();
    let range_drops = aggregator.dropped_out_of_range_events();
    if queue_drops > 0 || late_drops > 0 || range_drops > 0 {
        warn!(
            "Dropped events: {queue_drops} on a full queue, {late_drops} too late to place, \
             {range_drops} with out of range timestamps"
        );
    }
}
