//! JSON-lines intake.
//!
//! Reads one [`IngestRecord`] per line, accumulates records until the batch
//! is full or has waited long enough, then hands the default and grouped
//! batches to the sink worker.
//!
//! Failed batches are retried when the error is retriable, resending only
//! the destinations that were not persisted yet. Anything else is dropped
//! with an error log.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::watch;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;

use crate::model::{Batch, BatchPair, Event};
use crate::worker::{PersistOutcome, SinkHandle, WorkerError};

/// Batching and retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestConfig {
    /// Records per batch before a flush.
    pub batch_size: usize,
    /// Maximum time the first record of a batch waits for a flush.
    pub batch_timeout: Duration,
    /// Retries of a batch failing with a retriable error.
    pub max_retries: u32,
    /// Pause between retries.
    pub retry_backoff: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_timeout: Duration::from_millis(1000),
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// One input line: an event plus its optional grouped tenancy.
///
/// Without overrides the grouped rendition keeps the event's own
/// service-path and destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestRecord {
    #[serde(flatten)]
    pub event: Event,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouped_service_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouped_destination: Option<String>,
}

impl IngestRecord {
    /// The event as it lands in the grouped batch.
    pub fn grouped_event(&self) -> Event {
        self.event.regrouped(
            self.grouped_service_path
                .as_deref()
                .unwrap_or(&self.event.service_path),
            self.grouped_destination
                .as_deref()
                .unwrap_or(&self.event.destination),
        )
    }
}

/// Build both batch renditions from a run of records.
pub fn build_batches(records: Vec<IngestRecord>) -> BatchPair {
    let mut default = Batch::new();
    let mut grouped = Batch::new();
    for record in records {
        grouped.add(record.grouped_event());
        default.add(record.event);
    }
    BatchPair::new(Some(default), Some(grouped))
}

/// Counters for one intake run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub lines: u64,
    pub records: u64,
    pub malformed: u64,
    pub batches_persisted: u64,
    pub batches_dropped: u64,
    pub retries: u64,
    pub rows: u64,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to read input: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// Collects records until a size or time trigger fires.
#[derive(Debug)]
pub struct BatchAccumulator<T> {
    max_size: usize,
    max_delay: Duration,
    items: Vec<T>,
    batch_start: Option<Instant>,
}

impl<T> BatchAccumulator<T> {
    pub fn new(max_size: usize, max_delay: Duration) -> Self {
        let max_size = max_size.max(1);
        Self {
            max_size,
            max_delay,
            items: Vec::with_capacity(max_size),
            batch_start: None,
        }
    }

    /// Add an item. Returns true if the batch is now ready to flush.
    pub fn push(&mut self, item: T) -> bool {
        if self.batch_start.is_none() {
            self.batch_start = Some(Instant::now());
        }
        self.items.push(item);
        self.is_ready()
    }

    pub fn is_ready(&self) -> bool {
        if self.items.is_empty() {
            return false;
        }
        if self.items.len() >= self.max_size {
            return true;
        }
        self.batch_start
            .is_some_and(|start| start.elapsed() >= self.max_delay)
    }

    /// Time remaining until the batch should be flushed.
    ///
    /// Returns None if the batch is empty.
    pub fn time_until_ready(&self) -> Option<Duration> {
        if self.is_ready() {
            return Some(Duration::ZERO);
        }
        self.batch_start
            .map(|start| self.max_delay.saturating_sub(start.elapsed()))
    }

    pub fn drain(&mut self) -> Vec<T> {
        self.batch_start = None;
        std::mem::replace(&mut self.items, Vec::with_capacity(self.max_size))
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

/// Read records from `reader` until end of input or shutdown, persisting
/// them through `handle`.
///
/// Pending records are flushed before returning. Only read failures and a
/// stopped worker end the run with an error.
pub async fn run_ingest<R>(
    reader: R,
    handle: &SinkHandle,
    config: &IngestConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Result<IngestStats, IngestError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = LinesStream::new(reader.lines());
    let mut accumulator = BatchAccumulator::new(config.batch_size, config.batch_timeout);
    let mut stats = IngestStats::default();
    let mut shutdown_open = true;

    loop {
        if *shutdown.borrow() {
            tracing::info!("Shutdown requested, stopping intake");
            break;
        }

        let wait = accumulator.time_until_ready();
        tokio::select! {
            changed = shutdown.changed(), if shutdown_open => {
                // A dropped sender can no longer ask for shutdown.
                if changed.is_err() {
                    shutdown_open = false;
                }
            }
            () = tokio::time::sleep(wait.unwrap_or(Duration::ZERO)), if wait.is_some() => {
                tracing::debug!(records = accumulator.len(), "Batch timeout reached");
                flush(handle, config, accumulator.drain(), &mut stats).await?;
            }
            line = lines.next() => {
                let Some(line) = line else {
                    tracing::debug!("End of input");
                    break;
                };
                let line = line?;
                stats.lines += 1;
                if line.trim().is_empty() {
                    continue;
                }

                match serde_json::from_str::<IngestRecord>(&line) {
                    Ok(record) => {
                        stats.records += 1;
                        if accumulator.push(record) {
                            flush(handle, config, accumulator.drain(), &mut stats).await?;
                        }
                    }
                    Err(e) => {
                        stats.malformed += 1;
                        tracing::warn!(line = stats.lines, error = %e, "Skipping malformed record");
                    }
                }
            }
        }
    }

    if !accumulator.is_empty() {
        flush(handle, config, accumulator.drain(), &mut stats).await?;
    }

    tracing::info!(
        records = stats.records,
        malformed = stats.malformed,
        batches_persisted = stats.batches_persisted,
        batches_dropped = stats.batches_dropped,
        rows = stats.rows,
        "Intake finished"
    );
    Ok(stats)
}

async fn flush(
    handle: &SinkHandle,
    config: &IngestConfig,
    records: Vec<IngestRecord>,
    stats: &mut IngestStats,
) -> Result<(), IngestError> {
    let count = records.len();
    let mut batches = build_batches(records);
    let mut attempt = 0;

    loop {
        let PersistOutcome { batches: returned, result } = handle.submit(batches).await?;
        match result {
            Ok(report) => {
                stats.batches_persisted += 1;
                stats.rows += report.rows as u64;
                return Ok(());
            }
            Err(e) if e.is_retriable() && attempt < config.max_retries => {
                attempt += 1;
                stats.retries += 1;
                tracing::warn!(
                    error = %e,
                    attempt,
                    max_retries = config.max_retries,
                    "Retrying batch"
                );
                batches = returned;
                batches.retain_unpersisted();
                tokio::time::sleep(config.retry_backoff).await;
            }
            Err(e) => {
                stats.batches_dropped += 1;
                tracing::error!(
                    error = %e,
                    kind = e.kind(),
                    records = count,
                    attempts = attempt + 1,
                    "Dropping batch"
                );
                return Ok(());
            }
        }
    }
}
