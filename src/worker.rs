//! Dedicated sink thread.
//!
//! The store client is blocking, so one OS thread owns the [`BatchRouter`]
//! (and through it the connection cache). Async callers talk to it through a
//! bounded channel; every command carries a oneshot for its reply.

use std::thread::{self, JoinHandle};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::error::SinkError;
use crate::model::BatchPair;
use crate::router::{BatchRouter, PersistReport};

/// Errors surfaced to worker clients.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("sink worker is not running")]
    ChannelClosed,

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("sink worker thread panicked")]
    ThreadPanic,

    #[error("failed to spawn sink worker: {0}")]
    Spawn(#[from] std::io::Error),
}

impl WorkerError {
    /// Whether resubmitting the same batches may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Sink(e) if e.is_retriable())
    }
}

/// Result of one persist command.
///
/// The batches come back with their persisted flags updated, on failure too.
#[derive(Debug)]
pub struct PersistOutcome {
    pub batches: BatchPair,
    pub result: Result<PersistReport, SinkError>,
}

enum Command {
    Persist {
        batch_id: String,
        batches: BatchPair,
        reply: oneshot::Sender<PersistOutcome>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle for submitting work to the sink thread.
#[derive(Debug, Clone)]
pub struct SinkHandle {
    tx: mpsc::Sender<Command>,
}

impl SinkHandle {
    /// Persist `batches` and wait for the outcome.
    pub async fn submit(&self, batches: BatchPair) -> Result<PersistOutcome, WorkerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Persist {
                batch_id: crate::generate_batch_id(),
                batches,
                reply,
            })
            .await
            .map_err(|_| WorkerError::ChannelClosed)?;
        rx.await.map_err(|_| WorkerError::ChannelClosed)
    }

    /// Persist `batches`, discarding them afterwards.
    pub async fn persist(&self, batches: BatchPair) -> Result<PersistReport, WorkerError> {
        Ok(self.submit(batches).await?.result?)
    }

    /// Ask the thread to stop once queued commands are processed.
    pub async fn shutdown(&self) -> Result<(), WorkerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Shutdown { reply })
            .await
            .map_err(|_| WorkerError::ChannelClosed)?;
        rx.await.map_err(|_| WorkerError::ChannelClosed)
    }
}

/// Owner of the sink thread.
#[derive(Debug)]
pub struct SinkWorker {
    handle: SinkHandle,
    thread: JoinHandle<()>,
}

impl SinkWorker {
    /// Spawn the sink thread.
    pub fn spawn(router: BatchRouter, channel_size: usize) -> Result<Self, WorkerError> {
        let (tx, rx) = mpsc::channel(channel_size.max(1));
        let thread = thread::Builder::new()
            .name("cistern-sink".into())
            .spawn(move || run(router, rx))?;

        Ok(Self {
            handle: SinkHandle { tx },
            thread,
        })
    }

    pub fn handle(&self) -> SinkHandle {
        self.handle.clone()
    }

    /// Wait for the thread to exit.
    ///
    /// The thread exits after a shutdown command or once every handle is
    /// dropped.
    pub fn join(self) -> Result<(), WorkerError> {
        drop(self.handle);
        self.thread.join().map_err(|_| WorkerError::ThreadPanic)
    }
}

fn run(router: BatchRouter, mut rx: mpsc::Receiver<Command>) {
    tracing::info!("Sink worker started");

    while let Some(command) = rx.blocking_recv() {
        match command {
            Command::Persist {
                batch_id,
                mut batches,
                reply,
            } => {
                let span = tracing::info_span!("batch", batch_id = %batch_id);
                let _enter = span.enter();

                let result = router.persist_batches(&mut batches);
                match &result {
                    Ok(report) => tracing::info!(
                        destinations = report.destinations,
                        rows = report.rows,
                        "Batch persisted"
                    ),
                    Err(e) => tracing::warn!(error = %e, retriable = e.is_retriable(), "Batch failed"),
                }
                if reply.send(PersistOutcome { batches, result }).is_err() {
                    tracing::debug!("Persist caller went away before the reply");
                }
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(());
                break;
            }
        }
    }

    let closed = router.gateway().cache().len();
    router.gateway().cache().clear();
    tracing::info!(closed_connections = closed, "Sink worker stopped");
}
