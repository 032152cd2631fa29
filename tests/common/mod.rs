//! Test utilities for Cistern integration tests.
//!
//! Provides:
//! - Event and batch fixtures
//! - Router and worker setup over an in-process store
//! - JSON-lines input files in a temporary directory

#![allow(dead_code)]

use cistern::cache::ConnectionCache;
use cistern::gateway::{InsertStyle, StorageGateway};
use cistern::ingest::IngestRecord;
use cistern::model::{Attribute, Batch, Event};
use cistern::router::{BatchRouter, RouterConfig};
use cistern::store::MemoryStore;
use cistern::worker::SinkWorker;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Receipt time used by every fixture: 2016-04-20T07:19:55.123Z.
pub const RECV_TIME_TS: i64 = 1_461_136_795_123;

/// An event for `vehicles`/`4wheels` with the given destination and attributes.
pub fn car_event(destination: &str, attributes: Vec<Attribute>) -> Event {
    Event {
        recv_time_ts: RECV_TIME_TS,
        service: "vehicles".into(),
        service_path: "4wheels".into(),
        destination: destination.into(),
        entity_id: "car1".into(),
        entity_type: "car".into(),
        attributes,
    }
}

pub fn speed(value: &str) -> Attribute {
    Attribute::new("speed", "float", value)
}

pub fn batch_of(events: Vec<Event>) -> Batch {
    events.into_iter().collect()
}

/// Router configuration sending the bit-exact legacy SQL text.
pub fn literal_config(router: RouterConfig) -> RouterConfig {
    RouterConfig {
        insert_style: InsertStyle::Literal,
        ..router
    }
}

/// A router, its store and nothing else.
pub struct TestSink {
    pub store: MemoryStore,
    pub router: BatchRouter,
}

impl TestSink {
    /// Router over a store that refuses unknown databases and tables.
    pub fn new(config: RouterConfig) -> Self {
        Self::with_store(MemoryStore::new(), config)
    }

    pub fn with_store(store: MemoryStore, config: RouterConfig) -> Self {
        cistern::observability::tracing::init_test_tracing();
        let cache = ConnectionCache::new(Arc::new(store.clone()), 4);
        let router = BatchRouter::new(StorageGateway::new(cache), config);
        Self { store, router }
    }

    /// Move the router onto its own thread.
    pub fn spawn(self) -> (MemoryStore, SinkWorker) {
        let worker = SinkWorker::spawn(self.router, 8).expect("failed to spawn worker");
        (self.store, worker)
    }
}

/// Temporary JSON-lines input file.
///
/// The directory is removed when the fixture is dropped.
pub struct InputFile {
    pub temp_dir: TempDir,
    pub path: PathBuf,
}

impl InputFile {
    /// Write `records` one per line, then `extra` lines verbatim.
    pub fn new(records: &[IngestRecord], extra: &[&str]) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let path = temp_dir.path().join("events.jsonl");
        let mut file = std::fs::File::create(&path).expect("failed to create input");
        for record in records {
            let line = serde_json::to_string(record).expect("failed to encode record");
            writeln!(file, "{line}").expect("failed to write input");
        }
        for line in extra {
            writeln!(file, "{line}").expect("failed to write input");
        }
        Self { temp_dir, path }
    }

    pub async fn open(&self) -> tokio::io::BufReader<tokio::fs::File> {
        let file = tokio::fs::File::open(&self.path)
            .await
            .expect("failed to open input");
        tokio::io::BufReader::new(file)
    }
}

pub fn record(event: Event) -> IngestRecord {
    IngestRecord {
        event,
        grouped_service_path: None,
        grouped_destination: None,
    }
}
