//! JSON-lines intake against a worker thread.
//!
//! Tests:
//! - File input is batched and persisted
//! - Grouping overrides route records to the grouped tables
//! - Shutdown flushes what was read
//! - Shutdown is not held up by an idle input

mod common;

use cistern::aggregator::AttrPersistence;
use cistern::ingest::{run_ingest, IngestConfig, IngestRecord};
use cistern::router::RouterConfig;
use cistern::store::MemoryStore;
use common::{car_event, record, speed, InputFile, TestSink};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;

fn ingest_config(batch_size: usize) -> IngestConfig {
    IngestConfig {
        batch_size,
        batch_timeout: Duration::from_secs(60),
        max_retries: 1,
        retry_backoff: Duration::from_millis(1),
    }
}

#[tokio::test]
async fn test_file_intake_persists_every_record() {
    let records: Vec<IngestRecord> = (0..7)
        .map(|i| record(car_event(&format!("car{}_car", i % 3), vec![speed("112.9")])))
        .collect();
    let input = InputFile::new(&records, &["{\"truncated\":"]);
    let (store, worker) = TestSink::new(RouterConfig::default()).spawn();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let stats = run_ingest(
        input.open().await,
        &worker.handle(),
        &ingest_config(3),
        shutdown_rx,
    )
    .await
    .unwrap();

    assert_eq!(stats.records, 7);
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.batches_persisted, 3);
    assert_eq!(store.inserted_rows(), 7);
    for table in ["car0_car", "car1_car", "car2_car"] {
        assert!(store.has_table("vehicles", "4wheels", table));
    }

    worker.handle().shutdown().await.unwrap();
    tokio::task::spawn_blocking(move || worker.join())
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_grouping_overrides_route_records() {
    let mut grouped = record(car_event("car1_car", vec![speed("112.9")]));
    grouped.grouped_service_path = Some("fleet".into());
    grouped.grouped_destination = Some("cars".into());
    let plain = record(car_event("car2_car", vec![speed("80.0")]));
    let input = InputFile::new(&[grouped, plain], &[]);

    let (store, worker) = TestSink::new(RouterConfig {
        enable_grouping: true,
        ..RouterConfig::default()
    })
    .spawn();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    run_ingest(
        input.open().await,
        &worker.handle(),
        &ingest_config(10),
        shutdown_rx,
    )
    .await
    .unwrap();

    assert!(store.has_table("vehicles", "fleet", "cars"));
    assert!(store.has_table("vehicles", "4wheels", "car2_car"));
    assert!(!store.has_table("vehicles", "4wheels", "car1_car"));
}

#[tokio::test]
async fn test_column_mode_rejection_is_dropped() {
    let input = InputFile::new(&[record(car_event("car1_car", vec![speed("112.9")]))], &[]);
    let (store, worker) = TestSink::new(RouterConfig {
        attr_persistence: AttrPersistence::Column,
        ..RouterConfig::default()
    })
    .spawn();
    store.provision_table("vehicles", "4wheels", "other");
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let stats = run_ingest(
        input.open().await,
        &worker.handle(),
        &ingest_config(10),
        shutdown_rx,
    )
    .await
    .unwrap();

    assert_eq!(stats.batches_dropped, 1);
    assert_eq!(stats.retries, 0);
    assert_eq!(store.inserted_rows(), 0);
}

#[tokio::test]
async fn test_shutdown_flushes_pending_records() {
    let (store, worker) = TestSink::with_store(MemoryStore::permissive(), RouterConfig::default())
        .spawn();
    let handle = worker.handle();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (mut writer, reader) = tokio::io::duplex(4096);

    let intake = tokio::spawn(async move {
        run_ingest(
            tokio::io::BufReader::new(reader),
            &handle,
            &ingest_config(100),
            shutdown_rx,
        )
        .await
    });

    let line = serde_json::to_string(&record(car_event("car1_car", vec![speed("112.9")]))).unwrap();
    writer.write_all(format!("{line}\n").as_bytes()).await.unwrap();
    writer.flush().await.unwrap();

    // The input stays open and the batch is neither full nor due, so nothing
    // reaches the store until shutdown.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(store.statements().is_empty());
    shutdown_tx.send(true).unwrap();

    let stats = intake.await.unwrap().unwrap();
    assert_eq!(stats.records, 1);
    assert_eq!(stats.batches_persisted, 1);
    assert_eq!(store.inserted_rows(), 1);
    drop(writer);
}

#[tokio::test]
async fn test_shutdown_returns_while_input_is_idle() {
    let (store, worker) = TestSink::with_store(MemoryStore::permissive(), RouterConfig::default())
        .spawn();
    let handle = worker.handle();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    // The write half stays alive and silent, so reads never complete.
    let (writer, reader) = tokio::io::duplex(64);

    let intake = tokio::spawn(async move {
        run_ingest(
            tokio::io::BufReader::new(reader),
            &handle,
            &ingest_config(100),
            shutdown_rx,
        )
        .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(true).unwrap();

    let stats = tokio::time::timeout(Duration::from_secs(2), intake)
        .await
        .expect("intake did not stop after shutdown")
        .unwrap()
        .unwrap();
    assert_eq!(stats.lines, 0);
    assert_eq!(stats.records, 0);
    assert!(store.statements().is_empty());

    worker.handle().shutdown().await.unwrap();
    tokio::task::spawn_blocking(move || worker.join())
        .await
        .unwrap()
        .unwrap();
    drop(writer);
}
