//! End-to-end persistence through the router.
//!
//! Tests:
//! - Row and column layouts produce the expected SQL
//! - Naming violations abort before any connection
//! - Grouping picks one rendition
//! - Connection loss and cache bounds

mod common;

use cistern::aggregator::AttrPersistence;
use cistern::model::{Attribute, BatchPair};
use cistern::router::{PersistReport, RouterConfig};
use cistern::store::MemoryStore;
use cistern::SinkError;
use common::{batch_of, car_event, literal_config, speed, TestSink};

#[test]
fn test_row_mode_scenario() {
    let sink = TestSink::new(literal_config(RouterConfig::default()));
    let mut batch = batch_of(vec![car_event("car1_car", vec![speed("112.9")])]);

    let report = sink.router.persist(Some(&mut batch)).unwrap();

    assert_eq!(report, PersistReport { destinations: 1, rows: 1 });
    let sql = sink.store.sql();
    assert_eq!(
        sql,
        vec![
            "CREATE DATABASE \"vehicles\"".to_string(),
            "CREATE SCHEMA \"4wheels\"".to_string(),
            "CREATE TABLE \"4wheels\".\"car1_car\" (recvTimeTs bigint,recvTime text,\
             fiwareservicepath text,entityId text,entityType text,attrName text,attrType text,\
             attrValue text,attrMd text)"
                .to_string(),
            "INSERT INTO \"4wheels\".\"car1_car\" (recvTimeTs,recvTime,fiwareservicepath,\
             entityId,entityType,attrName,attrType,attrValue,attrMd) VALUES ('1461136795123',\
             '2016-04-20T07:19:55.123Z','4wheels','car1','car','speed','float','112.9','[]')"
                .to_string(),
        ]
    );
}

#[test]
fn test_column_mode_scenario() {
    let store = MemoryStore::new();
    store.provision_table("vehicles", "4wheels", "car1_car");
    let sink = TestSink::with_store(
        store,
        literal_config(RouterConfig {
            attr_persistence: AttrPersistence::Column,
            ..RouterConfig::default()
        }),
    );
    let mut batch = batch_of(vec![
        car_event("car1_car", vec![speed("112.9")]),
        car_event("car1_car", vec![speed("115.0")]),
    ]);

    let report = sink.router.persist(Some(&mut batch)).unwrap();

    assert_eq!(report.rows, 2);
    assert_eq!(
        sink.store.sql(),
        vec![
            "INSERT INTO \"4wheels\".\"car1_car\" (recvTime,fiwareservicepath,entityId,entityType,\
             speed,speed_md) VALUES ('2016-04-20T07:19:55.123Z','4wheels','car1','car','112.9','[]'),\
             ('2016-04-20T07:19:55.123Z','4wheels','car1','car','115.0','[]')"
        ]
    );
}

#[test]
fn test_k_attributes_give_k_rows() {
    let sink = TestSink::new(RouterConfig::default());
    let attributes = vec![
        speed("112.9"),
        Attribute::new("oil_level", "float", "74.6"),
        Attribute::new("lights", "boolean", "true"),
    ];
    let mut batch = batch_of(vec![
        car_event("car1_car", attributes.clone()),
        car_event("car1_car", attributes),
    ]);

    let report = sink.router.persist(Some(&mut batch)).unwrap();

    assert_eq!(report.rows, 6);
    let insert = sink.store.statements().pop().unwrap();
    assert_eq!(insert.params.len(), 6 * 9);
    assert_eq!(sink.store.inserted_rows(), 6);
}

#[test]
fn test_long_service_never_connects() {
    let sink = TestSink::new(RouterConfig {
        max_name_len: 60,
        ..RouterConfig::default()
    });
    let mut event = car_event("car1_car", vec![speed("112.9")]);
    event.service = "x".repeat(77);
    let mut batch = batch_of(vec![event]);

    let err = sink.router.persist(Some(&mut batch)).unwrap_err();

    assert!(matches!(err, SinkError::Configuration(_)));
    assert!(!err.is_retriable());
    assert!(err.to_string().contains("dbName"));
    assert_eq!(sink.store.connections_opened(), 0);
    assert!(sink.router.gateway().cache().is_empty());
}

#[test]
fn test_grouping_persists_only_grouped_batch() {
    let sink = TestSink::new(RouterConfig {
        enable_grouping: true,
        ..RouterConfig::default()
    });
    let event = car_event("car1_car", vec![speed("112.9")]);
    let mut batches = BatchPair::new(
        Some(batch_of(vec![event.clone()])),
        Some(batch_of(vec![event.regrouped("fleet", "cars")])),
    );

    sink.router.persist_batches(&mut batches).unwrap();

    assert!(sink.store.has_table("vehicles", "fleet", "cars"));
    assert!(!sink.store.has_schema("vehicles", "4wheels"));
    assert_eq!(batches.default.unwrap().persisted_count(), 0);
    assert_eq!(batches.grouped.unwrap().persisted_count(), 1);
}

#[test]
fn test_lost_connection_reconnects_on_next_batch() {
    let sink = TestSink::new(RouterConfig::default());
    let mut first = batch_of(vec![car_event("car1_car", vec![speed("112.9")])]);
    sink.router.persist(Some(&mut first)).unwrap();
    let opened = sink.store.connections_opened();

    sink.store.expire_connections();
    let mut second = batch_of(vec![car_event("car1_car", vec![speed("115.0")])]);
    sink.router.persist(Some(&mut second)).unwrap();

    assert_eq!(sink.store.connections_opened(), opened * 2);
    assert_eq!(sink.store.inserted_rows(), 2);
}

#[test]
fn test_many_tenants_stay_within_cache_capacity() {
    let sink = TestSink::with_store(MemoryStore::permissive(), RouterConfig::default());

    for tenant in 0..10 {
        let mut event = car_event("car1_car", vec![speed("112.9")]);
        event.service = format!("tenant{tenant}");
        let mut batch = batch_of(vec![event]);
        sink.router.persist(Some(&mut batch)).unwrap();
    }

    let cache = sink.router.gateway().cache();
    assert_eq!(cache.len(), cache.capacity());
    assert!(cache.contains("tenant9"));
    assert!(!cache.contains("tenant0"));
    assert_eq!(
        sink.store.connections_opened() - sink.store.connections_closed(),
        cache.capacity()
    );
}
