//! Handle lifecycle tests against a recording engine.
//!
//! These verify that:
//! - factories only hand out ready handles
//! - operations on closed handles fail without reaching the engine
//! - teardown is forwarded at most once
//! - open options are normalized before the engine sees them

mod common;

use common::{init_tracing, RecordingBinding};
use duckdb_async::config::API_TAG;
use duckdb_async::{
    Connection, Database, DuckDbConfig, DuckDbError, OPEN_CREATE, OPEN_READONLY, OPEN_READWRITE,
};
use pretty_assertions::assert_eq;

async fn open_recorded() -> (Database, std::sync::Arc<common::Recorder>) {
    init_tracing();
    let (binding, recorder) = RecordingBinding::new();
    let db = Database::create_with(binding, ":memory:", OPEN_READWRITE)
        .await
        .unwrap();
    (db, recorder)
}

#[tokio::test]
async fn test_factory_resolves_ready_database() {
    let (db, recorder) = open_recorded().await;
    assert!(db.is_open());
    assert_eq!(db.binding_name(), "recording");
    assert_eq!(recorder.calls(), vec!["open :memory:"]);
}

#[tokio::test]
async fn test_factory_rejects_when_open_fails() {
    let (binding, recorder) = RecordingBinding::new();
    recorder.fail_open(true);
    let err = Database::create_with(binding, "/tmp/nowhere.duckdb", OPEN_READWRITE)
        .await
        .unwrap_err();
    assert!(matches!(err, DuckDbError::Connection(_)));
}

#[tokio::test]
async fn test_numeric_flags_are_normalized() {
    let (binding, recorder) = RecordingBinding::new();
    Database::create_with(binding.clone(), ":memory:", OPEN_READONLY)
        .await
        .unwrap();
    Database::create_with(binding.clone(), ":memory:", OPEN_READONLY | OPEN_CREATE)
        .await
        .unwrap();
    Database::create_with(binding, ":memory:", ())
        .await
        .unwrap();

    let modes: Vec<_> = recorder
        .records()
        .iter()
        .map(|r| r.get("access_mode").cloned().unwrap_or_default())
        .collect();
    assert_eq!(modes, vec!["read_only", "read_write", "read_write"]);
    for record in recorder.records() {
        assert_eq!(record.get("duckdb_api").map(String::as_str), Some(API_TAG));
    }
}

#[tokio::test]
async fn test_config_record_is_passed_through() {
    let (binding, recorder) = RecordingBinding::new();
    let config = DuckDbConfig::builder()
        .threads(2)
        .option("preserve_insertion_order", "false")
        .build();
    Database::create_with(binding, ":memory:", config).await.unwrap();

    let record = &recorder.records()[0];
    assert_eq!(record.get("threads").map(String::as_str), Some("2"));
    assert_eq!(
        record.get("preserve_insertion_order").map(String::as_str),
        Some("false")
    );
    assert_eq!(record.get("duckdb_api").map(String::as_str), Some(API_TAG));
}

#[tokio::test]
async fn test_closed_database_never_reaches_engine() {
    let (db, recorder) = open_recorded().await;
    db.close().await.unwrap();
    let before = recorder.calls().len();

    let errors = vec![
        db.all("SELECT 1", ()).await.unwrap_err(),
        db.arrow_ipc_all("SELECT 1", ()).await.unwrap_err(),
        db.exec("SELECT 1", ()).await.unwrap_err(),
        db.prepare("SELECT 1", ()).await.unwrap_err(),
        db.run("SELECT 1", ()).await.unwrap_err(),
        db.prepare_sync("SELECT 1", ()).unwrap_err(),
        db.run_sync("SELECT 1", ()).unwrap_err(),
        db.each("SELECT 1", (), |_| {}, |_| {}).unwrap_err(),
        db.stream("SELECT 1", ()).unwrap_err(),
        db.arrow_ipc_stream("SELECT 1", ()).unwrap_err(),
        db.register_udf("f", "INTEGER", |args| Ok(args[0].clone())).unwrap_err(),
        db.register_bulk("g", "INTEGER", |cols| Ok(cols[0].clone())).unwrap_err(),
        db.unregister_udf("f").await.unwrap_err(),
        db.register_buffer("b", Vec::new(), false).await.unwrap_err(),
        db.unregister_buffer("b").await.unwrap_err(),
        db.serialize().await.unwrap_err(),
        db.parallelize().await.unwrap_err(),
        db.wait().await.unwrap_err(),
        db.interrupt().unwrap_err(),
        db.register_replacement_scan(|_| None).unwrap_err(),
        db.connect().await.unwrap_err(),
    ];

    for err in &errors {
        assert!(err.is_uninitialized(), "unexpected error: {err}");
        assert!(err.to_string().starts_with("Database."));
    }
    assert_eq!(
        errors[0].to_string(),
        "Database.all: uninitialized database"
    );
    assert_eq!(
        errors.last().unwrap().to_string(),
        "Database.connect: uninitialized database"
    );
    assert_eq!(recorder.calls().len(), before);
}

#[tokio::test]
async fn test_double_close_is_not_forwarded() {
    let (db, recorder) = open_recorded().await;
    db.close().await.unwrap();

    let err = db.close().await.unwrap_err();
    assert_eq!(err.to_string(), "Database.close: uninitialized database");
    assert_eq!(recorder.count("db.close"), 1);
}

#[tokio::test]
async fn test_concurrent_close_releases_once() {
    let (db, recorder) = open_recorded().await;
    let first = db.close();
    let second = db.close();

    let (a, b) = futures::join!(first, second);
    assert!(a.is_ok());
    assert!(b.unwrap_err().is_uninitialized());
    assert_eq!(recorder.count("db.close"), 1);
}

#[tokio::test]
async fn test_refused_close_keeps_handle() {
    let (db, recorder) = open_recorded().await;
    recorder.fail_next_close();

    assert!(matches!(db.close().await, Err(DuckDbError::Connection(_))));
    assert!(db.is_open());
    db.exec("SELECT 1", ()).await.unwrap();

    db.close().await.unwrap();
    assert_eq!(recorder.count("db.close"), 2);
}

#[tokio::test]
async fn test_connection_lifecycle() {
    let (db, recorder) = open_recorded().await;
    let conn = Connection::create(&db).await.unwrap();
    assert!(conn.is_open());

    conn.exec("SELECT 1", ()).await.unwrap();
    conn.close().await.unwrap();

    let err = conn.all("SELECT 1", ()).await.unwrap_err();
    assert_eq!(err.to_string(), "Connection.all: uninitialized connection");
    assert!(conn.close().await.unwrap_err().is_uninitialized());

    assert_eq!(recorder.count("db.connect"), 1);
    assert_eq!(recorder.count("conn.exec"), 1);
    assert_eq!(recorder.count("conn.close"), 1);
    assert_eq!(recorder.count("conn.all"), 0);
}

#[tokio::test]
async fn test_connection_outlives_database() {
    let (db, recorder) = open_recorded().await;
    let conn = db.connect().await.unwrap();
    db.close().await.unwrap();

    conn.all("SELECT 1", ()).await.unwrap();
    assert_eq!(recorder.count("conn.all"), 1);
}

#[tokio::test]
async fn test_statement_finalize_guards_operations() {
    let (db, recorder) = open_recorded().await;
    let stmt = db.prepare("SELECT ?", (1,)).await.unwrap();
    assert_eq!(stmt.columns().unwrap()[0].name, "x");

    let again = stmt.run((2,)).await.unwrap();
    again.run_sync((3,)).unwrap();
    stmt.finalize().await.unwrap();

    assert!(stmt.columns().is_none());
    let err = stmt.all(()).await.unwrap_err();
    assert_eq!(err.to_string(), "Statement.all: uninitialized statement");
    assert!(again.run(()).await.unwrap_err().is_uninitialized());
    assert!(stmt.run_sync(()).unwrap_err().is_uninitialized());
    assert!(stmt.each((), |_| {}, |_| {}).unwrap_err().is_uninitialized());
    assert!(stmt.finalize().await.unwrap_err().is_uninitialized());

    assert_eq!(recorder.count("stmt.run"), 2);
    assert_eq!(recorder.count("stmt.finalize"), 1);
    assert_eq!(recorder.count("stmt.all"), 0);
}

#[tokio::test]
async fn test_sync_variants_return_statement_immediately() {
    let (db, recorder) = open_recorded().await;
    let stmt = db.prepare_sync("SELECT 1", ()).unwrap();
    let ran = db.run_sync("INSERT INTO t VALUES (1)", ()).unwrap();

    stmt.all(()).await.unwrap();
    ran.finalize().await.unwrap();
    assert_eq!(recorder.count("db.prepare"), 1);
    assert_eq!(recorder.count("db.run"), 1);
}
