//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};

use duckdb_async::adapter::{Callback, Completion};
use duckdb_async::config::{ConfigRecord, DatabasePath};
use duckdb_async::native::{
    Binding, BulkUdf, ConnectionHandle, DatabaseHandle, NativeConnection, NativeDatabase,
    NativeStatement, ReplacementScanHandler, RowCallback, ScalarUdf, StatementHandle,
};
use duckdb_async::stream::{BatchStream, ResultStream, RowStream};
use duckdb_async::types::{ColumnInfo, Params, RecordBatches, Rows};
use duckdb_async::{DuckDbError, DuckDbResult};
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Route `tracing` output to the test harness. Filter with `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Log of engine calls made through a [`RecordingBinding`].
#[derive(Default)]
pub struct Recorder {
    calls: Mutex<Vec<String>>,
    records: Mutex<Vec<ConfigRecord>>,
    fail_open: AtomicBool,
    fail_close: AtomicBool,
}

impl Recorder {
    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    /// Option records received by `open`, in order.
    pub fn records(&self) -> Vec<ConfigRecord> {
        self.records.lock().clone()
    }

    pub fn fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Make the next close be refused by the engine.
    pub fn fail_next_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }
}

/// An engine build that records every call and answers immediately.
#[derive(Debug, Clone)]
pub struct RecordingBinding {
    recorder: Arc<Recorder>,
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("calls", &self.calls.lock().len())
            .finish()
    }
}

impl RecordingBinding {
    pub fn new() -> (Arc<dyn Binding>, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let binding = Arc::new(Self {
            recorder: recorder.clone(),
        });
        (binding, recorder)
    }
}

impl Binding for RecordingBinding {
    fn name(&self) -> &str {
        "recording"
    }

    fn open(&self, path: &DatabasePath, record: &ConfigRecord, done: Callback<DatabaseHandle>) {
        self.recorder.record(format!("open {}", path.as_str()));
        self.recorder.records.lock().push(record.clone());
        if self.recorder.fail_open.load(Ordering::SeqCst) {
            done(Err(DuckDbError::connection("refused")));
            return;
        }
        done(Ok(Arc::new(MockHandle::new(&self.recorder, "db"))));
    }
}

/// Database or connection handle of a [`RecordingBinding`].
pub struct MockHandle {
    recorder: Arc<Recorder>,
    prefix: &'static str,
}

impl MockHandle {
    fn new(recorder: &Arc<Recorder>, prefix: &'static str) -> Self {
        Self {
            recorder: recorder.clone(),
            prefix,
        }
    }

    fn record(&self, op: &str) {
        self.recorder.record(format!("{}.{}", self.prefix, op));
    }

    fn statement(&self) -> StatementHandle {
        Arc::new(MockStatement {
            recorder: self.recorder.clone(),
        })
    }
}

fn empty_stream<T>() -> ResultStream<T> {
    let (_tx, stream) = ResultStream::channel(1);
    stream
}

impl NativeConnection for MockHandle {
    fn all(&self, _sql: &str, _params: Params, done: Callback<Rows>) {
        self.record("all");
        done(Ok(Vec::new()));
    }

    fn arrow_ipc_all(&self, _sql: &str, _params: Params, done: Callback<RecordBatches>) {
        self.record("arrow_ipc_all");
        done(Ok(Vec::new()));
    }

    fn each(&self, _sql: &str, _params: Params, _on_row: RowCallback, done: Callback<usize>) {
        self.record("each");
        done(Ok(0));
    }

    fn exec(&self, _sql: &str, _params: Params, done: Callback<()>) {
        self.record("exec");
        done(Ok(()));
    }

    fn prepare(&self, _sql: &str, _params: Params, done: Completion<StatementHandle>) -> StatementHandle {
        self.record("prepare");
        let handle = self.statement();
        done.complete(Ok(handle.clone()));
        handle
    }

    fn run(&self, _sql: &str, _params: Params, done: Completion<StatementHandle>) -> StatementHandle {
        self.record("run");
        let handle = self.statement();
        done.complete(Ok(handle.clone()));
        handle
    }

    fn stream(&self, _sql: &str, _params: Params) -> DuckDbResult<RowStream> {
        self.record("stream");
        Ok(empty_stream())
    }

    fn arrow_ipc_stream(&self, _sql: &str, _params: Params) -> DuckDbResult<BatchStream> {
        self.record("arrow_ipc_stream");
        Ok(empty_stream())
    }

    fn register_udf(&self, _name: &str, _return_type: &str, _fun: ScalarUdf) -> DuckDbResult<()> {
        self.record("register_udf");
        Ok(())
    }

    fn register_bulk(&self, _name: &str, _return_type: &str, _fun: BulkUdf) -> DuckDbResult<()> {
        self.record("register_bulk");
        Ok(())
    }

    fn unregister_udf(&self, _name: &str, done: Callback<()>) {
        self.record("unregister_udf");
        done(Ok(()));
    }

    fn register_buffer(&self, _name: &str, _batches: RecordBatches, _force: bool, done: Callback<()>) {
        self.record("register_buffer");
        done(Ok(()));
    }

    fn unregister_buffer(&self, _name: &str, done: Callback<()>) {
        self.record("unregister_buffer");
        done(Ok(()));
    }

    fn close(&self, done: Callback<()>) {
        self.record("close");
        if self.recorder.fail_close.swap(false, Ordering::SeqCst) {
            done(Err(DuckDbError::connection("busy")));
        } else {
            done(Ok(()));
        }
    }
}

impl NativeDatabase for MockHandle {
    fn connect(&self, done: Callback<ConnectionHandle>) {
        self.record("connect");
        done(Ok(Arc::new(MockHandle::new(&self.recorder, "conn"))));
    }

    fn serialize(&self, done: Callback<()>) {
        self.record("serialize");
        done(Ok(()));
    }

    fn parallelize(&self, done: Callback<()>) {
        self.record("parallelize");
        done(Ok(()));
    }

    fn wait(&self, done: Callback<()>) {
        self.record("wait");
        done(Ok(()));
    }

    fn interrupt(&self) -> DuckDbResult<()> {
        self.record("interrupt");
        Ok(())
    }

    fn register_replacement_scan(&self, _handler: ReplacementScanHandler) -> DuckDbResult<()> {
        self.record("register_replacement_scan");
        Ok(())
    }
}

/// Statement handle of a [`RecordingBinding`].
pub struct MockStatement {
    recorder: Arc<Recorder>,
}

impl NativeStatement for MockStatement {
    fn all(&self, _params: Params, done: Callback<Rows>) {
        self.recorder.record("stmt.all");
        done(Ok(Vec::new()));
    }

    fn arrow_ipc_all(&self, _params: Params, done: Callback<RecordBatches>) {
        self.recorder.record("stmt.arrow_ipc_all");
        done(Ok(Vec::new()));
    }

    fn each(&self, _params: Params, _on_row: RowCallback, done: Callback<usize>) {
        self.recorder.record("stmt.each");
        done(Ok(0));
    }

    fn run(&self, _params: Params, done: Completion<()>) {
        self.recorder.record("stmt.run");
        done.complete(Ok(()));
    }

    fn finalize(&self, done: Callback<()>) {
        self.recorder.record("stmt.finalize");
        done(Ok(()));
    }

    fn columns(&self) -> Option<Vec<ColumnInfo>> {
        Some(vec![ColumnInfo {
            name: "x".to_string(),
            type_name: "INTEGER".to_string(),
        }])
    }
}
