//! The DuckDB build shipped with this crate.
//!
//! Every handle runs on its own [`Worker`] thread; operations are queued as
//! jobs and complete by invoking their callbacks from that thread. A
//! database's own queries can be switched to run on cloned connections with
//! `parallelize`. Streams always produce from a cloned connection on a thread
//! of their own, so a half-read stream never holds up the handle's queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use duckdb::arrow::datatypes::{DataType, Schema};
use duckdb::{Connection, Statement, ToSql};
use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::udf::{self, ReturnKind, UdfBody};
use super::worker::{closed, Flow, InFlight, Interrupt, Session, Started, Worker};
use super::{
    Binding, BulkUdf, ConnectionHandle, DatabaseHandle, NativeConnection, NativeDatabase,
    NativeStatement, ReplacementScanHandler, RowCallback, ScalarUdf, StatementHandle,
};
use crate::adapter::{Callback, Completion};
use crate::config::{ConfigRecord, DatabasePath};
use crate::error::{DuckDbError, DuckDbResult};
use crate::stream::{BatchStream, ResultStream, RowStream, DEFAULT_STREAM_CAPACITY};
use crate::types::{
    duckdb_value_ref_to_json, ColumnInfo, DuckDbParam, Params, RecordBatch, RecordBatches, Row,
    Rows,
};

/// Name reported by [`BundledBinding`].
pub const BINDING_NAME: &str = "duckdb-bundled";

/// Opens databases with the statically linked DuckDB engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct BundledBinding;

impl Binding for BundledBinding {
    fn name(&self) -> &str {
        BINDING_NAME
    }

    #[instrument(skip(self, path, record, done), fields(path = %path.as_str()))]
    fn open(&self, path: &DatabasePath, record: &ConfigRecord, done: Callback<DatabaseHandle>) {
        let path = path.clone();
        let record = record.clone();
        Worker::start(
            "database",
            move || open_connection(&path, &record),
            move |started| {
                done(started.map(|started| Arc::new(BundledDatabase::new(started)) as DatabaseHandle))
            },
        );
    }
}

/// Overwritten by the driver on open, so it travels as the user agent.
const API_OPTION: &str = "duckdb_api";
const USER_AGENT_OPTION: &str = "custom_user_agent";

/// Build the engine configuration for `record`.
///
/// The `duckdb_api` tag is reported through `custom_user_agent`, ahead of any
/// agent the caller supplied.
fn engine_config(record: &ConfigRecord) -> DuckDbResult<duckdb::Config> {
    let mut config = duckdb::Config::default();
    for (key, value) in record {
        if key != API_OPTION && key != USER_AGENT_OPTION {
            config = config.with(key, value)?;
        }
    }

    let agent = match (record.get(API_OPTION), record.get(USER_AGENT_OPTION)) {
        (Some(api), Some(custom)) => Some(format!("{} {}", api, custom)),
        (api, custom) => api.or(custom).cloned(),
    };
    if let Some(agent) = agent {
        config = config.with(USER_AGENT_OPTION, &agent)?;
    }
    Ok(config)
}

fn open_connection(path: &DatabasePath, record: &ConfigRecord) -> DuckDbResult<Connection> {
    let config = engine_config(record)?;

    let conn = match path {
        DatabasePath::InMemory => Connection::open_in_memory_with_flags(config)?,
        DatabasePath::File(file) => Connection::open_with_flags(file, config)?,
    };
    info!(path = %path.as_str(), options = record.len(), "Opened DuckDB database");
    Ok(conn)
}

// =============================================================================
// Query helpers
// =============================================================================

fn bind(params: &Params) -> Vec<DuckDbParam<'_>> {
    params.as_slice().iter().map(DuckDbParam).collect()
}

fn sql_refs<'a>(bound: &'a [DuckDbParam<'a>]) -> Vec<&'a dyn ToSql> {
    bound.iter().map(|p| p as &dyn ToSql).collect()
}

/// Column metadata of an executed statement.
fn describe(stmt: &Statement<'_>) -> Vec<ColumnInfo> {
    (0..stmt.column_count())
        .map(|i| ColumnInfo {
            name: stmt
                .column_name(i)
                .map(|s| s.to_string())
                .unwrap_or_else(|_| format!("col{}", i)),
            type_name: stmt.column_type(i).to_string(),
        })
        .collect()
}

/// Execute `stmt` and feed each row to `on_row` until it returns `false`.
fn collect_rows(
    stmt: &mut Statement<'_>,
    params: &Params,
    mut on_row: impl FnMut(Row) -> bool,
) -> DuckDbResult<(usize, Vec<ColumnInfo>)> {
    let bound = bind(params);
    let refs = sql_refs(&bound);
    let mut rows = stmt.query(refs.as_slice())?;

    let columns = rows.as_ref().map(describe).unwrap_or_default();

    let mut count = 0;
    while let Some(row) = rows.next()? {
        let mut obj = serde_json::Map::with_capacity(columns.len());
        for (i, column) in columns.iter().enumerate() {
            obj.insert(column.name.clone(), duckdb_value_ref_to_json(row.get_ref(i)?));
        }
        count += 1;
        if !on_row(JsonValue::Object(obj)) {
            break;
        }
    }

    Ok((count, columns))
}

/// Execute `stmt` in columnar form, feeding batches until `on_batch` returns `false`.
fn collect_batches(
    stmt: &mut Statement<'_>,
    params: &Params,
    mut on_batch: impl FnMut(RecordBatch) -> bool,
) -> DuckDbResult<Vec<ColumnInfo>> {
    let bound = bind(params);
    let refs = sql_refs(&bound);
    for batch in stmt.query_arrow(refs.as_slice())? {
        if !on_batch(batch) {
            break;
        }
    }
    Ok(describe(stmt))
}

/// Push rows of `sql` into a stream from its producer thread.
fn stream_rows(conn: &Connection, sql: &str, params: &Params, tx: &mpsc::Sender<DuckDbResult<Row>>) -> DuckDbResult<()> {
    let mut stmt = conn.prepare(sql)?;
    collect_rows(&mut stmt, params, |row| tx.blocking_send(Ok(row)).is_ok())?;
    Ok(())
}

fn stream_batches(
    conn: &Connection,
    sql: &str,
    params: &Params,
    tx: &mpsc::Sender<DuckDbResult<RecordBatch>>,
) -> DuckDbResult<()> {
    let mut stmt = conn.prepare(sql)?;
    collect_batches(&mut stmt, params, |batch| tx.blocking_send(Ok(batch)).is_ok())?;
    Ok(())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn table_exists(conn: &Connection, name: &str) -> DuckDbResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM duckdb_tables() WHERE table_name = ?",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn sql_type(data_type: &DataType) -> DuckDbResult<String> {
    let name = match data_type {
        DataType::Boolean => "BOOLEAN".to_string(),
        DataType::Int8 => "TINYINT".to_string(),
        DataType::Int16 => "SMALLINT".to_string(),
        DataType::Int32 => "INTEGER".to_string(),
        DataType::Int64 => "BIGINT".to_string(),
        DataType::UInt8 => "UTINYINT".to_string(),
        DataType::UInt16 => "USMALLINT".to_string(),
        DataType::UInt32 => "UINTEGER".to_string(),
        DataType::UInt64 => "UBIGINT".to_string(),
        DataType::Float32 => "FLOAT".to_string(),
        DataType::Float64 => "DOUBLE".to_string(),
        DataType::Utf8 | DataType::LargeUtf8 => "VARCHAR".to_string(),
        DataType::Binary | DataType::LargeBinary => "BLOB".to_string(),
        DataType::Date32 => "DATE".to_string(),
        DataType::Timestamp(..) => "TIMESTAMP".to_string(),
        DataType::Decimal128(precision, scale) => format!("DECIMAL({}, {})", precision, scale),
        other => {
            return Err(DuckDbError::type_conversion(format!(
                "unsupported Arrow type in buffer: {}",
                other
            )))
        }
    };
    Ok(name)
}

fn column_defs(schema: &Schema) -> DuckDbResult<String> {
    let defs = schema
        .fields()
        .iter()
        .map(|field| Ok(format!("{} {}", quote_ident(field.name()), sql_type(field.data_type())?)))
        .collect::<DuckDbResult<Vec<_>>>()?;
    Ok(defs.join(", "))
}

/// Hand a result to an optional completion, logging failures nobody observes.
fn report<T>(operation: &'static str, completion: Completion<T>, result: DuckDbResult<T>) {
    if let Some(Err(err)) = completion.complete(result) {
        warn!(operation, error = %err, "engine operation failed with no callback attached");
    }
}

// =============================================================================
// Connection
// =============================================================================

/// Database-wide execution mode.
#[derive(Default)]
struct Parallel {
    enabled: AtomicBool,
    in_flight: Arc<InFlight>,
}

/// A connection served by one worker thread.
pub(crate) struct BundledConnection {
    worker: Worker,
    interrupt: Interrupt,
    /// Present on a database's own connection.
    parallel: Option<Arc<Parallel>>,
}

impl BundledConnection {
    fn new(started: Started, parallel: Option<Arc<Parallel>>) -> Self {
        Self {
            worker: started.worker,
            interrupt: started.interrupt,
            parallel,
        }
    }

    /// Run a query either on the worker or, in parallel mode, on a cloned
    /// connection in its own thread.
    fn query<T, W>(&self, done: Callback<T>, work: W)
    where
        T: Send + 'static,
        W: FnOnce(&Connection) -> DuckDbResult<T> + Send + 'static,
    {
        let parallel = self
            .parallel
            .as_ref()
            .filter(|p| p.enabled.load(Ordering::Acquire));

        let Some(parallel) = parallel else {
            self.worker.call(done, move |session| work(&session.conn));
            return;
        };

        let in_flight = parallel.in_flight.clone();
        let label = self.worker.label();
        self.worker.submit(Box::new(move |session: Option<&mut Session>| {
            let Some(session) = session else {
                done(Err(closed(label)));
                return Flow::Continue;
            };
            match session.conn.try_clone() {
                Ok(conn) => {
                    let ticket = in_flight.enter();
                    let spawned = thread::Builder::new()
                        .name(format!("duckdb-{}-parallel", label))
                        .spawn(move || {
                            let result = work(&conn);
                            drop(ticket);
                            done(result);
                        });
                    if let Err(err) = spawned {
                        warn!(worker = label, error = %err, "failed to spawn parallel query thread");
                    }
                }
                Err(err) => done(Err(err.into())),
            }
            Flow::Continue
        }));
    }

    /// Start a producer and return its consuming end.
    ///
    /// The worker only clones its connection, in queue order. Rows are
    /// produced on a thread of their own.
    fn produce<T, W>(&self, work: W) -> ResultStream<T>
    where
        T: Send + 'static,
        W: FnOnce(&Connection, &mpsc::Sender<DuckDbResult<T>>) -> DuckDbResult<()> + Send + 'static,
    {
        let (tx, stream) = ResultStream::channel(DEFAULT_STREAM_CAPACITY);
        let label = self.worker.label();
        self.worker.submit(Box::new(move |session: Option<&mut Session>| {
            let cloned = match session {
                Some(session) => session.conn.try_clone().map_err(DuckDbError::from),
                None => Err(closed(label)),
            };
            // Nothing has been sent yet, so the buffer has room.
            let conn = match cloned {
                Ok(conn) => conn,
                Err(err) => {
                    let _ = tx.try_send(Err(err));
                    return Flow::Continue;
                }
            };

            let fallback = tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("duckdb-{}-stream", label))
                .spawn(move || {
                    if let Err(err) = work(&conn, &tx) {
                        let _ = tx.blocking_send(Err(err));
                    }
                });
            if let Err(err) = spawned {
                warn!(worker = label, error = %err, "failed to spawn stream producer thread");
                let _ = fallback.try_send(Err(DuckDbError::internal(format!(
                    "failed to spawn stream producer: {}",
                    err
                ))));
            }
            Flow::Continue
        }));
        stream
    }

    /// Check the return type now and queue the registration, so work issued
    /// afterwards on this handle can call the function.
    fn register_function(&self, name: &str, return_type: &str, body: UdfBody) -> DuckDbResult<()> {
        let kind = ReturnKind::parse(return_type)?;
        debug!(worker = self.worker.label(), name, return_type, "register function");
        let name = name.to_string();
        self.worker.call(
            |result| report("register function", Completion::WithoutCallback, result),
            move |session| udf::register(&session.conn, &mut session.functions, &name, kind, body),
        );
        Ok(())
    }
}

impl NativeConnection for BundledConnection {
    fn all(&self, sql: &str, params: Params, done: Callback<Rows>) {
        debug!(worker = self.worker.label(), sql = %sql, "all");
        let sql = sql.to_string();
        self.query(done, move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = Vec::new();
            collect_rows(&mut stmt, &params, |row| {
                rows.push(row);
                true
            })?;
            Ok(rows)
        });
    }

    fn arrow_ipc_all(&self, sql: &str, params: Params, done: Callback<RecordBatches>) {
        debug!(worker = self.worker.label(), sql = %sql, "arrow_ipc_all");
        let sql = sql.to_string();
        self.query(done, move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mut batches = Vec::new();
            collect_batches(&mut stmt, &params, |batch| {
                batches.push(batch);
                true
            })?;
            Ok(batches)
        });
    }

    fn each(&self, sql: &str, params: Params, mut on_row: RowCallback, done: Callback<usize>) {
        debug!(worker = self.worker.label(), sql = %sql, "each");
        let sql = sql.to_string();
        self.query(done, move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let (count, _) = collect_rows(&mut stmt, &params, |row| {
                on_row(row);
                true
            })?;
            Ok(count)
        });
    }

    fn exec(&self, sql: &str, params: Params, done: Callback<()>) {
        debug!(worker = self.worker.label(), sql_len = sql.len(), params = params.len(), "exec");
        let sql = sql.to_string();
        self.query(done, move |conn| {
            if params.is_empty() {
                conn.execute_batch(&sql)?;
            } else {
                let bound = bind(&params);
                conn.execute(&sql, sql_refs(&bound).as_slice())?;
            }
            Ok(())
        });
    }

    fn prepare(
        &self,
        sql: &str,
        params: Params,
        done: Completion<StatementHandle>,
    ) -> StatementHandle {
        debug!(worker = self.worker.label(), sql = %sql, "prepare");
        let statement = BundledStatement::new(self.worker.clone(), sql, params);
        let handle: StatementHandle = Arc::new(statement.clone());
        let reply = handle.clone();
        self.worker.call(
            move |result: DuckDbResult<()>| report("prepare", done, result.map(|()| reply)),
            move |session| statement.state.prepare(session),
        );
        handle
    }

    fn run(&self, sql: &str, params: Params, done: Completion<StatementHandle>) -> StatementHandle {
        debug!(worker = self.worker.label(), sql = %sql, "run");
        let statement = BundledStatement::new(self.worker.clone(), sql, Params::none());
        let handle: StatementHandle = Arc::new(statement.clone());
        let reply = handle.clone();
        self.worker.call(
            move |result: DuckDbResult<usize>| report("run", done, result.map(|_| reply)),
            move |session| statement.state.execute(session, &params),
        );
        handle
    }

    fn stream(&self, sql: &str, params: Params) -> DuckDbResult<RowStream> {
        debug!(worker = self.worker.label(), sql = %sql, "stream");
        let sql = sql.to_string();
        Ok(self.produce(move |conn, tx| stream_rows(conn, &sql, &params, tx)))
    }

    fn arrow_ipc_stream(&self, sql: &str, params: Params) -> DuckDbResult<BatchStream> {
        debug!(worker = self.worker.label(), sql = %sql, "arrow_ipc_stream");
        let sql = sql.to_string();
        Ok(self.produce(move |conn, tx| stream_batches(conn, &sql, &params, tx)))
    }

    fn register_udf(&self, name: &str, return_type: &str, fun: ScalarUdf) -> DuckDbResult<()> {
        self.register_function(name, return_type, UdfBody::Row(fun))
    }

    fn register_bulk(&self, name: &str, return_type: &str, fun: BulkUdf) -> DuckDbResult<()> {
        self.register_function(name, return_type, UdfBody::Bulk(fun))
    }

    fn unregister_udf(&self, name: &str, done: Callback<()>) {
        debug!(worker = self.worker.label(), name, "unregister_udf");
        let name = name.to_string();
        self.worker
            .call(done, move |session| udf::unregister(&session.functions, &name));
    }

    fn register_buffer(&self, name: &str, batches: RecordBatches, force: bool, done: Callback<()>) {
        debug!(worker = self.worker.label(), name, batches = batches.len(), force, "register_buffer");
        let name = name.to_string();
        self.worker.call(done, move |session| {
            let schema = batches.first().map(|b| b.schema()).ok_or_else(|| {
                DuckDbError::query(format!("buffer '{}' has no record batches", name))
            })?;

            if !force && (session.buffers.contains(&name) || table_exists(&session.conn, &name)?) {
                return Err(DuckDbError::query(format!(
                    "a table named '{}' already exists",
                    name
                )));
            }

            session.conn.execute_batch(&format!(
                "CREATE OR REPLACE TABLE {} ({})",
                quote_ident(&name),
                column_defs(&schema)?
            ))?;
            {
                let mut appender = session.conn.appender(&name)?;
                for batch in batches {
                    appender.append_record_batch(batch)?;
                }
            }
            session.buffers.insert(name);
            Ok(())
        });
    }

    fn unregister_buffer(&self, name: &str, done: Callback<()>) {
        let name = name.to_string();
        self.worker.call(done, move |session| {
            if !session.buffers.remove(&name) {
                return Err(DuckDbError::query(format!(
                    "no buffer named '{}' is registered",
                    name
                )));
            }
            session
                .conn
                .execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(&name)))?;
            Ok(())
        });
    }

    fn close(&self, done: Callback<()>) {
        debug!(worker = self.worker.label(), "close");
        let label = self.worker.label();
        self.worker.submit(Box::new(move |session: Option<&mut Session>| match session {
            Some(_) => Flow::Stop(done),
            None => {
                done(Err(closed(label)));
                Flow::Continue
            }
        }));
    }
}

// =============================================================================
// Database
// =============================================================================

/// A database: its own connection plus database-wide controls.
pub(crate) struct BundledDatabase {
    conn: BundledConnection,
    parallel: Arc<Parallel>,
}

impl BundledDatabase {
    fn new(started: Started) -> Self {
        let parallel = Arc::new(Parallel::default());
        Self {
            conn: BundledConnection::new(started, Some(parallel.clone())),
            parallel,
        }
    }

    fn set_parallel(&self, enabled: bool, done: Callback<()>) {
        let parallel = self.parallel.clone();
        self.conn.worker.call(done, move |_| {
            parallel.enabled.store(enabled, Ordering::Release);
            Ok(())
        });
    }
}

impl NativeConnection for BundledDatabase {
    fn all(&self, sql: &str, params: Params, done: Callback<Rows>) {
        self.conn.all(sql, params, done)
    }

    fn arrow_ipc_all(&self, sql: &str, params: Params, done: Callback<RecordBatches>) {
        self.conn.arrow_ipc_all(sql, params, done)
    }

    fn each(&self, sql: &str, params: Params, on_row: RowCallback, done: Callback<usize>) {
        self.conn.each(sql, params, on_row, done)
    }

    fn exec(&self, sql: &str, params: Params, done: Callback<()>) {
        self.conn.exec(sql, params, done)
    }

    fn prepare(
        &self,
        sql: &str,
        params: Params,
        done: Completion<StatementHandle>,
    ) -> StatementHandle {
        self.conn.prepare(sql, params, done)
    }

    fn run(&self, sql: &str, params: Params, done: Completion<StatementHandle>) -> StatementHandle {
        self.conn.run(sql, params, done)
    }

    fn stream(&self, sql: &str, params: Params) -> DuckDbResult<RowStream> {
        self.conn.stream(sql, params)
    }

    fn arrow_ipc_stream(&self, sql: &str, params: Params) -> DuckDbResult<BatchStream> {
        self.conn.arrow_ipc_stream(sql, params)
    }

    fn register_udf(&self, name: &str, return_type: &str, fun: ScalarUdf) -> DuckDbResult<()> {
        self.conn.register_udf(name, return_type, fun)
    }

    fn register_bulk(&self, name: &str, return_type: &str, fun: BulkUdf) -> DuckDbResult<()> {
        self.conn.register_bulk(name, return_type, fun)
    }

    fn unregister_udf(&self, name: &str, done: Callback<()>) {
        self.conn.unregister_udf(name, done)
    }

    fn register_buffer(&self, name: &str, batches: RecordBatches, force: bool, done: Callback<()>) {
        self.conn.register_buffer(name, batches, force, done)
    }

    fn unregister_buffer(&self, name: &str, done: Callback<()>) {
        self.conn.unregister_buffer(name, done)
    }

    fn close(&self, done: Callback<()>) {
        self.conn.close(done)
    }
}

impl NativeDatabase for BundledDatabase {
    fn connect(&self, done: Callback<ConnectionHandle>) {
        debug!("connect");
        self.conn.worker.call(
            move |cloned: DuckDbResult<Connection>| match cloned {
                Ok(conn) => Worker::start(
                    "connection",
                    move || Ok(conn),
                    move |started| {
                        done(started.map(|started| {
                            Arc::new(BundledConnection::new(started, None)) as ConnectionHandle
                        }))
                    },
                ),
                Err(err) => done(Err(err)),
            },
            |session| Ok(session.conn.try_clone()?),
        );
    }

    fn serialize(&self, done: Callback<()>) {
        self.set_parallel(false, done);
    }

    fn parallelize(&self, done: Callback<()>) {
        self.set_parallel(true, done);
    }

    fn wait(&self, done: Callback<()>) {
        let in_flight = self.parallel.in_flight.clone();
        self.conn.worker.call(done, move |_| {
            debug!(in_flight = in_flight.active(), "Waiting for parallel queries");
            in_flight.wait_idle();
            Ok(())
        });
    }

    fn interrupt(&self) -> DuckDbResult<()> {
        debug!("interrupt");
        (self.conn.interrupt)();
        Ok(())
    }

    fn register_replacement_scan(&self, _handler: ReplacementScanHandler) -> DuckDbResult<()> {
        Err(DuckDbError::unsupported(format!(
            "replacement scans cannot be registered with the {} build",
            BINDING_NAME
        )))
    }
}

// =============================================================================
// Statement
// =============================================================================

struct StatementState {
    sql: String,
    /// Parameters supplied at prepare time, used when execution passes none.
    bound: Params,
    columns: RwLock<Option<Vec<ColumnInfo>>>,
    finalized: AtomicBool,
}

impl StatementState {
    fn check(&self) -> DuckDbResult<()> {
        if self.finalized.load(Ordering::Acquire) {
            return Err(DuckDbError::query("statement has been finalized"));
        }
        Ok(())
    }

    fn effective<'a>(&'a self, params: &'a Params) -> &'a Params {
        if params.is_empty() {
            &self.bound
        } else {
            params
        }
    }

    fn prepare(&self, session: &mut Session) -> DuckDbResult<()> {
        self.check()?;
        let _ = session.conn.prepare_cached(&self.sql)?;
        Ok(())
    }

    fn execute(&self, session: &mut Session, params: &Params) -> DuckDbResult<usize> {
        self.check()?;
        let mut stmt = session.conn.prepare_cached(&self.sql)?;
        let bound = bind(self.effective(params));
        let refs = sql_refs(&bound);
        let changed = stmt.execute(refs.as_slice())?;
        *self.columns.write() = Some(describe(&stmt));
        Ok(changed)
    }

    fn rows(
        &self,
        session: &mut Session,
        params: &Params,
        on_row: impl FnMut(Row) -> bool,
    ) -> DuckDbResult<usize> {
        self.check()?;
        let mut stmt = session.conn.prepare_cached(&self.sql)?;
        let (count, columns) = collect_rows(&mut stmt, self.effective(params), on_row)?;
        *self.columns.write() = Some(columns);
        Ok(count)
    }

    /// Mark the statement finalized and evict its cached engine statement.
    fn finalize(&self, session: &mut Session) {
        self.finalized.store(true, Ordering::Release);
        if let Ok(stmt) = session.conn.prepare_cached(&self.sql) {
            stmt.discard();
        }
    }

    fn batches(&self, session: &mut Session, params: &Params) -> DuckDbResult<RecordBatches> {
        self.check()?;
        let mut stmt = session.conn.prepare_cached(&self.sql)?;
        let mut batches = Vec::new();
        let columns = collect_batches(&mut stmt, self.effective(params), |batch| {
            batches.push(batch);
            true
        })?;
        *self.columns.write() = Some(columns);
        Ok(batches)
    }
}

/// A prepared statement executed through its connection's statement cache.
#[derive(Clone)]
pub(crate) struct BundledStatement {
    worker: Worker,
    state: Arc<StatementState>,
}

impl BundledStatement {
    fn new(worker: Worker, sql: &str, bound: Params) -> Self {
        Self {
            worker,
            state: Arc::new(StatementState {
                sql: sql.to_string(),
                bound,
                columns: RwLock::new(None),
                finalized: AtomicBool::new(false),
            }),
        }
    }
}

impl NativeStatement for BundledStatement {
    fn all(&self, params: Params, done: Callback<Rows>) {
        let state = self.state.clone();
        self.worker.call(done, move |session| {
            let mut rows = Vec::new();
            state.rows(session, &params, |row| {
                rows.push(row);
                true
            })?;
            Ok(rows)
        });
    }

    fn arrow_ipc_all(&self, params: Params, done: Callback<RecordBatches>) {
        let state = self.state.clone();
        self.worker
            .call(done, move |session| state.batches(session, &params));
    }

    fn each(&self, params: Params, mut on_row: RowCallback, done: Callback<usize>) {
        let state = self.state.clone();
        self.worker.call(done, move |session| {
            state.rows(session, &params, |row| {
                on_row(row);
                true
            })
        });
    }

    fn run(&self, params: Params, done: Completion<()>) {
        let state = self.state.clone();
        self.worker.call(
            move |result: DuckDbResult<usize>| report("statement run", done, result.map(|_| ())),
            move |session| state.execute(session, &params),
        );
    }

    fn finalize(&self, done: Callback<()>) {
        let state = self.state.clone();
        self.worker.call(done, move |session| {
            state.finalize(session);
            Ok(())
        });
    }

    fn columns(&self) -> Option<Vec<ColumnInfo>> {
        self.state.columns.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::promisify;
    use crate::config::OpenOptions;
    use futures::StreamExt;

    async fn open_memory() -> DatabaseHandle {
        let record = OpenOptions::default().into_record();
        promisify(|done| BundledBinding.open(&DatabasePath::InMemory, &record, done))
            .await
            .unwrap()
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("people"), "\"people\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_sql_type_mapping() {
        assert_eq!(sql_type(&DataType::Int64).unwrap(), "BIGINT");
        assert_eq!(sql_type(&DataType::Utf8).unwrap(), "VARCHAR");
        assert_eq!(sql_type(&DataType::Decimal128(18, 3)).unwrap(), "DECIMAL(18, 3)");
        assert!(matches!(
            sql_type(&DataType::Null),
            Err(DuckDbError::TypeConversion(_))
        ));
    }

    #[tokio::test]
    async fn test_open_and_query() {
        let db = open_memory().await;
        let rows = promisify(|done| db.all("SELECT 1 + 2 AS sum", Params::none(), done))
            .await
            .unwrap();
        assert_eq!(rows, vec![serde_json::json!({ "sum": 3 })]);
    }

    #[tokio::test]
    async fn test_prepared_statement_records_columns() {
        let db = open_memory().await;
        let stmt = promisify(|done| {
            db.prepare("SELECT ?::INTEGER AS n", Params::from([7]), Completion::WithCallback(done));
        })
        .await
        .unwrap();
        assert!(stmt.columns().is_none());

        let rows = promisify(|done| stmt.all(Params::none(), done)).await.unwrap();
        assert_eq!(rows, vec![serde_json::json!({ "n": 7 })]);

        let columns = stmt.columns().unwrap();
        assert_eq!(columns[0].name, "n");
        assert_eq!(columns[0].type_name, "Int32");

        promisify(|done| stmt.finalize(done)).await.unwrap();
        let err = promisify(|done| stmt.all(Params::none(), done))
            .await
            .unwrap_err();
        assert!(matches!(err, DuckDbError::Query(_)));
    }

    #[tokio::test]
    async fn test_close_stops_worker() {
        let db = open_memory().await;
        promisify(|done| db.close(done)).await.unwrap();

        let err = promisify(|done| db.exec("SELECT 1", Params::none(), done))
            .await
            .unwrap_err();
        assert!(matches!(err, DuckDbError::Connection(_)));
    }

    #[tokio::test]
    async fn test_stream_rows() {
        let db = open_memory().await;
        let stream = db
            .stream("SELECT * FROM range(5) t(i)", Params::none())
            .unwrap();
        let rows: Vec<Row> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[4], serde_json::json!({ "i": 4 }));
    }

    #[tokio::test]
    async fn test_parallel_queries_and_wait() {
        let db = open_memory().await;
        promisify(|done| db.parallelize(done)).await.unwrap();

        let pending: Vec<_> = (0..4)
            .map(|i| promisify(|done| db.all("SELECT ?::INTEGER AS i", Params::from([i]), done)))
            .collect();
        promisify(|done| db.wait(done)).await.unwrap();

        for (i, rows) in futures::future::join_all(pending).await.into_iter().enumerate() {
            assert_eq!(rows.unwrap(), vec![serde_json::json!({ "i": i })]);
        }
        promisify(|done| db.serialize(done)).await.unwrap();
    }

    #[test]
    fn test_engine_config_carries_api_tag_as_user_agent() {
        let mut record = OpenOptions::default().into_record();
        assert!(engine_config(&record).is_ok());

        record.insert(USER_AGENT_OPTION.to_string(), "reporting-job".to_string());
        assert!(engine_config(&record).is_ok());
    }

    #[tokio::test]
    async fn test_registered_udf_is_callable() {
        let db = open_memory().await;
        let fun: ScalarUdf = Arc::new(|args| match args {
            [duckdb::types::Value::Int(v)] => Ok(duckdb::types::Value::Int(v + 1)),
            other => Err(DuckDbError::query(format!("unexpected arguments: {:?}", other))),
        });
        db.register_udf("plus_one", "INTEGER", fun).unwrap();

        let rows = promisify(|done| db.all("SELECT plus_one(41::INTEGER) AS v", Params::none(), done))
            .await
            .unwrap();
        assert_eq!(rows, vec![serde_json::json!({ "v": 42 })]);

        promisify(|done| db.unregister_udf("plus_one", done)).await.unwrap();
        let err = promisify(|done| db.unregister_udf("plus_one", done))
            .await
            .unwrap_err();
        assert!(matches!(err, DuckDbError::Query(_)));
    }

    #[tokio::test]
    async fn test_udf_with_unknown_return_type_is_unsupported() {
        let db = open_memory().await;
        let fun: ScalarUdf = Arc::new(|args| Ok(args[0].clone()));
        assert!(matches!(
            db.register_udf("echo", "GEOMETRY", fun),
            Err(DuckDbError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_exec_binds_parameters() {
        let db = open_memory().await;
        promisify(|done| db.exec("CREATE TABLE t (i INTEGER)", Params::none(), done))
            .await
            .unwrap();
        promisify(|done| db.exec("INSERT INTO t VALUES (?)", Params::from([5]), done))
            .await
            .unwrap();
        let rows = promisify(|done| db.all("SELECT i FROM t", Params::none(), done))
            .await
            .unwrap();
        assert_eq!(rows, vec![serde_json::json!({ "i": 5 })]);
    }
}
