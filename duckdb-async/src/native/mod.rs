//! The callback-shaped engine contract the facades wrap.
//!
//! An engine build provides a [`Binding`] that opens databases, and handle
//! types implementing [`NativeDatabase`], [`NativeConnection`] and
//! [`NativeStatement`]. Single-shot operations complete by invoking the
//! trailing [`Callback`]; row callbacks and streams may fire many times.
//! Callbacks may be invoked from any thread.

use std::fmt;
use std::sync::Arc;

use duckdb::types::Value;

use crate::adapter::{Callback, Completion};
use crate::config::{ConfigRecord, DatabasePath};
use crate::error::DuckDbResult;
use crate::stream::{BatchStream, RowStream};
use crate::types::{ColumnInfo, Params, RecordBatches, Row, Rows};

pub mod bundled;
pub(crate) mod udf;
pub(crate) mod worker;

/// Opaque database handle.
pub type DatabaseHandle = Arc<dyn NativeDatabase>;
/// Opaque connection handle.
pub type ConnectionHandle = Arc<dyn NativeConnection>;
/// Opaque prepared-statement handle.
pub type StatementHandle = Arc<dyn NativeStatement>;

/// Invoked once per produced row.
pub type RowCallback = Box<dyn FnMut(Row) + Send + 'static>;

/// A scalar user-defined function: one row of arguments in, one value out.
pub type ScalarUdf = Arc<dyn Fn(&[Value]) -> DuckDbResult<Value> + Send + Sync + 'static>;

/// A vectorized user-defined function: argument columns in, result column out.
pub type BulkUdf = Arc<dyn Fn(&[Vec<Value>]) -> DuckDbResult<Vec<Value>> + Send + Sync + 'static>;

/// A data source substituted for an unresolved table reference.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplacementScan {
    /// Table function to call instead.
    pub function: String,
    /// Arguments for the table function.
    pub parameters: Params,
}

/// Decides whether an unresolved table name should be replaced.
pub type ReplacementScanHandler =
    Arc<dyn Fn(&str) -> Option<ReplacementScan> + Send + Sync + 'static>;

/// Query surface shared by databases and connections.
pub trait NativeConnection: Send + Sync {
    /// Run `sql` and collect every row.
    fn all(&self, sql: &str, params: Params, done: Callback<Rows>);

    /// Run `sql` and collect the result in columnar form.
    fn arrow_ipc_all(&self, sql: &str, params: Params, done: Callback<RecordBatches>);

    /// Run `sql`, invoking `on_row` per row, then `done` with the row count
    /// or the error that stopped production.
    fn each(&self, sql: &str, params: Params, on_row: RowCallback, done: Callback<usize>);

    /// Execute `sql` for its side effects. Without parameters it may hold
    /// several semicolon-separated statements.
    fn exec(&self, sql: &str, params: Params, done: Callback<()>);

    /// Prepare `sql`. The handle is returned immediately; `done` fires once
    /// preparation has finished.
    fn prepare(&self, sql: &str, params: Params, done: Completion<StatementHandle>)
        -> StatementHandle;

    /// Prepare and execute `sql`. The handle is returned immediately; `done`
    /// fires once execution has finished.
    fn run(&self, sql: &str, params: Params, done: Completion<StatementHandle>) -> StatementHandle;

    /// Start producing rows of `sql`.
    fn stream(&self, sql: &str, params: Params) -> DuckDbResult<RowStream>;

    /// Start producing columnar batches of `sql`.
    fn arrow_ipc_stream(&self, sql: &str, params: Params) -> DuckDbResult<BatchStream>;

    /// Register a scalar function.
    fn register_udf(&self, name: &str, return_type: &str, fun: ScalarUdf) -> DuckDbResult<()>;

    /// Register a vectorized function.
    fn register_bulk(&self, name: &str, return_type: &str, fun: BulkUdf) -> DuckDbResult<()>;

    /// Remove a function registered with `register_udf`/`register_bulk`.
    fn unregister_udf(&self, name: &str, done: Callback<()>);

    /// Expose columnar data under `name`; `force` replaces an existing entry.
    fn register_buffer(&self, name: &str, batches: RecordBatches, force: bool, done: Callback<()>);

    /// Remove data registered with `register_buffer`.
    fn unregister_buffer(&self, name: &str, done: Callback<()>);

    /// Release the handle.
    fn close(&self, done: Callback<()>);
}

/// A database handle: the connection surface plus database-wide controls.
pub trait NativeDatabase: NativeConnection {
    /// Open a new connection to this database.
    fn connect(&self, done: Callback<ConnectionHandle>);

    /// Run subsequent database-level queries one at a time.
    fn serialize(&self, done: Callback<()>);

    /// Allow database-level queries to run concurrently.
    fn parallelize(&self, done: Callback<()>);

    /// Resolve once every previously issued operation has finished.
    fn wait(&self, done: Callback<()>);

    /// Ask the engine to abort in-flight work.
    fn interrupt(&self) -> DuckDbResult<()>;

    /// Install a replacement-scan hook.
    fn register_replacement_scan(&self, handler: ReplacementScanHandler) -> DuckDbResult<()>;
}

/// A prepared statement handle.
pub trait NativeStatement: Send + Sync {
    /// Execute and collect every row.
    fn all(&self, params: Params, done: Callback<Rows>);

    /// Execute and collect the result in columnar form.
    fn arrow_ipc_all(&self, params: Params, done: Callback<RecordBatches>);

    /// Execute, invoking `on_row` per row, then `done` with the row count
    /// or the error that stopped production.
    fn each(&self, params: Params, on_row: RowCallback, done: Callback<usize>);

    /// Execute for side effects.
    fn run(&self, params: Params, done: Completion<()>);

    /// Release the statement.
    fn finalize(&self, done: Callback<()>);

    /// Result columns, once the engine knows them.
    fn columns(&self) -> Option<Vec<ColumnInfo>>;
}

/// An engine build able to open databases.
pub trait Binding: Send + Sync + fmt::Debug {
    /// Short name of the build, for diagnostics.
    fn name(&self) -> &str;

    /// Open `path` with the options in `record`.
    fn open(&self, path: &DatabasePath, record: &ConfigRecord, done: Callback<DatabaseHandle>);
}
