//! Connection facade and the query surface it shares with [`crate::Database`].

use std::sync::Arc;

use duckdb::types::Value;
use futures::future::BoxFuture;
use tracing::{debug, info, instrument, warn};

use crate::adapter::{promisify, Callback, Completion, Pending};
use crate::database::Database;
use crate::error::DuckDbResult;
use crate::handle::HandleSlot;
use crate::native::{ConnectionHandle, NativeConnection, StatementHandle};
use crate::statement::Statement;
use crate::stream::{BatchStream, RowStream};
use crate::types::{Params, RecordBatches, Row, Rows};

/// Guarded query operations over any handle implementing the connection
/// contract.
pub(crate) struct QuerySurface<H: ?Sized> {
    pub(crate) slot: Arc<HandleSlot<H>>,
    owner: &'static str,
}

impl<H: ?Sized> Clone for QuerySurface<H> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
            owner: self.owner,
        }
    }
}

impl<H: NativeConnection + ?Sized + 'static> QuerySurface<H> {
    pub(crate) fn empty(owner: &'static str, kind: &'static str) -> Self {
        Self {
            slot: Arc::new(HandleSlot::empty(owner, kind)),
            owner,
        }
    }

    pub(crate) fn ready(owner: &'static str, kind: &'static str, handle: Arc<H>) -> Self {
        Self {
            slot: Arc::new(HandleSlot::ready(owner, kind, handle)),
            owner,
        }
    }

    /// Run a single-shot operation against the handle, failing up front if
    /// there is none.
    pub(crate) fn call<T, F>(&self, operation: &'static str, op: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce(&H, Callback<T>),
    {
        match self.slot.get(operation) {
            Ok(handle) => promisify(|done| op(&*handle, done)),
            Err(err) => Pending::failed(err),
        }
    }

    pub(crate) fn all(&self, sql: &str, params: Params) -> Pending<Rows> {
        self.call("all", |h, done| h.all(sql, params, done))
    }

    pub(crate) fn arrow_ipc_all(&self, sql: &str, params: Params) -> Pending<RecordBatches> {
        self.call("arrow_ipc_all", |h, done| h.arrow_ipc_all(sql, params, done))
    }

    pub(crate) fn each(
        &self,
        sql: &str,
        params: Params,
        on_row: Box<dyn FnMut(Row) + Send>,
        on_complete: Callback<usize>,
    ) -> DuckDbResult<()> {
        let handle = self.slot.get("each")?;
        handle.each(sql, params, on_row, on_complete);
        Ok(())
    }

    pub(crate) fn exec(&self, sql: &str, params: Params) -> Pending<()> {
        self.call("exec", |h, done| h.exec(sql, params, done))
    }

    pub(crate) fn prepare(&self, sql: &str, params: Params) -> BoxFuture<'static, DuckDbResult<Statement>> {
        let pending: Pending<StatementHandle> = self.call("prepare", |h, done| {
            h.prepare(sql, params, Completion::WithCallback(done));
        });
        Box::pin(async move { pending.await.map(Statement::new) })
    }

    pub(crate) fn prepare_sync(&self, sql: &str, params: Params) -> DuckDbResult<Statement> {
        let handle = self.slot.get("prepare")?;
        Ok(Statement::new(handle.prepare(sql, params, Completion::WithoutCallback)))
    }

    pub(crate) fn run(&self, sql: &str, params: Params) -> BoxFuture<'static, DuckDbResult<Statement>> {
        let pending: Pending<StatementHandle> = self.call("run", |h, done| {
            h.run(sql, params, Completion::WithCallback(done));
        });
        Box::pin(async move { pending.await.map(Statement::new) })
    }

    pub(crate) fn run_sync(&self, sql: &str, params: Params) -> DuckDbResult<Statement> {
        let handle = self.slot.get("run")?;
        Ok(Statement::new(handle.run(sql, params, Completion::WithoutCallback)))
    }

    pub(crate) fn stream(&self, sql: &str, params: Params) -> DuckDbResult<RowStream> {
        self.slot.get("stream")?.stream(sql, params)
    }

    pub(crate) fn arrow_ipc_stream(&self, sql: &str, params: Params) -> DuckDbResult<BatchStream> {
        self.slot.get("arrow_ipc_stream")?.arrow_ipc_stream(sql, params)
    }

    pub(crate) fn register_udf<F>(&self, name: &str, return_type: &str, fun: F) -> DuckDbResult<()>
    where
        F: Fn(&[Value]) -> DuckDbResult<Value> + Send + Sync + 'static,
    {
        self.slot
            .get("register_udf")?
            .register_udf(name, return_type, Arc::new(fun))
    }

    pub(crate) fn register_bulk<F>(&self, name: &str, return_type: &str, fun: F) -> DuckDbResult<()>
    where
        F: Fn(&[Vec<Value>]) -> DuckDbResult<Vec<Value>> + Send + Sync + 'static,
    {
        self.slot
            .get("register_bulk")?
            .register_bulk(name, return_type, Arc::new(fun))
    }

    pub(crate) fn unregister_udf(&self, name: &str) -> Pending<()> {
        self.call("unregister_udf", |h, done| h.unregister_udf(name, done))
    }

    pub(crate) fn register_buffer(&self, name: &str, batches: RecordBatches, force: bool) -> Pending<()> {
        self.call("register_buffer", |h, done| {
            h.register_buffer(name, batches, force, done)
        })
    }

    pub(crate) fn unregister_buffer(&self, name: &str) -> Pending<()> {
        self.call("unregister_buffer", |h, done| h.unregister_buffer(name, done))
    }

    /// Take the handle out of the slot and release it.
    ///
    /// The slot is emptied at call time so a concurrent close fails instead of
    /// releasing twice. If the engine refuses, the handle is put back.
    pub(crate) fn close(&self) -> BoxFuture<'static, DuckDbResult<()>> {
        let slot = self.slot.clone();
        let owner = self.owner;
        let taken = self.slot.take("close");
        Box::pin(async move {
            let handle = taken?;
            let result = promisify(|done| handle.close(done)).await;
            match &result {
                Ok(()) => info!(owner, "Closed DuckDB handle"),
                Err(err) => {
                    warn!(owner, error = %err, "Close failed, handle kept");
                    slot.restore(handle);
                }
            }
            result
        })
    }
}

/// A connection to a [`Database`].
///
/// Connections run their work independently of the database's own queue and
/// stay usable after the database facade is closed. Clones share the handle.
#[derive(Clone)]
pub struct Connection {
    surface: QuerySurface<dyn NativeConnection>,
}

impl Connection {
    /// Open a new connection to `db`.
    ///
    /// Fails as uninitialized if `db` has been closed.
    #[instrument(skip(db))]
    pub async fn create(db: &Database) -> DuckDbResult<Self> {
        let pending: Pending<ConnectionHandle> = db.surface().call("connect", |h, done| h.connect(done));
        let handle = pending.await?;
        debug!("Connection ready");
        Ok(Self::from_handle(handle))
    }

    pub(crate) fn from_handle(handle: ConnectionHandle) -> Self {
        Self {
            surface: QuerySurface::ready("Connection", "connection", handle),
        }
    }

    /// Run `sql` and collect every row.
    pub fn all(&self, sql: &str, params: impl Into<Params>) -> Pending<Rows> {
        self.surface.all(sql, params.into())
    }

    /// Run `sql` and collect the result as Arrow record batches.
    pub fn arrow_ipc_all(&self, sql: &str, params: impl Into<Params>) -> Pending<RecordBatches> {
        self.surface.arrow_ipc_all(sql, params.into())
    }

    /// Run `sql`, calling `on_row` for every row and `on_complete` with the
    /// row count or the error that stopped the query.
    pub fn each<R, C>(&self, sql: &str, params: impl Into<Params>, on_row: R, on_complete: C) -> DuckDbResult<()>
    where
        R: FnMut(Row) + Send + 'static,
        C: FnOnce(DuckDbResult<usize>) + Send + 'static,
    {
        self.surface
            .each(sql, params.into(), Box::new(on_row), Box::new(on_complete))
    }

    /// Execute `sql` for its side effects.
    ///
    /// Without parameters `sql` may hold several semicolon-separated
    /// statements; with parameters it must be a single statement.
    pub fn exec(&self, sql: &str, params: impl Into<Params>) -> Pending<()> {
        self.surface.exec(sql, params.into())
    }

    /// Prepare `sql`, binding `params` as defaults for later executions.
    pub fn prepare(&self, sql: &str, params: impl Into<Params>) -> BoxFuture<'static, DuckDbResult<Statement>> {
        self.surface.prepare(sql, params.into())
    }

    /// Prepare `sql` without waiting. Preparation errors surface on first use.
    pub fn prepare_sync(&self, sql: &str, params: impl Into<Params>) -> DuckDbResult<Statement> {
        self.surface.prepare_sync(sql, params.into())
    }

    /// Prepare and execute `sql`, resolving with the statement.
    pub fn run(&self, sql: &str, params: impl Into<Params>) -> BoxFuture<'static, DuckDbResult<Statement>> {
        self.surface.run(sql, params.into())
    }

    /// Prepare and execute `sql` without waiting.
    pub fn run_sync(&self, sql: &str, params: impl Into<Params>) -> DuckDbResult<Statement> {
        self.surface.run_sync(sql, params.into())
    }

    /// Stream rows of `sql` as they are produced.
    pub fn stream(&self, sql: &str, params: impl Into<Params>) -> DuckDbResult<RowStream> {
        self.surface.stream(sql, params.into())
    }

    /// Stream Arrow record batches of `sql` as they are produced.
    pub fn arrow_ipc_stream(&self, sql: &str, params: impl Into<Params>) -> DuckDbResult<BatchStream> {
        self.surface.arrow_ipc_stream(sql, params.into())
    }

    /// Register a scalar function.
    pub fn register_udf<F>(&self, name: &str, return_type: &str, fun: F) -> DuckDbResult<()>
    where
        F: Fn(&[Value]) -> DuckDbResult<Value> + Send + Sync + 'static,
    {
        self.surface.register_udf(name, return_type, fun)
    }

    /// Register a vectorized function.
    pub fn register_bulk<F>(&self, name: &str, return_type: &str, fun: F) -> DuckDbResult<()>
    where
        F: Fn(&[Vec<Value>]) -> DuckDbResult<Vec<Value>> + Send + Sync + 'static,
    {
        self.surface.register_bulk(name, return_type, fun)
    }

    /// Remove a registered function.
    pub fn unregister_udf(&self, name: &str) -> Pending<()> {
        self.surface.unregister_udf(name)
    }

    /// Expose Arrow record batches as a table named `name`.
    ///
    /// An existing table of that name is replaced only when `force` is set.
    pub fn register_buffer(&self, name: &str, batches: RecordBatches, force: bool) -> Pending<()> {
        self.surface.register_buffer(name, batches, force)
    }

    /// Remove a table registered with [`Connection::register_buffer`].
    pub fn unregister_buffer(&self, name: &str) -> Pending<()> {
        self.surface.unregister_buffer(name)
    }

    /// Close the connection. Every later operation fails as uninitialized.
    pub fn close(&self) -> BoxFuture<'static, DuckDbResult<()>> {
        self.surface.close()
    }

    /// Whether the connection is open.
    pub fn is_open(&self) -> bool {
        self.surface.slot.is_ready()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("open", &self.is_open())
            .finish()
    }
}
