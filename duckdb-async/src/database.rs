//! Database facade.

use std::sync::Arc;

use duckdb::types::Value;
use futures::future::BoxFuture;
use tracing::{debug, info, instrument};

use crate::adapter::{promisify, Pending};
use crate::binding;
use crate::config::{ConfigRecord, DatabasePath, DuckDbConfig, OpenOptions};
use crate::connection::{Connection, QuerySurface};
use crate::error::DuckDbResult;
use crate::native::{Binding, NativeDatabase, ReplacementScan};
use crate::statement::Statement;
use crate::stream::{BatchStream, RowStream};
use crate::types::{Params, RecordBatches, Row, Rows};

/// An open DuckDB database.
///
/// Created by [`Database::create`]; the value only exists once the engine has
/// finished opening. Clones share the handle, so closing through one clone
/// closes all of them. Connections created from the database keep working
/// after it is closed.
///
/// # Example
///
/// ```rust,ignore
/// use duckdb_async::{Database, OPEN_READWRITE};
///
/// let db = Database::create(":memory:", OPEN_READWRITE).await?;
/// db.exec("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (1), (2)", ()).await?;
/// let rows = db.all("SELECT sum(x) AS total FROM t", ()).await?;
/// db.close().await?;
/// ```
#[derive(Clone)]
pub struct Database {
    surface: QuerySurface<dyn NativeDatabase>,
    path: Arc<DatabasePath>,
    record: Arc<ConfigRecord>,
    binding: Arc<dyn Binding>,
}

impl Database {
    /// Open `path` with the process-wide engine build.
    ///
    /// `options` is an access-mode constant such as [`crate::OPEN_READONLY`]
    /// or a [`DuckDbConfig`]; `()` opens read-write.
    pub async fn create(
        path: impl Into<DatabasePath>,
        options: impl Into<OpenOptions>,
    ) -> DuckDbResult<Self> {
        Self::create_with(binding::selected(), path, options).await
    }

    /// Open the database described by `config`.
    pub async fn open(config: DuckDbConfig) -> DuckDbResult<Self> {
        let path = config.path.clone();
        Self::create(path, config).await
    }

    /// Open `path` through an explicit engine build.
    pub async fn create_with(
        binding: Arc<dyn Binding>,
        path: impl Into<DatabasePath>,
        options: impl Into<OpenOptions>,
    ) -> DuckDbResult<Self> {
        let path = path.into();
        let record = options.into().into_record();
        Self::open_inner(binding, path, record).await
    }

    #[instrument(skip(binding, path, record), fields(binding = binding.name(), path = %path.as_str()))]
    async fn open_inner(
        binding: Arc<dyn Binding>,
        path: DatabasePath,
        record: ConfigRecord,
    ) -> DuckDbResult<Self> {
        let db = Self {
            surface: QuerySurface::empty("Database", "database"),
            path: Arc::new(path),
            record: Arc::new(record),
            binding,
        };

        let handle = promisify(|done| db.binding.open(&db.path, &db.record, done)).await?;
        db.surface.slot.set(handle);
        info!("Database ready");
        Ok(db)
    }

    pub(crate) fn surface(&self) -> &QuerySurface<dyn NativeDatabase> {
        &self.surface
    }

    /// Where the database lives.
    pub fn path(&self) -> &DatabasePath {
        &self.path
    }

    /// The options the engine was opened with.
    pub fn options(&self) -> &ConfigRecord {
        &self.record
    }

    /// Name of the engine build serving this database.
    pub fn binding_name(&self) -> &str {
        self.binding.name()
    }

    /// Whether the database is open.
    pub fn is_open(&self) -> bool {
        self.surface.slot.is_ready()
    }

    /// Open a new [`Connection`] to this database.
    pub async fn connect(&self) -> DuckDbResult<Connection> {
        Connection::create(self).await
    }

    /// Run subsequent queries on this database one at a time.
    pub fn serialize(&self) -> Pending<()> {
        self.surface.call("serialize", |h, done| h.serialize(done))
    }

    /// Let subsequent queries on this database run concurrently.
    pub fn parallelize(&self) -> Pending<()> {
        self.surface.call("parallelize", |h, done| h.parallelize(done))
    }

    /// Resolve once every previously issued query has finished.
    pub fn wait(&self) -> Pending<()> {
        self.surface.call("wait", |h, done| h.wait(done))
    }

    /// Ask the engine to abort whatever this database is running.
    pub fn interrupt(&self) -> DuckDbResult<()> {
        debug!("Interrupting database");
        self.surface.slot.get("interrupt")?.interrupt()
    }

    /// Install a hook that substitutes a table function for unknown table
    /// names.
    pub fn register_replacement_scan<F>(&self, handler: F) -> DuckDbResult<()>
    where
        F: Fn(&str) -> Option<ReplacementScan> + Send + Sync + 'static,
    {
        self.surface
            .slot
            .get("register_replacement_scan")?
            .register_replacement_scan(Arc::new(handler))
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

    /// Prepare `sql` without waiting.
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
    pub fn register_buffer(&self, name: &str, batches: RecordBatches, force: bool) -> Pending<()> {
        self.surface.register_buffer(name, batches, force)
    }

    /// Remove a table registered with [`Database::register_buffer`].
    pub fn unregister_buffer(&self, name: &str) -> Pending<()> {
        self.surface.unregister_buffer(name)
    }

    /// Close the database. Every later operation fails as uninitialized.
    pub fn close(&self) -> BoxFuture<'static, DuckDbResult<()>> {
        self.surface.close()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("binding", &self.binding.name())
            .field("open", &self.is_open())
            .finish()
    }
}
