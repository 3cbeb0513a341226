//! Prepared statement facade.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::adapter::{promisify, Completion, Pending};
use crate::error::DuckDbResult;
use crate::handle::HandleSlot;
use crate::native::{NativeStatement, StatementHandle};
use crate::types::{ColumnInfo, Params, RecordBatches, Row, Rows};

const OWNER: &str = "Statement";
const KIND: &str = "statement";

/// A prepared statement.
///
/// Obtained from `prepare`/`run` on a [`crate::Connection`] or
/// [`crate::Database`]. Clones share the underlying handle, so finalizing
/// through one clone invalidates all of them.
#[derive(Clone)]
pub struct Statement {
    slot: Arc<HandleSlot<dyn NativeStatement>>,
}

impl Statement {
    /// Wrap an engine statement handle that is already usable.
    pub(crate) fn new(handle: StatementHandle) -> Self {
        Self {
            slot: Arc::new(HandleSlot::ready(OWNER, KIND, handle)),
        }
    }

    /// Execute and collect every row.
    pub fn all(&self, params: impl Into<Params>) -> Pending<Rows> {
        match self.slot.get("all") {
            Ok(handle) => promisify(|done| handle.all(params.into(), done)),
            Err(err) => Pending::failed(err),
        }
    }

    /// Execute and collect the result as Arrow record batches.
    pub fn arrow_ipc_all(&self, params: impl Into<Params>) -> Pending<RecordBatches> {
        match self.slot.get("arrow_ipc_all") {
            Ok(handle) => promisify(|done| handle.arrow_ipc_all(params.into(), done)),
            Err(err) => Pending::failed(err),
        }
    }

    /// Execute, calling `on_row` for every row and `on_complete` with the
    /// row count or the error that stopped execution.
    ///
    /// Returns as soon as the work is queued.
    pub fn each<R, C>(&self, params: impl Into<Params>, on_row: R, on_complete: C) -> DuckDbResult<()>
    where
        R: FnMut(Row) + Send + 'static,
        C: FnOnce(DuckDbResult<usize>) + Send + 'static,
    {
        let handle = self.slot.get("each")?;
        handle.each(params.into(), Box::new(on_row), Box::new(on_complete));
        Ok(())
    }

    /// Execute for side effects, resolving with this statement for chaining.
    pub fn run(&self, params: impl Into<Params>) -> BoxFuture<'static, DuckDbResult<Statement>> {
        let this = self.clone();
        let pending = match self.slot.get("run") {
            Ok(handle) => promisify(|done| handle.run(params.into(), Completion::WithCallback(done))),
            Err(err) => Pending::failed(err),
        };
        Box::pin(async move {
            pending.await?;
            Ok(this)
        })
    }

    /// Queue an execution without waiting for it.
    ///
    /// Failures that surface later are logged.
    pub fn run_sync(&self, params: impl Into<Params>) -> DuckDbResult<&Self> {
        let handle = self.slot.get("run")?;
        handle.run(params.into(), Completion::WithoutCallback);
        Ok(self)
    }

    /// Release the statement. Every later operation fails as uninitialized.
    pub fn finalize(&self) -> BoxFuture<'static, DuckDbResult<()>> {
        let slot = self.slot.clone();
        let taken = self.slot.take("finalize");
        Box::pin(async move {
            let handle = taken?;
            let result = promisify(|done| handle.finalize(done)).await;
            match &result {
                Ok(()) => debug!("Statement finalized"),
                Err(err) => {
                    warn!(error = %err, "Statement finalize failed");
                    slot.restore(handle);
                }
            }
            result
        })
    }

    /// Result columns, once the engine has produced a result.
    ///
    /// `None` before the first execution and after [`Statement::finalize`].
    pub fn columns(&self) -> Option<Vec<ColumnInfo>> {
        self.slot.peek().and_then(|handle| handle.columns())
    }
}

impl std::fmt::Debug for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("ready", &self.slot.is_ready())
            .finish()
    }
}
