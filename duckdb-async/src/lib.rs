//! Async facade over DuckDB's callback-style client.
//!
//! The engine completes open, connect, prepare, run and close by invoking a
//! callback. This crate wraps that surface in three handle types that can be
//! awaited instead:
//!
//! - [`Database`]: opened by the async factory [`Database::create`]
//! - [`Connection`]: derived from a database with [`Database::connect`]
//! - [`Statement`]: produced by `prepare`/`run` on either of the above
//!
//! Every single-shot operation returns a future that resolves exactly once.
//! Row callbacks ([`Connection::each`]), result streams, interrupts and
//! function registration stay synchronous or multi-shot.
//!
//! All three handles share one lifecycle: *uninitialized → ready → closed*.
//! Any operation on a handle that is not ready fails immediately with
//! [`DuckDbError::Uninitialized`] and never reaches the engine.
//!
//! # Example
//!
//! ```rust,ignore
//! use duckdb_async::{params, Database, OPEN_READWRITE};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::create(":memory:", OPEN_READWRITE).await?;
//!     db.exec("CREATE TABLE sales (region VARCHAR, amount INTEGER)", ()).await?;
//!
//!     let insert = db.prepare("INSERT INTO sales VALUES (?, ?)", ()).await?;
//!     insert.run(params!["north", 10]).await?;
//!     insert.run(params!["south", 32]).await?;
//!     insert.finalize().await?;
//!
//!     let totals = db
//!         .all("SELECT region, sum(amount) AS total FROM sales GROUP BY region", ())
//!         .await?;
//!     println!("{totals:?}");
//!
//!     db.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Streaming
//!
//! ```rust,ignore
//! use futures::StreamExt;
//!
//! let mut rows = conn.stream("SELECT * FROM 'events/*.parquet'", ())?;
//! while let Some(row) = rows.next().await {
//!     let row = row?;
//!     // ...
//! }
//! ```
//!
//! # Engine builds
//!
//! Databases are opened through a [`Binding`]. The statically linked DuckDB
//! build is used unless another one is installed with [`binding::select`]
//! before the first database is opened, or passed to
//! [`Database::create_with`].

pub mod adapter;
pub mod binding;
pub mod config;
pub mod connection;
pub mod database;
pub mod error;
pub mod native;
pub mod statement;
pub mod stream;
pub mod types;

mod handle;

pub use adapter::{promisify, Callback, Completion, Pending};
pub use config::{
    AccessMode, DatabasePath, DuckDbConfig, DuckDbConfigBuilder, OpenOptions, OPEN_CREATE,
    OPEN_FULLMUTEX, OPEN_PRIVATECACHE, OPEN_READONLY, OPEN_READWRITE, OPEN_SHAREDCACHE,
};
pub use connection::Connection;
pub use database::Database;
pub use error::{DuckDbError, DuckDbResult};
pub use native::{Binding, ReplacementScan};
pub use statement::Statement;
pub use stream::{BatchStream, ResultStream, RowStream};
pub use types::{from_row, from_rows, ColumnInfo, Param, Params, RecordBatch, RecordBatches, Row, Rows};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::{DuckDbConfig, OPEN_READONLY, OPEN_READWRITE};
    pub use crate::connection::Connection;
    pub use crate::database::Database;
    pub use crate::error::{DuckDbError, DuckDbResult};
    pub use crate::params;
    pub use crate::statement::Statement;
    pub use crate::types::{Params, Row, Rows};
}
