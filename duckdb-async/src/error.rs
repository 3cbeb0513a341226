//! Error types for the async DuckDB facade.

use thiserror::Error;

/// Result type for DuckDB operations.
pub type DuckDbResult<T> = Result<T, DuckDbError>;

/// Error type for DuckDB operations.
#[derive(Error, Debug)]
pub enum DuckDbError {
    /// An operation was issued on a facade whose handle is absent
    /// (never opened, or already closed/finalized).
    #[error("{owner}.{operation}: uninitialized {kind}")]
    Uninitialized {
        /// Facade type that owns the handle (`Database`, `Connection`, `Statement`).
        owner: &'static str,
        /// Name of the rejected operation.
        operation: &'static str,
        /// Kind of handle the facade wraps.
        kind: &'static str,
    },

    /// DuckDB driver error, passed through unchanged.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query error.
    #[error("Query error: {0}")]
    Query(String),

    /// The selected engine binding does not provide this operation.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Deserialization error.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Type conversion error.
    #[error("Type conversion error: {0}")]
    TypeConversion(String),

    /// File I/O error.
    #[error("File I/O error: {0}")]
    FileIo(#[from] std::io::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DuckDbError {
    /// Create an uninitialized-handle error.
    pub fn uninitialized(owner: &'static str, operation: &'static str, kind: &'static str) -> Self {
        Self::Uninitialized {
            owner,
            operation,
            kind,
        }
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a query error.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Create an unsupported-operation error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create a deserialization error.
    pub fn deserialization(msg: impl Into<String>) -> Self {
        Self::Deserialization(msg.into())
    }

    /// Create a type conversion error.
    pub fn type_conversion(msg: impl Into<String>) -> Self {
        Self::TypeConversion(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this is the uninitialized-handle condition.
    pub fn is_uninitialized(&self) -> bool {
        matches!(self, Self::Uninitialized { .. })
    }

    /// Whether this error originated inside the DuckDB engine.
    pub fn is_engine(&self) -> bool {
        matches!(self, Self::DuckDb(_))
    }
}
