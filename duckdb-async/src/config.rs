//! Open options for DuckDB databases.
//!
//! A database is opened with either one of the numeric `OPEN_*` access-mode
//! constants or a [`DuckDbConfig`] record. Both are normalized into a
//! [`ConfigRecord`] (option name to value) before the engine sees them.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{DuckDbError, DuckDbResult};

/// Open the database for reading only.
pub const OPEN_READONLY: i32 = 0x0000_0001;
/// Open the database for reading and writing.
pub const OPEN_READWRITE: i32 = 0x0000_0002;
/// Create the database if it does not exist.
pub const OPEN_CREATE: i32 = 0x0000_0004;
/// Serialized threading mode.
pub const OPEN_FULLMUTEX: i32 = 0x0001_0000;
/// Shared cache mode.
pub const OPEN_SHAREDCACHE: i32 = 0x0002_0000;
/// Private cache mode.
pub const OPEN_PRIVATECACHE: i32 = 0x0004_0000;

/// Value of the `duckdb_api` option injected into every open record.
pub const API_TAG: &str = "rust-async";

/// Engine option names to values, handed verbatim to the engine on open.
pub type ConfigRecord = BTreeMap<String, String>;

/// The path string DuckDB uses for in-memory databases.
pub const IN_MEMORY: &str = ":memory:";

/// DuckDB database path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabasePath {
    /// In-memory database.
    InMemory,
    /// File-based database.
    File(PathBuf),
}

impl DatabasePath {
    /// Get the path string for DuckDB.
    pub fn as_str(&self) -> Cow<'_, str> {
        match self {
            Self::InMemory => Cow::Borrowed(IN_MEMORY),
            Self::File(path) => path.to_string_lossy(),
        }
    }

    /// Check if this is an in-memory database.
    pub fn is_in_memory(&self) -> bool {
        matches!(self, Self::InMemory)
    }
}

impl From<&str> for DatabasePath {
    fn from(path: &str) -> Self {
        if path.is_empty() || path == IN_MEMORY {
            Self::InMemory
        } else {
            Self::File(PathBuf::from(path))
        }
    }
}

impl From<String> for DatabasePath {
    fn from(path: String) -> Self {
        Self::from(path.as_str())
    }
}

impl From<&Path> for DatabasePath {
    fn from(path: &Path) -> Self {
        Self::File(path.to_path_buf())
    }
}

impl From<PathBuf> for DatabasePath {
    fn from(path: PathBuf) -> Self {
        Self::File(path)
    }
}

/// Database access mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AccessMode {
    /// Read-write access (default).
    #[default]
    ReadWrite,
    /// Read-only access.
    ReadOnly,
}

impl AccessMode {
    /// Normalize a numeric `OPEN_*` constant.
    ///
    /// Only an exact `OPEN_READONLY` selects read-only access; any other value,
    /// including combinations with other flags, opens read-write.
    pub fn from_flags(flags: i32) -> Self {
        if flags == OPEN_READONLY {
            Self::ReadOnly
        } else {
            Self::ReadWrite
        }
    }

    /// Convert to DuckDB config value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadWrite => "read_write",
            Self::ReadOnly => "read_only",
        }
    }
}

/// DuckDB configuration.
#[derive(Debug, Clone)]
pub struct DuckDbConfig {
    /// Database path.
    pub path: DatabasePath,
    /// Access mode.
    pub access_mode: AccessMode,
    /// Number of threads for parallel execution.
    pub threads: Option<usize>,
    /// Memory limit (e.g., "4GB").
    pub memory_limit: Option<String>,
    /// Enable external access (file system, network).
    pub enable_external_access: bool,
    /// Enable object cache.
    pub enable_object_cache: bool,
    /// Maximum memory for aggregation (before spilling to disk).
    pub max_memory: Option<String>,
    /// Temporary directory for spilling.
    pub temp_directory: Option<PathBuf>,
    /// Default null order (NULLS FIRST or NULLS LAST).
    pub default_null_order: Option<String>,
    /// Default order type (ASC or DESC).
    pub default_order: Option<String>,
    /// Any other engine option, passed through unchanged.
    pub options: BTreeMap<String, String>,
}

impl Default for DuckDbConfig {
    fn default() -> Self {
        Self {
            path: DatabasePath::InMemory,
            access_mode: AccessMode::ReadWrite,
            threads: None,
            memory_limit: None,
            enable_external_access: true,
            enable_object_cache: true,
            max_memory: None,
            temp_directory: None,
            default_null_order: None,
            default_order: None,
            options: BTreeMap::new(),
        }
    }
}

impl DuckDbConfig {
    /// Create a new in-memory configuration.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Create a configuration from a file path.
    pub fn from_path(path: impl AsRef<Path>) -> DuckDbResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.exists() && !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        Ok(Self {
            path: DatabasePath::File(path.to_path_buf()),
            ..Self::default()
        })
    }

    /// Parse a connection URL.
    ///
    /// Supported formats:
    /// - `duckdb://` or `duckdb://:memory:` - In-memory database
    /// - `duckdb:///path/to/file.duckdb` - File-based database
    /// - `duckdb:///path/to/file.duckdb?threads=4&memory_limit=4GB`
    ///
    /// Unrecognized query parameters are kept as free-form engine options.
    pub fn from_url(url: &str) -> DuckDbResult<Self> {
        let url = url.trim();

        let rest = url.strip_prefix("duckdb://").ok_or_else(|| {
            DuckDbError::config(format!(
                "Invalid URL scheme, expected 'duckdb://', got: {}",
                url
            ))
        })?;

        let (path_str, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rest, None),
        };

        let mut config = Self {
            path: DatabasePath::from(path_str),
            ..Self::default()
        };

        if let Some(query) = query {
            for param in query.split('&').filter(|p| !p.is_empty()) {
                let (key, value) = param.split_once('=').ok_or_else(|| {
                    DuckDbError::config(format!("Malformed URL parameter: {}", param))
                })?;
                match key {
                    "threads" => {
                        config.threads = Some(value.parse().map_err(|_| {
                            DuckDbError::config(format!("Invalid thread count: {}", value))
                        })?);
                    }
                    "memory_limit" => config.memory_limit = Some(value.to_string()),
                    "max_memory" => config.max_memory = Some(value.to_string()),
                    "access_mode" | "mode" => {
                        config.access_mode = match value {
                            "read_only" | "readonly" | "ro" => AccessMode::ReadOnly,
                            _ => AccessMode::ReadWrite,
                        };
                    }
                    "external_access" => {
                        config.enable_external_access = value == "true" || value == "1";
                    }
                    "object_cache" => {
                        config.enable_object_cache = value == "true" || value == "1";
                    }
                    _ => {
                        config.options.insert(key.to_string(), value.to_string());
                    }
                }
            }
        }

        Ok(config)
    }

    /// Create a builder for more complex configurations.
    pub fn builder() -> DuckDbConfigBuilder {
        DuckDbConfigBuilder::default()
    }

    /// Check if this is an in-memory database.
    pub fn is_in_memory(&self) -> bool {
        self.path.is_in_memory()
    }

    /// Check if this is a read-only configuration.
    pub fn is_read_only(&self) -> bool {
        matches!(self.access_mode, AccessMode::ReadOnly)
    }

    /// Render the configuration as an engine option record.
    ///
    /// Settings left at the engine default are omitted.
    pub fn to_record(&self) -> ConfigRecord {
        let mut record = self.options.clone();
        record.insert("access_mode".into(), self.access_mode.as_str().into());

        if let Some(threads) = self.threads {
            record.insert("threads".into(), threads.to_string());
        }
        if let Some(ref limit) = self.memory_limit {
            record.insert("memory_limit".into(), limit.clone());
        }
        if let Some(ref max) = self.max_memory {
            record.insert("max_memory".into(), max.clone());
        }
        if let Some(ref dir) = self.temp_directory {
            record.insert("temp_directory".into(), dir.to_string_lossy().into_owned());
        }
        if !self.enable_external_access {
            record.insert("enable_external_access".into(), "false".into());
        }
        if !self.enable_object_cache {
            record.insert("enable_object_cache".into(), "false".into());
        }
        if let Some(ref order) = self.default_null_order {
            record.insert("default_null_order".into(), order.clone());
        }
        if let Some(ref order) = self.default_order {
            record.insert("default_order".into(), order.clone());
        }

        record
    }
}

/// Builder for DuckDB configuration.
#[derive(Debug, Clone, Default)]
pub struct DuckDbConfigBuilder {
    config: DuckDbConfig,
}

impl DuckDbConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the database path.
    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.config.path = DatabasePath::File(path.as_ref().to_path_buf());
        self
    }

    /// Use an in-memory database.
    pub fn in_memory(mut self) -> Self {
        self.config.path = DatabasePath::InMemory;
        self
    }

    /// Set the access mode.
    pub fn access_mode(mut self, mode: AccessMode) -> Self {
        self.config.access_mode = mode;
        self
    }

    /// Set read-only mode.
    pub fn read_only(mut self) -> Self {
        self.config.access_mode = AccessMode::ReadOnly;
        self
    }

    /// Set the number of threads.
    pub fn threads(mut self, threads: usize) -> Self {
        self.config.threads = Some(threads);
        self
    }

    /// Set the memory limit.
    pub fn memory_limit(mut self, limit: impl Into<String>) -> Self {
        self.config.memory_limit = Some(limit.into());
        self
    }

    /// Set the max memory for aggregation.
    pub fn max_memory(mut self, max: impl Into<String>) -> Self {
        self.config.max_memory = Some(max.into());
        self
    }

    /// Enable or disable external access.
    pub fn external_access(mut self, enable: bool) -> Self {
        self.config.enable_external_access = enable;
        self
    }

    /// Enable or disable object cache.
    pub fn object_cache(mut self, enable: bool) -> Self {
        self.config.enable_object_cache = enable;
        self
    }

    /// Set the temporary directory.
    pub fn temp_directory(mut self, path: impl AsRef<Path>) -> Self {
        self.config.temp_directory = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the default null order.
    pub fn default_null_order(mut self, order: impl Into<String>) -> Self {
        self.config.default_null_order = Some(order.into());
        self
    }

    /// Set the default order.
    pub fn default_order(mut self, order: impl Into<String>) -> Self {
        self.config.default_order = Some(order.into());
        self
    }

    /// Set an arbitrary engine option.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.options.insert(key.into(), value.into());
        self
    }

    /// Build the configuration.
    pub fn build(self) -> DuckDbConfig {
        self.config
    }
}

/// How a database is opened: a numeric access-mode constant or a full
/// configuration record.
#[derive(Debug, Clone)]
pub enum OpenOptions {
    /// One of the `OPEN_*` constants.
    Flags(i32),
    /// A configuration record.
    Config(DuckDbConfig),
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self::Flags(OPEN_READWRITE)
    }
}

impl From<()> for OpenOptions {
    fn from(_: ()) -> Self {
        Self::default()
    }
}

impl From<i32> for OpenOptions {
    fn from(flags: i32) -> Self {
        Self::Flags(flags)
    }
}

impl From<Option<i32>> for OpenOptions {
    fn from(flags: Option<i32>) -> Self {
        flags.map(Self::Flags).unwrap_or_default()
    }
}

impl From<AccessMode> for OpenOptions {
    fn from(mode: AccessMode) -> Self {
        Self::Config(DuckDbConfig {
            access_mode: mode,
            ..DuckDbConfig::default()
        })
    }
}

impl From<DuckDbConfig> for OpenOptions {
    fn from(config: DuckDbConfig) -> Self {
        Self::Config(config)
    }
}

impl OpenOptions {
    /// Normalize into the record handed to the engine, tagged as coming
    /// from the async facade.
    pub fn into_record(self) -> ConfigRecord {
        let mut record = match self {
            Self::Flags(flags) => {
                let mut record = ConfigRecord::new();
                record.insert(
                    "access_mode".into(),
                    AccessMode::from_flags(flags).as_str().into(),
                );
                record
            }
            Self::Config(config) => config.to_record(),
        };
        record.insert("duckdb_api".into(), API_TAG.into());
        record
    }
}
