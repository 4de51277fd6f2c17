//! SQL execution seam for database-backed elements.
//!
//! Elements never touch a connection directly. They hand a callback to a
//! [`SqlExecutor`], which owns connecting, transactions, and release:
//!
//! ```text
//! single_execute(cb)
//!   ├── ensure table (once, under table_create_lock())
//!   ├── acquire connection
//!   ├── BEGIN
//!   ├── cb(&mut dyn Cursor)
//!   ├── COMMIT            (ROLLBACK if cb fails)
//!   └── release connection
//! ```

mod postgres;
mod statements;

pub use postgres::PostgresHelper;
pub use statements::{SqlStatements, quote_identifier, validate_identifier};

use crate::Result;
use crate::models::PostgresElementConfig;
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};

/// Connection target and pool sizing for a [`PostgresHelper`].
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ConnectionParams {
    /// Database name.
    pub db_name: String,
    /// Server host; `None` tries the local Unix socket directories.
    pub db_host: Option<String>,
    /// Server port; `None` uses 5432.
    pub db_port: Option<u16>,
    /// Role; `None` uses the `USER` environment variable.
    pub db_user: Option<String>,
    /// Password, if any.
    pub db_pass: Option<String>,
    /// Maximum pooled connections.
    pub pool_size: usize,
}

impl From<&PostgresElementConfig> for ConnectionParams {
    fn from(config: &PostgresElementConfig) -> Self {
        Self {
            db_name: config.db_name.clone(),
            db_host: config.db_host.clone(),
            db_port: config.db_port,
            db_user: config.db_user.clone(),
            db_pass: config.db_pass.clone(),
            pool_size: config.pool_size.max(1),
        }
    }
}

impl std::fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("db_name", &self.db_name)
            .field("db_host", &self.db_host)
            .field("db_port", &self.db_port)
            .field("db_user", &self.db_user)
            .field("db_pass", &self.db_pass.as_ref().map(|_| "[REDACTED]"))
            .field("pool_size", &self.pool_size)
            .finish()
    }
}

/// A bound statement parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlParam<'a> {
    /// `TEXT` value.
    Text(&'a str),
    /// `BYTEA` value.
    Bytes(&'a [u8]),
}

/// A decoded result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    /// `TEXT`/`VARCHAR` value.
    Text(String),
    /// `BYTEA` value.
    Bytes(Vec<u8>),
    /// SQL `NULL`.
    Null,
}

impl SqlValue {
    /// Returns the bytes of a `BYTEA` value.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// One decoded result row.
pub type SqlRow = Vec<SqlValue>;

/// Statement execution inside one open transaction.
pub trait Cursor {
    /// Executes a statement, returning the number of rows affected.
    ///
    /// # Errors
    ///
    /// Returns the mapped database error.
    fn execute(&mut self, sql: &str, params: &[SqlParam<'_>]) -> Result<u64>;

    /// Runs a query. Its rows replace the cursor's pending result set.
    ///
    /// Returns the number of rows fetched.
    ///
    /// # Errors
    ///
    /// Returns the mapped database error.
    fn query(&mut self, sql: &str, params: &[SqlParam<'_>]) -> Result<usize>;
}

/// Callback run against a live cursor.
pub type CursorCallback<'a> = dyn FnMut(&mut dyn Cursor) -> Result<()> + 'a;

/// Connection and statement execution helper.
///
/// Implementations own pooling, transaction wrapping, and any retry policy.
pub trait SqlExecutor: Send + Sync {
    /// Registers a `CREATE TABLE IF NOT EXISTS` statement to run before the
    /// next execution.
    fn set_table_create_sql(&self, sql: String);

    /// Runs `callback` in one connect/begin/commit/release cycle.
    ///
    /// When `yield_result_rows` is true, the rows of the last query issued by
    /// the callback are returned; otherwise the result is empty.
    ///
    /// # Errors
    ///
    /// Returns the callback's error or the mapped database error. The
    /// transaction is rolled back in either case.
    fn single_execute(
        &self,
        callback: &mut CursorCallback<'_>,
        yield_result_rows: bool,
    ) -> Result<Vec<SqlRow>>;
}

/// Process-wide lock serializing table creation.
///
/// One lock covers every table; creation runs at most once per helper.
pub fn table_create_lock() -> Arc<Mutex<()>> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    Arc::clone(LOCK.get_or_init(|| Arc::new(Mutex::new(()))))
}
