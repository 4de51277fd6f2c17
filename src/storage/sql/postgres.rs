//! PostgreSQL implementation of [`SqlExecutor`].
//!
//! Connections come from a deadpool pool shared process-wide per connection
//! target. The pool is driven by a shared multi-thread tokio runtime so that
//! callers stay synchronous.

#[cfg(feature = "postgres")]
#[allow(clippy::excessive_nesting)]
mod implementation {
    use crate::storage::sql::{
        ConnectionParams, Cursor, CursorCallback, SqlExecutor, SqlParam, SqlRow, SqlValue,
    };
    use crate::{Error, Result};
    use deadpool_postgres::{Config, ManagerConfig, Pool, PoolError, RecyclingMethod, Runtime};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::future::Future;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, OnceLock};
    use std::time::Duration;
    use tokio::runtime::{Handle, RuntimeFlavor};
    use tokio_postgres::NoTls;
    use tokio_postgres::error::SqlState;
    use tokio_postgres::types::{ToSql, Type};

    /// Pool acquire/create/recycle timeout.
    const POOL_TIMEOUT: Duration = Duration::from_secs(5);

    /// Returns the runtime that drives every pool in the process.
    ///
    /// Built at most once. A build failure is kept and reported on every call.
    fn shared_runtime() -> Result<&'static tokio::runtime::Runtime> {
        static RUNTIME: OnceLock<std::result::Result<tokio::runtime::Runtime, String>> =
            OnceLock::new();

        RUNTIME
            .get_or_init(|| {
                tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(2)
                    .thread_name("classify-store-pg")
                    .enable_all()
                    .build()
                    .map_err(|e| e.to_string())
            })
            .as_ref()
            .map_err(|cause| Error::OperationFailed {
                operation: "postgres_create_runtime".to_string(),
                cause: cause.clone(),
            })
    }

    /// Blocks on `f` using the shared runtime.
    ///
    /// Works from plain threads and from multi-thread runtime workers.
    fn block_on<F: Future>(f: F) -> Result<F::Output> {
        let rt = shared_runtime()?;
        match Handle::try_current() {
            Err(_) => Ok(rt.block_on(f)),
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                Ok(tokio::task::block_in_place(|| rt.handle().block_on(f)))
            },
            Ok(_) => Err(Error::OperationFailed {
                operation: "postgres_block_on".to_string(),
                cause: "blocking database call from a current-thread runtime".to_string(),
            }),
        }
    }

    /// Returns the pool for `params`, creating it on first use.
    fn shared_pool(params: &ConnectionParams) -> Result<Pool> {
        static POOLS: OnceLock<Mutex<HashMap<ConnectionParams, Pool>>> = OnceLock::new();

        let mut pools = POOLS.get_or_init(|| Mutex::new(HashMap::new())).lock();
        if let Some(pool) = pools.get(params) {
            return Ok(pool.clone());
        }

        let pool = build_pool_config(params)
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| Error::OperationFailed {
                operation: "postgres_create_pool".to_string(),
                cause: e.to_string(),
            })?;
        pools.insert(params.clone(), pool.clone());
        Ok(pool)
    }

    /// Builds a deadpool config from connection parameters.
    fn build_pool_config(params: &ConnectionParams) -> Config {
        let mut cfg = Config::new();
        cfg.host.clone_from(&params.db_host);
        cfg.port = params.db_port;
        cfg.user = params
            .db_user
            .clone()
            .or_else(|| std::env::var("USER").ok());
        cfg.password.clone_from(&params.db_pass);
        cfg.dbname = Some(params.db_name.clone());

        cfg.pool = Some(deadpool_postgres::PoolConfig {
            max_size: params.pool_size,
            timeouts: deadpool_postgres::Timeouts {
                wait: Some(POOL_TIMEOUT),
                create: Some(POOL_TIMEOUT),
                recycle: Some(POOL_TIMEOUT),
            },
            ..Default::default()
        });
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg
    }

    /// Maps a tokio-postgres error onto the crate taxonomy.
    fn map_pg_error(operation: &str, e: &tokio_postgres::Error) -> Error {
        let operation = operation.to_string();
        let cause = e
            .as_db_error()
            .map_or_else(|| e.to_string(), |db| db.message().to_string());

        match e.code() {
            Some(code) if *code == SqlState::UNIQUE_VIOLATION => {
                Error::UniqueViolation { operation, cause }
            },
            Some(code)
                if *code == SqlState::INSUFFICIENT_PRIVILEGE || code.code().starts_with("28") =>
            {
                Error::PermissionDenied { operation, cause }
            },
            Some(code) if code.code().starts_with("08") => Error::Connectivity { operation, cause },
            Some(_) => Error::OperationFailed { operation, cause },
            None => Error::Connectivity { operation, cause },
        }
    }

    /// Maps a pool checkout error.
    fn map_pool_error(e: PoolError) -> Error {
        match e {
            PoolError::Backend(ref pg) => map_pg_error("postgres_get_client", pg),
            other => Error::Connectivity {
                operation: "postgres_get_client".to_string(),
                cause: other.to_string(),
            },
        }
    }

    /// Binds parameters for tokio-postgres.
    fn bind<'p>(params: &'p [SqlParam<'_>]) -> Vec<&'p (dyn ToSql + Sync)> {
        params
            .iter()
            .map(|p| match p {
                SqlParam::Text(s) => s as &(dyn ToSql + Sync),
                SqlParam::Bytes(b) => b as &(dyn ToSql + Sync),
            })
            .collect()
    }

    /// Decodes a row of text/bytea columns.
    fn decode_row(row: &tokio_postgres::Row) -> Result<SqlRow> {
        let decode_err = |e: tokio_postgres::Error| Error::Serialization(e.to_string());
        row.columns()
            .iter()
            .enumerate()
            .map(|(i, column)| {
                let ty = column.type_();
                if *ty == Type::BYTEA {
                    let value: Option<Vec<u8>> = row.try_get(i).map_err(decode_err)?;
                    Ok(value.map_or(SqlValue::Null, SqlValue::Bytes))
                } else if *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::NAME {
                    let value: Option<String> = row.try_get(i).map_err(decode_err)?;
                    Ok(value.map_or(SqlValue::Null, SqlValue::Text))
                } else {
                    Err(Error::Serialization(format!(
                        "unsupported column type '{ty}' for column '{}'",
                        column.name()
                    )))
                }
            })
            .collect()
    }

    /// Cursor over one open transaction.
    struct PgCursor<'t, 'c> {
        tx: &'t deadpool_postgres::Transaction<'c>,
        rows: Vec<SqlRow>,
    }

    impl Cursor for PgCursor<'_, '_> {
        fn execute(&mut self, sql: &str, params: &[SqlParam<'_>]) -> Result<u64> {
            let bound = bind(params);
            block_on(self.tx.execute(sql, &bound))?
                .map_err(|e| map_pg_error("postgres_execute", &e))
        }

        fn query(&mut self, sql: &str, params: &[SqlParam<'_>]) -> Result<usize> {
            let bound = bind(params);
            let rows = block_on(self.tx.query(sql, &bound))?
                .map_err(|e| map_pg_error("postgres_query", &e))?;
            self.rows = rows.iter().map(decode_row).collect::<Result<_>>()?;
            Ok(self.rows.len())
        }
    }

    /// PostgreSQL connection helper.
    ///
    /// Cheap to construct: no connection is opened until the first
    /// [`single_execute`](SqlExecutor::single_execute).
    pub struct PostgresHelper {
        params: ConnectionParams,
        create_lock: Arc<Mutex<()>>,
        table_create_sql: Mutex<Option<String>>,
        table_ready: AtomicBool,
    }

    impl PostgresHelper {
        /// Creates a helper for `params`.
        ///
        /// `create_lock` serializes table creation across helpers; pass
        /// [`table_create_lock`](crate::storage::sql::table_create_lock) to share
        /// it process-wide.
        #[must_use]
        pub fn new(params: ConnectionParams, create_lock: Arc<Mutex<()>>) -> Self {
            Self {
                params,
                create_lock,
                table_create_sql: Mutex::new(None),
                table_ready: AtomicBool::new(false),
            }
        }

        /// Connection parameters.
        #[must_use]
        pub const fn params(&self) -> &ConnectionParams {
            &self.params
        }

        /// Runs the registered creation statement once.
        fn ensure_table(&self, client: &deadpool_postgres::Object) -> Result<()> {
            if self.table_ready.load(Ordering::Acquire) {
                return Ok(());
            }
            let Some(sql) = self.table_create_sql.lock().clone() else {
                return Ok(());
            };

            let _guard = self.create_lock.lock();
            if self.table_ready.load(Ordering::Acquire) {
                return Ok(());
            }

            block_on(client.batch_execute(&sql))?
                .map_err(|e| map_pg_error("postgres_create_table", &e))?;

            self.table_ready.store(true, Ordering::Release);
            tracing::info!(db = %self.params.db_name, "Ensured classification table exists");
            Ok(())
        }
    }

    impl std::fmt::Debug for PostgresHelper {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("PostgresHelper")
                .field("params", &self.params)
                .field("table_ready", &self.table_ready.load(Ordering::Relaxed))
                .finish_non_exhaustive()
        }
    }

    impl SqlExecutor for PostgresHelper {
        fn set_table_create_sql(&self, sql: String) {
            *self.table_create_sql.lock() = Some(sql);
            self.table_ready.store(false, Ordering::Release);
        }

        fn single_execute(
            &self,
            callback: &mut CursorCallback<'_>,
            yield_result_rows: bool,
        ) -> Result<Vec<SqlRow>> {
            let pool = shared_pool(&self.params)?;
            let mut client = block_on(pool.get())?.map_err(map_pool_error)?;

            self.ensure_table(&client)?;

            let tx = block_on(client.transaction())?
                .map_err(|e| map_pg_error("postgres_begin", &e))?;

            let rows = {
                let mut cursor = PgCursor {
                    tx: &tx,
                    rows: Vec::new(),
                };
                // Dropping `tx` on error rolls the transaction back.
                callback(&mut cursor)?;
                cursor.rows
            };

            block_on(tx.commit())?.map_err(|e| map_pg_error("postgres_commit", &e))?;

            Ok(if yield_result_rows { rows } else { Vec::new() })
        }
    }

}

#[cfg(feature = "postgres")]
pub use implementation::PostgresHelper;

#[cfg(not(feature = "postgres"))]
mod stub {
    use crate::storage::sql::{ConnectionParams, CursorCallback, SqlExecutor, SqlRow};
    use crate::{Error, Result};
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Stub PostgreSQL helper when the feature is not enabled.
    #[derive(Debug)]
    pub struct PostgresHelper {
        params: ConnectionParams,
    }

    impl PostgresHelper {
        /// Creates a new helper (stub).
        #[must_use]
        pub fn new(params: ConnectionParams, _create_lock: Arc<Mutex<()>>) -> Self {
            Self { params }
        }

        /// Connection parameters.
        #[must_use]
        pub const fn params(&self) -> &ConnectionParams {
            &self.params
        }
    }

    impl SqlExecutor for PostgresHelper {
        fn set_table_create_sql(&self, _sql: String) {}

        fn single_execute(
            &self,
            _callback: &mut CursorCallback<'_>,
            _yield_result_rows: bool,
        ) -> Result<Vec<SqlRow>> {
            Err(Error::FeatureNotEnabled("postgres".to_string()))
        }
    }
}

#[cfg(not(feature = "postgres"))]
pub use stub::PostgresHelper;
