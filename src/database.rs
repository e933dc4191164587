use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::activity::{ActivityContext, ActivityLog};
use crate::cache::{CacheStats, ResponseCache};
use crate::config::DataLayerConfig;
use crate::connection::build_result_set;
use crate::error::DataAccessError;
use crate::metrics::PerformanceMonitor;
use crate::pool::{ConnectionPool, PoolStats, PooledConnection};
use crate::results::{ResultSet, Row, WriteResult};
use crate::retry::with_retry;
use crate::transaction::run_unit_of_work;
use crate::types::{SqlValue, to_sqlite_values};

/// How a statement's result is shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// A read that needs at most one row.
    ReadOne,
    /// A read that returns every matching row.
    ReadMany,
    /// An INSERT/UPDATE/DELETE; returns changes and the inserted rowid.
    Write,
}

impl QueryMode {
    fn operation_name(self) -> &'static str {
        match self {
            QueryMode::ReadOne => "execute.read_one",
            QueryMode::ReadMany => "execute.read_many",
            QueryMode::Write => "execute.write",
        }
    }
}

/// Result of [`Database::execute`]: rows for reads, a write summary for
/// writes.
#[derive(Debug)]
pub enum ExecuteOutcome {
    Rows(ResultSet),
    Write(WriteResult),
}

/// Pool size, queue, and cache counters for the external health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub pool: PoolStats,
    pub cache: CacheStats,
    /// Lifetime cache hit rate, 0.0..=1.0.
    pub cache_hit_rate: f64,
}

struct DatabaseInner {
    pool: ConnectionPool,
    cache: ResponseCache,
    monitor: PerformanceMonitor,
    config: DataLayerConfig,
    activity: Option<Arc<dyn ActivityLog>>,
}

/// The data layer: pool, retry, transactions, cache, and monitoring behind
/// one constructed object.
///
/// Built by the process entry point via [`Database::connect`] (or
/// [`Database::builder`] to attach an activity log) and passed to route
/// handlers by clone; there is no module-level state. Shut down once at
/// process exit with [`Database::shutdown`].
///
/// ```rust,no_run
/// use breakwater_data::prelude::*;
///
/// # async fn demo() -> Result<(), DataAccessError> {
/// let db = Database::connect(DataLayerConfig::new("harbor.db")).await?;
/// let rows = db.read_many("SELECT id, name FROM projects", &[]).await?;
/// # let _ = rows;
/// db.shutdown().await;
/// # Ok(()) }
/// ```
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

/// Builder for [`Database`], for wiring optional collaborators.
pub struct DatabaseBuilder {
    config: DataLayerConfig,
    activity: Option<Arc<dyn ActivityLog>>,
}

impl DatabaseBuilder {
    /// Attach the activity-logging collaborator informed of every write.
    #[must_use]
    pub fn activity_log(mut self, log: Arc<dyn ActivityLog>) -> Self {
        self.activity = Some(log);
        self
    }

    /// Validate the configuration, open the pool (warming `min_size`
    /// connections), and start background maintenance.
    ///
    /// # Errors
    /// `ConfigError` for invalid settings, `ConnectionCreateFailed` if the
    /// database file cannot be opened.
    pub async fn connect(self) -> Result<Database, DataAccessError> {
        self.config.validate()?;
        let pool =
            ConnectionPool::open(self.config.db_path.clone(), self.config.pool.clone()).await?;
        tracing::debug!(db_path = %self.config.db_path.display(), "data layer connected");
        Ok(Database {
            inner: Arc::new(DatabaseInner {
                pool,
                cache: ResponseCache::new(&self.config.cache),
                monitor: PerformanceMonitor::new(&self.config.monitor),
                config: self.config,
                activity: self.activity,
            }),
        })
    }
}

impl Database {
    #[must_use]
    pub fn builder(config: DataLayerConfig) -> DatabaseBuilder {
        DatabaseBuilder {
            config,
            activity: None,
        }
    }

    /// Connect with no optional collaborators.
    ///
    /// # Errors
    /// See [`DatabaseBuilder::connect`].
    pub async fn connect(config: DataLayerConfig) -> Result<Self, DataAccessError> {
        Self::builder(config).connect().await
    }

    /// Execute one statement, retrying transient failures per the configured
    /// policy.
    ///
    /// # Errors
    /// Taxonomy errors from the pool, the driver, or `RetriesExhausted`.
    pub async fn execute(
        &self,
        query: &str,
        params: &[SqlValue],
        mode: QueryMode,
    ) -> Result<ExecuteOutcome, DataAccessError> {
        let started = Instant::now();
        let result = with_retry(&self.inner.config.retry, mode.operation_name(), || {
            let query = query.to_string();
            let params = params.to_vec();
            async move { self.execute_once(query, params, mode).await }
        })
        .await;
        self.inner
            .monitor
            .record_operation(mode.operation_name(), started.elapsed(), result.is_ok());
        result
    }

    /// Read at most one row.
    ///
    /// # Errors
    /// See [`Database::execute`].
    pub async fn read_one(
        &self,
        query: &str,
        params: &[SqlValue],
    ) -> Result<Option<Row>, DataAccessError> {
        match self.execute(query, params, QueryMode::ReadOne).await? {
            ExecuteOutcome::Rows(rs) => Ok(rs.rows.into_iter().next()),
            ExecuteOutcome::Write(_) => Err(DataAccessError::ExecutionError(
                "read_one produced a write result".to_string(),
            )),
        }
    }

    /// Read every matching row.
    ///
    /// # Errors
    /// See [`Database::execute`].
    pub async fn read_many(
        &self,
        query: &str,
        params: &[SqlValue],
    ) -> Result<ResultSet, DataAccessError> {
        match self.execute(query, params, QueryMode::ReadMany).await? {
            ExecuteOutcome::Rows(rs) => Ok(rs),
            ExecuteOutcome::Write(_) => Err(DataAccessError::ExecutionError(
                "read_many produced a write result".to_string(),
            )),
        }
    }

    /// Run one DML statement.
    ///
    /// # Errors
    /// See [`Database::execute`].
    pub async fn write(
        &self,
        query: &str,
        params: &[SqlValue],
    ) -> Result<WriteResult, DataAccessError> {
        match self.execute(query, params, QueryMode::Write).await? {
            ExecuteOutcome::Write(result) => Ok(result),
            ExecuteOutcome::Rows(_) => Err(DataAccessError::ExecutionError(
                "write produced a row result".to_string(),
            )),
        }
    }

    /// Run one DML statement, invalidate the table's cache namespace, and
    /// inform the activity log — best-effort, a logging failure never fails
    /// the write.
    ///
    /// # Errors
    /// See [`Database::execute`]; activity-log failures are swallowed.
    pub async fn write_with_activity(
        &self,
        query: &str,
        params: &[SqlValue],
        ctx: ActivityContext,
    ) -> Result<WriteResult, DataAccessError> {
        let result = self.write(query, params).await?;
        self.inner.cache.invalidate(&ctx.table);
        if let Some(log) = &self.inner.activity {
            let record_id = (result.last_insert_id > 0).then_some(result.last_insert_id);
            if let Err(e) = log.record(ctx.into_event(record_id)).await {
                tracing::warn!(error = %e, "activity log rejected event; write is unaffected");
            }
        }
        Ok(result)
    }

    /// Run a multi-statement SQL script atomically inside one transaction.
    ///
    /// # Errors
    /// `TransactionAborted` if any statement fails; the script is not applied.
    pub async fn execute_batch(&self, sql: &str) -> Result<(), DataAccessError> {
        let started = Instant::now();
        let sql = sql.to_string();
        let result = async {
            let mut conn = self.acquire_tracked().await?;
            run_unit_of_work(&mut conn, move |tx| {
                tx.execute_batch(&sql).map_err(DataAccessError::Sqlite)
            })
            .await
        }
        .await;
        self.inner
            .monitor
            .record_operation("execute.batch", started.elapsed(), result.is_ok());
        result
    }

    /// Run a unit of work on one borrowed connection.
    ///
    /// The closure may issue any number of dependent statements through the
    /// open transaction and inspect intermediate results. Returning `Ok`
    /// commits; returning `Err` rolls back and surfaces
    /// `TransactionAborted` wrapping the cause. The connection goes back to
    /// the pool exactly once either way.
    ///
    /// # Errors
    /// `TransactionAborted`, `RollbackFailed`, or pool errors.
    pub async fn transaction<F, R>(&self, work: F) -> Result<R, DataAccessError>
    where
        F: FnOnce(&mut rusqlite::Transaction<'_>) -> Result<R, DataAccessError> + Send + 'static,
        R: Send + 'static,
    {
        let started = Instant::now();
        let result = async {
            let mut conn = self.acquire_tracked().await?;
            run_unit_of_work(&mut conn, work).await
        }
        .await;
        self.inner
            .monitor
            .record_operation("transaction", started.elapsed(), result.is_ok());
        result
    }

    /// Like [`Database::transaction`], retried under the configured policy.
    /// The whole unit re-runs per attempt, which is safe because each attempt
    /// either commits or leaves nothing behind; the closure must be `Clone`.
    ///
    /// # Errors
    /// See [`Database::transaction`], plus `RetriesExhausted`.
    pub async fn transaction_with_retry<F, R>(&self, work: F) -> Result<R, DataAccessError>
    where
        F: FnOnce(&mut rusqlite::Transaction<'_>) -> Result<R, DataAccessError>
            + Clone
            + Send
            + 'static,
        R: Send + 'static,
    {
        let started = Instant::now();
        let result = with_retry(&self.inner.config.retry, "transaction", || {
            let work = work.clone();
            async move {
                let mut conn = self.acquire_tracked().await?;
                run_unit_of_work(&mut conn, work).await
            }
        })
        .await;
        self.inner
            .monitor
            .record_operation("transaction", started.elapsed(), result.is_ok());
        result
    }

    /// Liveness probe: one round-trip through the pool.
    ///
    /// # Errors
    /// Whatever the round-trip fails with.
    pub async fn ping(&self) -> Result<(), DataAccessError> {
        self.read_one("SELECT 1", &[]).await.map(|_| ())
    }

    /// The response cache, for route handlers that cache GET responses.
    #[must_use]
    pub fn cache(&self) -> &ResponseCache {
        &self.inner.cache
    }

    /// The performance monitor, for endpoint-level recording.
    #[must_use]
    pub fn monitor(&self) -> &PerformanceMonitor {
        &self.inner.monitor
    }

    /// Synchronous, cheap counters for the external health endpoint.
    #[must_use]
    pub fn health(&self) -> HealthSnapshot {
        let cache = self.inner.cache.stats();
        HealthSnapshot {
            pool: self.inner.pool.stats(),
            cache_hit_rate: cache.hit_rate(),
            cache,
        }
    }

    /// Drain and close the pool, then drop cached responses. Idempotent.
    pub async fn shutdown(&self) {
        self.inner.pool.shutdown().await;
        self.inner.cache.clear();
        tracing::debug!("data layer shut down");
    }

    async fn acquire_tracked(&self) -> Result<PooledConnection, DataAccessError> {
        let started = Instant::now();
        let result = self.inner.pool.acquire().await;
        self.inner
            .monitor
            .record_operation("pool.acquire", started.elapsed(), result.is_ok());
        result
    }

    async fn execute_once(
        &self,
        query: String,
        params: Vec<SqlValue>,
        mode: QueryMode,
    ) -> Result<ExecuteOutcome, DataAccessError> {
        let mut conn = self.acquire_tracked().await?;
        match mode {
            QueryMode::ReadOne | QueryMode::ReadMany => {
                let limit = (mode == QueryMode::ReadOne).then_some(1);
                conn.interact(move |raw| {
                    let values = to_sqlite_values(&params);
                    let mut stmt = raw.prepare(&query)?;
                    build_result_set(&mut stmt, &values, limit)
                })
                .await
                .map(ExecuteOutcome::Rows)
            }
            QueryMode::Write => conn
                .interact(move |raw| {
                    let values = to_sqlite_values(&params);
                    let changes = {
                        let mut stmt = raw.prepare(&query)?;
                        stmt.execute(rusqlite::params_from_iter(values.iter()))?
                    };
                    Ok(WriteResult {
                        changes,
                        last_insert_id: raw.last_insert_rowid(),
                    })
                })
                .await
                .map(ExecuteOutcome::Write),
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("db_path", &self.inner.config.db_path)
            .field("pool", &self.inner.pool.stats())
            .finish()
    }
}
