use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::DataAccessError;
use crate::results::ResultSet;
use crate::types::SqlValue;

/// A single live handle to the database file, owned by the pool.
///
/// Configured once at creation; callers borrow it through a
/// [`PooledConnection`](crate::pool::PooledConnection) guard and run
/// statements via [`interact`](Connection::interact), which moves the work to
/// the blocking thread pool. The mutex is uncontended in practice because the
/// pool hands each connection to exactly one borrower at a time.
pub(crate) struct Connection {
    id: u64,
    created_at: Instant,
    last_used: Instant,
    op_count: u64,
    inner: Arc<Mutex<rusqlite::Connection>>,
}

impl Connection {
    /// Open the database file and apply the one-time per-connection pragmas.
    ///
    /// Runs on a blocking thread; a failure here must not change the pool's
    /// size accounting (the caller un-reserves its slot).
    pub(crate) fn open(
        path: &Path,
        id: u64,
        busy_timeout_ms: u32,
        cache_size_kib: u32,
    ) -> Result<Self, DataAccessError> {
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| DataAccessError::ConnectionCreateFailed(e.to_string()))?;

        // WAL lets readers proceed while one writer holds the file;
        // busy_timeout bounds writer-vs-writer stalls before SQLITE_BUSY.
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL; \
             PRAGMA synchronous = NORMAL; \
             PRAGMA busy_timeout = {busy_timeout_ms}; \
             PRAGMA cache_size = -{cache_size_kib}; \
             PRAGMA foreign_keys = ON;"
        ))
        .map_err(|e| DataAccessError::ConnectionCreateFailed(e.to_string()))?;

        let now = Instant::now();
        tracing::debug!(connection_id = id, "opened database connection");
        Ok(Self {
            id,
            created_at: now,
            last_used: now,
            op_count: 0,
            inner: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn op_count(&self) -> u64 {
        self.op_count
    }

    pub(crate) fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub(crate) fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    pub(crate) fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    /// Run a closure against the raw connection on the blocking thread pool.
    pub(crate) async fn interact<F, R>(&mut self, f: F) -> Result<R, DataAccessError>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R, DataAccessError> + Send + 'static,
        R: Send + 'static,
    {
        self.op_count += 1;
        self.last_used = Instant::now();
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut conn = inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            f(&mut conn)
        })
        .await
        .map_err(|e| DataAccessError::ExecutionError(format!("statement task failed: {e}")))?
    }

    /// Close the underlying handle, logging rather than propagating failure —
    /// callers retiring a connection have nowhere to send the error.
    pub(crate) fn close(self) {
        let Connection { id, inner, .. } = self;
        match Arc::try_unwrap(inner) {
            Ok(mutex) => {
                let conn = mutex
                    .into_inner()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                if let Err((_conn, e)) = conn.close() {
                    tracing::debug!(connection_id = id, error = %e, "error closing connection");
                }
            }
            // An interact task is still holding a clone; dropping our Arc is
            // enough, the handle closes when the task finishes.
            Err(_) => tracing::debug!(connection_id = id, "deferred close to in-flight task"),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("op_count", &self.op_count)
            .finish()
    }
}

fn extract_value(row: &rusqlite::Row, idx: usize) -> Result<SqlValue, DataAccessError> {
    match row.get_ref(idx) {
        Err(e) => Err(DataAccessError::Sqlite(e)),
        Ok(rusqlite::types::ValueRef::Null) => Ok(SqlValue::Null),
        Ok(rusqlite::types::ValueRef::Integer(i)) => Ok(SqlValue::Int(i)),
        Ok(rusqlite::types::ValueRef::Real(f)) => Ok(SqlValue::Float(f)),
        Ok(rusqlite::types::ValueRef::Text(bytes)) => {
            Ok(SqlValue::Text(String::from_utf8_lossy(bytes).into_owned()))
        }
        Ok(rusqlite::types::ValueRef::Blob(b)) => Ok(SqlValue::Blob(b.to_vec())),
    }
}

/// Run a prepared SELECT and collect rows into a [`ResultSet`].
///
/// `limit` short-circuits row collection for read-one callers.
pub(crate) fn build_result_set(
    stmt: &mut rusqlite::Statement,
    params: &[rusqlite::types::Value],
    limit: Option<usize>,
) -> Result<ResultSet, DataAccessError> {
    let columns: Vec<String> = stmt.column_names().iter().map(|s| (*s).to_string()).collect();
    let column_count = columns.len();

    let mut result_set = ResultSet::with_capacity(limit.unwrap_or(16));
    result_set.set_columns(std::sync::Arc::new(columns));

    let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(column_count);
        for i in 0..column_count {
            values.push(extract_value(row, i)?);
        }
        result_set.add_values(values);
        if let Some(max) = limit
            && result_set.len() >= max
        {
            break;
        }
    }

    Ok(result_set)
}
