use thiserror::Error;

/// Whether a failure is expected to clear on retry.
///
/// Classification is typed, derived from the driver's error codes — never from
/// matching message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Lock contention, busy timeouts, pool waits: retrying may succeed.
    Transient,
    /// Constraint violations, malformed statements, closed pools: retrying
    /// will fail the same way.
    Permanent,
}

#[derive(Debug, Error)]
pub enum DataAccessError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection could not be created: {0}")]
    ConnectionCreateFailed(String),

    #[error("Timed out after {waited_ms}ms waiting for a pooled connection")]
    AcquireTimeout { waited_ms: u64 },

    #[error("Pool is shut down")]
    PoolClosed,

    #[error("Transaction rolled back: {source}")]
    TransactionAborted {
        #[source]
        source: Box<DataAccessError>,
    },

    #[error("Rollback failed, connection discarded: {0}")]
    RollbackFailed(String),

    #[error("Retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<DataAccessError>,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Parameter conversion error: {0}")]
    ParameterError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),
}

impl DataAccessError {
    /// Classify this error for the retry coordinator.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            DataAccessError::Sqlite(err) if is_sqlite_contention(err) => ErrorClass::Transient,
            DataAccessError::AcquireTimeout { .. } => ErrorClass::Transient,
            // A rolled-back unit of work is as retryable as whatever aborted it.
            DataAccessError::TransactionAborted { source } => source.class(),
            _ => ErrorClass::Permanent,
        }
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

/// Check whether a driver error is SQLITE_BUSY or SQLITE_LOCKED.
///
/// SQLITE_BUSY ("database is locked") occurs with file-based databases under
/// write contention; SQLITE_LOCKED with shared-cache databases when another
/// connection holds a table lock.
fn is_sqlite_contention(err: &rusqlite::Error) -> bool {
    use rusqlite::ffi;
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            ffi::Error {
                code: ffi::ErrorCode::DatabaseBusy | ffi::ErrorCode::DatabaseLocked,
                ..
            },
            _,
        )
    )
}
