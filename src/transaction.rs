use crate::error::DataAccessError;
use crate::pool::PooledConnection;

/// Run a unit of work on one borrowed connection: begin, invoke the caller's
/// statements, commit on `Ok`, roll back on `Err`.
///
/// The rollback trigger is the closure's `Err` variant, not an unwind. The
/// caller may issue any number of dependent statements through the open
/// transaction and inspect intermediate results; they execute in order on the
/// same connection, never interleaved with another caller's statements.
///
/// Outcomes:
/// - closure `Ok`, commit ok → the value, connection pooled again
/// - closure `Err` or commit failure → rollback, `TransactionAborted` wrapping
///   the original cause, connection pooled again
/// - rollback failure → `RollbackFailed`; the connection's state is unknown,
///   so the guard is marked for discard and closed instead of pooled
///
/// The guard's drop runs exactly once on every path, so release-to-pool (or
/// discard) cannot be skipped or doubled.
pub(crate) async fn run_unit_of_work<F, R>(
    conn: &mut PooledConnection,
    work: F,
) -> Result<R, DataAccessError>
where
    F: FnOnce(&mut rusqlite::Transaction<'_>) -> Result<R, DataAccessError> + Send + 'static,
    R: Send + 'static,
{
    let outcome = conn
        .interact(move |raw| {
            let mut tx = raw.transaction().map_err(DataAccessError::Sqlite)?;
            match work(&mut tx) {
                Ok(value) => tx.commit().map(|()| value).map_err(|commit_err| {
                    // rusqlite rolls the transaction back when a failed
                    // commit drops it; the unit of work was not applied.
                    DataAccessError::TransactionAborted {
                        source: Box::new(DataAccessError::Sqlite(commit_err)),
                    }
                }),
                Err(work_err) => match tx.rollback() {
                    Ok(()) => Err(DataAccessError::TransactionAborted {
                        source: Box::new(work_err),
                    }),
                    Err(rollback_err) => Err(DataAccessError::RollbackFailed(format!(
                        "{rollback_err} (while rolling back: {work_err})"
                    ))),
                },
            }
        })
        .await;

    if let Err(DataAccessError::RollbackFailed(_)) = &outcome {
        tracing::warn!(
            connection_id = ?conn.id(),
            "rollback failed; discarding connection instead of pooling it"
        );
        conn.mark_discard();
    }

    outcome
}
