use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use breakwater_data::prelude::*;
use tempfile::tempdir;

fn unique_db_path(prefix: &str) -> std::path::PathBuf {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join(format!("{prefix}.db"));
    std::mem::forget(dir);
    path
}

async fn connect(prefix: &str) -> Result<Database, DataAccessError> {
    let db = Database::connect(DataLayerConfig::new(unique_db_path(prefix))).await?;
    db.execute_batch(
        "CREATE TABLE materials (
             id INTEGER PRIMARY KEY,
             name TEXT NOT NULL UNIQUE,
             quantity INTEGER NOT NULL DEFAULT 0
         );",
    )
    .await?;
    Ok(db)
}

async fn count_materials(db: &Database) -> Result<i64, DataAccessError> {
    let row = db
        .read_one("SELECT COUNT(*) AS cnt FROM materials", &[])
        .await?;
    Ok(row.unwrap().get("cnt").unwrap().as_int().unwrap())
}

fn busy_error() -> DataAccessError {
    DataAccessError::Sqlite(rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error {
            code: rusqlite::ffi::ErrorCode::DatabaseBusy,
            extended_code: 5,
        },
        Some("database is locked".to_string()),
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn committed_work_is_fully_visible() -> Result<(), Box<dyn std::error::Error>> {
    let db = connect("commit").await?;

    let second_id = db
        .transaction(|tx| {
            tx.execute(
                "INSERT INTO materials (name, quantity) VALUES (?1, ?2)",
                rusqlite::params!["rebar", 120],
            )?;
            // Dependent statement: inspect the intermediate state.
            let rebar_id: i64 =
                tx.query_row("SELECT id FROM materials WHERE name = 'rebar'", [], |r| {
                    r.get(0)
                })?;
            tx.execute(
                "INSERT INTO materials (name, quantity) VALUES (?1, ?2)",
                rusqlite::params![format!("rebar-ties-{rebar_id}"), 40],
            )?;
            Ok(tx.last_insert_rowid())
        })
        .await?;

    assert!(second_id > 0);
    assert_eq!(count_materials(&db).await?, 2);
    db.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn aborted_work_leaves_no_trace() -> Result<(), Box<dyn std::error::Error>> {
    let db = connect("abort").await?;

    let err = db
        .transaction(|tx| {
            tx.execute(
                "INSERT INTO materials (name, quantity) VALUES ('caisson', 3)",
                [],
            )?;
            Err::<(), _>(DataAccessError::ExecutionError("caller aborted".into()))
        })
        .await
        .unwrap_err();

    match err {
        DataAccessError::TransactionAborted { source } => {
            assert!(matches!(*source, DataAccessError::ExecutionError(_)));
        }
        other => panic!("expected TransactionAborted, got {other:?}"),
    }
    assert_eq!(count_materials(&db).await?, 0, "insert must not be visible");
    db.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failure_at_any_statement_position_is_all_or_nothing()
-> Result<(), Box<dyn std::error::Error>> {
    let db = connect("positions").await?;
    let baseline = db.health().pool;

    for fail_at in 1..=3u32 {
        let err = db
            .transaction(move |tx| {
                for i in 1..=3u32 {
                    if i == fail_at {
                        return Err(DataAccessError::ExecutionError(format!(
                            "injected at statement {i}"
                        )));
                    }
                    tx.execute(
                        "INSERT INTO materials (name, quantity) VALUES (?1, ?2)",
                        rusqlite::params![format!("batch-{fail_at}-{i}"), i],
                    )?;
                }
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DataAccessError::TransactionAborted { .. }));
        assert_eq!(count_materials(&db).await?, 0, "fail_at={fail_at}");
    }

    // Exactly one release per acquire: the pool is back to its pre-test shape.
    let after = db.health().pool;
    assert_eq!(after.in_use, 0);
    assert_eq!(after.total, baseline.total);
    db.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn constraint_violation_aborts_and_reports_permanent()
-> Result<(), Box<dyn std::error::Error>> {
    let db = connect("constraint").await?;
    db.write(
        "INSERT INTO materials (name, quantity) VALUES ('sheet-pile', 10)",
        &[],
    )
    .await?;

    let err = db
        .transaction(|tx| {
            tx.execute(
                "INSERT INTO materials (name, quantity) VALUES ('sheet-pile', 99)",
                [],
            )?;
            Ok(())
        })
        .await
        .unwrap_err();

    assert!(matches!(err, DataAccessError::TransactionAborted { .. }));
    assert_eq!(err.class(), ErrorClass::Permanent);
    assert_eq!(count_materials(&db).await?, 1);
    db.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transient_failures_inside_a_unit_of_work_are_retried()
-> Result<(), Box<dyn std::error::Error>> {
    let mut config = DataLayerConfig::new(unique_db_path("tx_retry"));
    config.retry = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(5),
    };
    let db = Database::connect(config).await?;
    db.execute_batch("CREATE TABLE materials (id INTEGER PRIMARY KEY, name TEXT NOT NULL);")
        .await?;

    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_in = Arc::clone(&attempts);
    let result = db
        .transaction_with_retry(move |tx| {
            if attempts_in.fetch_add(1, Ordering::SeqCst) < 2 {
                return Err(busy_error());
            }
            tx.execute("INSERT INTO materials (name) VALUES ('armour-stone')", [])?;
            Ok(tx.last_insert_rowid())
        })
        .await?;

    assert!(result > 0);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    let row = db
        .read_one("SELECT COUNT(*) AS cnt FROM materials", &[])
        .await?;
    assert_eq!(row.unwrap().get("cnt").unwrap().as_int(), Some(1));
    db.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn batch_scripts_apply_atomically() -> Result<(), Box<dyn std::error::Error>> {
    let db = connect("batch").await?;

    let err = db
        .execute_batch(
            "INSERT INTO materials (name, quantity) VALUES ('geotextile', 5);
             INSERT INTO no_such_table (id) VALUES (1);",
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DataAccessError::TransactionAborted { .. }));
    assert_eq!(
        count_materials(&db).await?,
        0,
        "partial batch must roll back"
    );
    db.shutdown().await;
    Ok(())
}
