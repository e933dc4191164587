//! Pooled, transactional data-access layer over a single SQLite file.
//!
//! One constructed [`Database`] object ties together the subsystems a data
//! layer owes its callers:
//!
//! - a bounded [`ConnectionPool`](pool::ConnectionPool) with a strict-FIFO
//!   wait queue, on-demand growth, idle retirement, and drain-then-close
//!   shutdown;
//! - a transaction coordinator that binds one connection per unit of work and
//!   returns it to the pool exactly once, commit or rollback;
//! - a retry coordinator with typed transient/permanent classification and
//!   exponential back-off;
//! - an in-process [`ResponseCache`](cache::ResponseCache) with per-entry TTL
//!   and prefix invalidation;
//! - a [`PerformanceMonitor`](metrics::PerformanceMonitor) feeding the
//!   operational health surface.
//!
//! ```rust,no_run
//! use breakwater_data::prelude::*;
//!
//! # async fn demo() -> Result<(), DataAccessError> {
//! let db = Database::connect(DataLayerConfig::new("harbor.db")).await?;
//!
//! let inserted = db
//!     .write(
//!         "INSERT INTO projects (name, status) VALUES (?1, ?2)",
//!         &[SqlValue::Text("North Pier".into()), SqlValue::Text("active".into())],
//!     )
//!     .await?;
//!
//! let project = db
//!     .read_one(
//!         "SELECT name FROM projects WHERE id = ?1",
//!         &[SqlValue::Int(inserted.last_insert_id)],
//!     )
//!     .await?;
//! # let _ = project;
//!
//! db.shutdown().await;
//! # Ok(()) }
//! ```

pub mod activity;
pub mod cache;
pub mod config;
mod connection;
pub mod database;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod prelude;
pub mod results;
mod retry;
mod transaction;
pub mod types;

// Re-exported so callers can name `rusqlite::Transaction` in units of work
// without pinning the driver version themselves.
pub use rusqlite;

pub use activity::{ActivityContext, ActivityEvent, ActivityLog};
pub use cache::{CacheStats, ResponseCache};
pub use config::{CacheConfig, DataLayerConfig, MonitorConfig, PoolConfig, RetryPolicy};
pub use database::{Database, DatabaseBuilder, ExecuteOutcome, HealthSnapshot, QueryMode};
pub use error::{DataAccessError, ErrorClass};
pub use metrics::{MetricsSnapshot, PerformanceMonitor, SeriesStats};
pub use pool::{ConnectionPool, PoolStats, PooledConnection};
pub use results::{ResultSet, Row, WriteResult};
pub use retry::with_retry;
pub use types::SqlValue;
