use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::{Notify, oneshot};
use tokio_util::sync::CancellationToken;

use crate::config::PoolConfig;
use crate::connection::Connection;
use crate::error::DataAccessError;

/// Counters for the operational health surface. Cheap to take; one lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Connections that exist, idle plus in-use.
    pub total: usize,
    /// Connections sitting in the idle list.
    pub idle: usize,
    /// Connections currently borrowed by callers.
    pub in_use: usize,
    /// Acquire calls queued for a connection.
    pub waiting: usize,
    /// Configured hard bound.
    pub max_size: usize,
}

impl PoolStats {
    /// Fraction of the configured maximum currently borrowed.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            0.0
        } else {
            self.in_use as f64 / self.max_size as f64
        }
    }
}

/// A queued acquire request. Served strictly in arrival order.
struct Waiter {
    id: u64,
    tx: oneshot::Sender<Connection>,
}

struct PoolState {
    idle: VecDeque<Connection>,
    /// Connections that exist or are reserved for an in-flight create.
    total: usize,
    in_use: usize,
    waiters: VecDeque<Waiter>,
    next_connection_id: u64,
    next_waiter_id: u64,
    shutdown: bool,
}

struct PoolInner {
    db_path: PathBuf,
    config: PoolConfig,
    state: Mutex<PoolState>,
    /// Signalled whenever `in_use` drops to zero; `shutdown` waits on it.
    drained: Notify,
    /// Cancels the background idle-cleanup task.
    cancel: CancellationToken,
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Bounded pool of reusable database connections.
///
/// Hands connections out and takes them back; grows on demand up to
/// `max_size`; queues callers FIFO when exhausted; retires idle connections in
/// the background. Cloning shares the pool.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("stats", &self.stats())
            .finish()
    }
}

impl ConnectionPool {
    /// Open the pool, warm `min_size` connections, and start the idle-cleanup
    /// task.
    ///
    /// # Errors
    /// Returns `ConfigError` for invalid bounds, or `ConnectionCreateFailed`
    /// if a warm-up connection cannot be opened.
    pub async fn open(
        db_path: PathBuf,
        config: PoolConfig,
    ) -> Result<Self, DataAccessError> {
        config.validate()?;

        let pool = Self {
            inner: Arc::new(PoolInner {
                db_path,
                config,
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    total: 0,
                    in_use: 0,
                    waiters: VecDeque::new(),
                    next_connection_id: 0,
                    next_waiter_id: 0,
                    shutdown: false,
                }),
                drained: Notify::new(),
                cancel: CancellationToken::new(),
            }),
        };

        for _ in 0..pool.inner.config.min_size {
            pool.inner.lock().total += 1;
            match pool.create_connection().await {
                Ok(conn) => pool.inner.lock().idle.push_back(conn),
                Err(e) => {
                    pool.inner.lock().total -= 1;
                    return Err(e);
                }
            }
        }

        pool.spawn_idle_cleanup();
        Ok(pool)
    }

    /// Borrow a connection.
    ///
    /// Idle connection → returned immediately. Below `max_size` → a new one is
    /// created. Otherwise the caller queues FIFO and is woken by the next
    /// release, or fails with `AcquireTimeout`.
    ///
    /// # Errors
    /// `PoolClosed` after shutdown, `ConnectionCreateFailed` if growth fails,
    /// `AcquireTimeout` if the queue wait exceeds the configured bound.
    pub async fn acquire(&self) -> Result<PooledConnection, DataAccessError> {
        let waiting = {
            let mut state = self.inner.lock();
            if state.shutdown {
                return Err(DataAccessError::PoolClosed);
            }
            if let Some(mut conn) = state.idle.pop_front() {
                conn.touch();
                state.in_use += 1;
                return Ok(self.guard(conn));
            }
            if state.total < self.inner.config.max_size {
                // Reserve the slot before the async create so concurrent
                // acquires cannot overshoot max_size.
                state.total += 1;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                let id = state.next_waiter_id;
                state.next_waiter_id += 1;
                state.waiters.push_back(Waiter { id, tx });
                Some((id, rx))
            }
        };

        match waiting {
            None => match self.create_connection().await {
                Ok(conn) => {
                    self.inner.lock().in_use += 1;
                    Ok(self.guard(conn))
                }
                Err(e) => {
                    let mut state = self.inner.lock();
                    state.total -= 1;
                    // A waiter queued while we held the reservation would
                    // otherwise wait out its full timeout on freed capacity.
                    self.replace_for_waiters(&mut state);
                    Err(e)
                }
            },
            Some((waiter_id, mut rx)) => {
                let started = Instant::now();
                match tokio::time::timeout(self.inner.config.acquire_timeout, &mut rx).await {
                    Ok(Ok(conn)) => Ok(self.guard(conn)),
                    // Sender dropped without a handoff: shutdown rejected us.
                    Ok(Err(_)) => Err(DataAccessError::PoolClosed),
                    Err(_) => {
                        let mut state = self.inner.lock();
                        let still_queued = state.waiters.iter().any(|w| w.id == waiter_id);
                        state.waiters.retain(|w| w.id != waiter_id);
                        drop(state);
                        if !still_queued {
                            // Handoff raced the timeout; the connection is in
                            // the channel and must go back, not be dropped.
                            if let Ok(conn) = rx.try_recv() {
                                self.release(conn, false);
                            }
                        }
                        Err(DataAccessError::AcquireTimeout {
                            waited_ms: started.elapsed().as_millis() as u64,
                        })
                    }
                }
            }
        }
    }

    /// Current counters for the health surface.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock();
        PoolStats {
            total: state.total,
            idle: state.idle.len(),
            in_use: state.in_use,
            waiting: state.waiters.len(),
            max_size: self.inner.config.max_size,
        }
    }

    /// Stop accepting acquires, fail queued waiters, wait (bounded) for in-use
    /// connections to come back, then close every handle.
    pub async fn shutdown(&self) {
        let (waiters, idle) = {
            let mut state = self.inner.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            let idle: Vec<Connection> = state.idle.drain(..).collect();
            state.total -= idle.len();
            (std::mem::take(&mut state.waiters), idle)
        };

        self.inner.cancel.cancel();
        // Dropping the senders rejects every queued waiter with PoolClosed.
        let rejected = waiters.len();
        drop(waiters);
        if rejected > 0 {
            tracing::warn!(rejected, "pool shutdown rejected queued waiters");
        }
        for conn in idle {
            conn.close();
        }

        let drain = async {
            loop {
                // Register interest before checking, so a release that lands
                // between the check and the await cannot be missed.
                let mut notified = std::pin::pin!(self.inner.drained.notified());
                notified.as_mut().enable();
                if self.inner.lock().in_use == 0 {
                    break;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(self.inner.config.shutdown_drain_timeout, drain)
            .await
            .is_err()
        {
            let in_use = self.inner.lock().in_use;
            tracing::warn!(in_use, "pool shutdown timed out waiting for borrowed connections");
        }
        tracing::debug!("connection pool shut down");
    }

    fn guard(&self, conn: Connection) -> PooledConnection {
        PooledConnection {
            pool: self.clone(),
            conn: Some(conn),
            discard: false,
        }
    }

    async fn create_connection(&self) -> Result<Connection, DataAccessError> {
        let path = self.inner.db_path.clone();
        let busy_timeout_ms = self.inner.config.busy_timeout_ms;
        let cache_size_kib = self.inner.config.cache_size_kib;
        let id = {
            let mut state = self.inner.lock();
            let id = state.next_connection_id;
            state.next_connection_id += 1;
            id
        };
        tokio::task::spawn_blocking(move || {
            Connection::open(&path, id, busy_timeout_ms, cache_size_kib)
        })
        .await
        .map_err(|e| DataAccessError::ConnectionCreateFailed(format!("open task failed: {e}")))?
    }

    /// Return a borrowed connection. Called from the guard's drop.
    ///
    /// The oldest live waiter gets the connection directly instead of it
    /// passing through the idle list — FIFO fairness under sustained load.
    fn release(&self, mut conn: Connection, discard: bool) {
        let mut state = self.inner.lock();

        if discard {
            state.in_use -= 1;
            state.total -= 1;
            self.replace_for_waiters(&mut state);
            let drained = state.shutdown && state.in_use == 0;
            drop(state);
            tracing::debug!(connection_id = conn.id(), "discarding connection");
            conn.close();
            if drained {
                self.inner.drained.notify_waiters();
            }
            return;
        }

        conn.touch();
        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.tx.send(conn) {
                // in_use is unchanged: the borrow moved from one caller to
                // the next without touching the idle list.
                Ok(()) => return,
                // That waiter gave up (timeout or cancellation); try the next.
                Err(returned) => conn = returned,
            }
        }

        state.in_use -= 1;
        if state.shutdown {
            state.total -= 1;
            let drained = state.in_use == 0;
            drop(state);
            conn.close();
            if drained {
                self.inner.drained.notify_waiters();
            }
        } else {
            state.idle.push_back(conn);
        }
    }

    /// A discarded or failed connection freed capacity while callers were
    /// queued; open a replacement off-task and hand it to the oldest waiter.
    fn replace_for_waiters(&self, state: &mut PoolState) {
        if state.shutdown
            || state.waiters.is_empty()
            || state.total >= self.inner.config.max_size
        {
            return;
        }
        state.total += 1;
        let pool = self.clone();
        tokio::spawn(async move {
            match pool.create_connection().await {
                Ok(conn) => {
                    let mut state = pool.inner.lock();
                    let mut conn = conn;
                    while let Some(waiter) = state.waiters.pop_front() {
                        match waiter.tx.send(conn) {
                            Ok(()) => {
                                state.in_use += 1;
                                return;
                            }
                            Err(returned) => conn = returned,
                        }
                    }
                    // Everyone gave up in the meantime; keep the connection.
                    state.idle.push_back(conn);
                }
                Err(e) => {
                    pool.inner.lock().total -= 1;
                    tracing::warn!(error = %e, "replacement connection failed");
                }
            }
        });
    }

    /// Periodically retire connections idle past `idle_timeout`, never
    /// shrinking below `min_size`. Only the idle list is touched; waiters are
    /// served exclusively through the release/create paths, so retirement can
    /// never hand anyone a half-replaced connection.
    fn spawn_idle_cleanup(&self) {
        let pool = self.clone();
        let cancel = self.inner.cancel.clone();
        let mut interval = tokio::time::interval(self.inner.config.cleanup_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::spawn(async move {
            // The first tick fires immediately; skip it.
            interval.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => pool.cleanup_idle(),
                }
            }
        });
    }

    fn cleanup_idle(&self) {
        let expired = {
            let mut state = self.inner.lock();
            let mut expired = Vec::new();
            let mut kept = VecDeque::with_capacity(state.idle.len());
            while let Some(conn) = state.idle.pop_front() {
                if conn.idle_for() > self.inner.config.idle_timeout
                    && state.total > self.inner.config.min_size
                {
                    state.total -= 1;
                    expired.push(conn);
                } else {
                    kept.push_back(conn);
                }
            }
            state.idle = kept;
            expired
        };
        for conn in expired {
            tracing::debug!(
                connection_id = conn.id(),
                ops = conn.op_count(),
                age_s = conn.age().as_secs(),
                "retiring idle connection"
            );
            conn.close();
        }
    }
}

/// An exclusively borrowed connection.
///
/// Dropping the guard returns the connection to the pool exactly once; a
/// guard marked for discard closes it instead (used when a failed rollback
/// leaves the connection in an unknown state).
pub struct PooledConnection {
    pool: ConnectionPool,
    conn: Option<Connection>,
    discard: bool,
}

impl PooledConnection {
    /// Run a closure against the raw connection on the blocking thread pool.
    ///
    /// # Errors
    /// Propagates the closure's error, or `ExecutionError` if the blocking
    /// task itself fails.
    pub async fn interact<F, R>(&mut self, f: F) -> Result<R, DataAccessError>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R, DataAccessError> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| DataAccessError::ExecutionError("connection already released".into()))?;
        conn.interact(f).await
    }

    /// Identifier of the underlying connection.
    #[must_use]
    pub fn id(&self) -> Option<u64> {
        self.conn.as_ref().map(Connection::id)
    }

    /// Close this connection on release instead of pooling it.
    pub(crate) fn mark_discard(&mut self) {
        self.discard = true;
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn, self.discard);
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id())
            .field("discard", &self.discard)
            .finish()
    }
}
