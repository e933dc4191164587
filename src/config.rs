use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::DataAccessError;

/// Configuration for the connection pool.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Connections kept open even when idle.
    pub min_size: usize,
    /// Hard bound on connections, in-use plus idle.
    pub max_size: usize,
    /// How long an `acquire` call may queue before failing.
    pub acquire_timeout: Duration,
    /// Idle connections older than this are retired by the cleanup task.
    pub idle_timeout: Duration,
    /// Fixed interval between idle-cleanup scans.
    pub cleanup_interval: Duration,
    /// How long `shutdown` waits for in-use connections to come back.
    pub shutdown_drain_timeout: Duration,
    /// `PRAGMA busy_timeout`, applied once per connection at creation.
    pub busy_timeout_ms: u32,
    /// `PRAGMA cache_size` in KiB, applied once per connection at creation.
    pub cache_size_kib: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 10,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(60),
            shutdown_drain_timeout: Duration::from_secs(10),
            busy_timeout_ms: 5000,
            cache_size_kib: 8192,
        }
    }
}

impl PoolConfig {
    /// Validate the pool configuration.
    ///
    /// # Errors
    /// Returns `ConfigError` if any bound is zero or inconsistent.
    pub fn validate(&self) -> Result<(), DataAccessError> {
        if self.max_size == 0 {
            return Err(DataAccessError::ConfigError(
                "max_size must be greater than 0".to_string(),
            ));
        }
        if self.min_size > self.max_size {
            return Err(DataAccessError::ConfigError(format!(
                "min_size ({}) must not exceed max_size ({})",
                self.min_size, self.max_size
            )));
        }
        if self.acquire_timeout.is_zero() {
            return Err(DataAccessError::ConfigError(
                "acquire_timeout must be greater than zero".to_string(),
            ));
        }
        if self.cleanup_interval.is_zero() {
            return Err(DataAccessError::ConfigError(
                "cleanup_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the response cache.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries; the oldest-inserted entry is evicted at
    /// capacity.
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), DataAccessError> {
        if self.capacity == 0 {
            return Err(DataAccessError::ConfigError(
                "cache capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Retry budget for transient failures.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each attempt after that.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<(), DataAccessError> {
        if self.max_attempts == 0 {
            return Err(DataAccessError::ConfigError(
                "max_attempts must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the performance monitor.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Samples older than this are pruned on every record.
    pub retention: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(300),
        }
    }
}

/// Top-level configuration for the data layer.
///
/// Constructed by the process entry point and handed to
/// [`Database::connect`](crate::database::Database::connect); there is no
/// module-level state.
#[derive(Debug, Clone, Deserialize)]
pub struct DataLayerConfig {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

impl DataLayerConfig {
    /// Configuration with defaults for everything but the database path.
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            pool: PoolConfig::default(),
            cache: CacheConfig::default(),
            retry: RetryPolicy::default(),
            monitor: MonitorConfig::default(),
        }
    }

    /// Validate every section.
    ///
    /// # Errors
    /// Returns the first `ConfigError` encountered.
    pub fn validate(&self) -> Result<(), DataAccessError> {
        self.pool.validate()?;
        self.cache.validate()?;
        self.retry.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(DataLayerConfig::new("test.db").validate().is_ok());
    }

    #[test]
    fn zero_max_size_is_rejected() {
        let cfg = PoolConfig {
            max_size: 0,
            ..PoolConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn min_above_max_is_rejected() {
        let cfg = PoolConfig {
            min_size: 11,
            max_size: 10,
            ..PoolConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_attempt_retry_is_rejected() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert!(policy.validate().is_err());
    }
}
