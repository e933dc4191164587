use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::MonitorConfig;

struct Sample {
    duration: Duration,
    success: bool,
    at: Instant,
}

#[derive(Default)]
struct Series {
    samples: VecDeque<Sample>,
}

impl Series {
    fn record(&mut self, sample: Sample, retention: Duration, now: Instant) {
        self.samples.push_back(sample);
        while let Some(oldest) = self.samples.front() {
            if now.duration_since(oldest.at) > retention {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn aggregate(&self) -> SeriesStats {
        let count = self.samples.len() as u64;
        if count == 0 {
            return SeriesStats::default();
        }
        let total: Duration = self.samples.iter().map(|s| s.duration).sum();
        let failures = self.samples.iter().filter(|s| !s.success).count() as u64;
        SeriesStats {
            count,
            mean_duration_ms: total.as_secs_f64() * 1000.0 / count as f64,
            error_rate: failures as f64 / count as f64,
        }
    }
}

struct MonitorInner {
    operations: HashMap<String, Series>,
    endpoints: HashMap<String, Series>,
}

/// Rolling latency/outcome statistics for pool operations and externally
/// observable endpoints.
///
/// Recording never fails and never panics: observability must not affect the
/// data path, so internal problems are swallowed and logged.
pub struct PerformanceMonitor {
    inner: Mutex<MonitorInner>,
    retention: Duration,
}

impl PerformanceMonitor {
    #[must_use]
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            inner: Mutex::new(MonitorInner {
                operations: HashMap::new(),
                endpoints: HashMap::new(),
            }),
            retention: config.retention,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MonitorInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one data-layer operation (acquire, execute, transaction, ...).
    pub fn record_operation(&self, name: &str, duration: Duration, success: bool) {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.operations.entry(name.to_string()).or_default().record(
            Sample {
                duration,
                success,
                at: now,
            },
            self.retention,
            now,
        );
    }

    /// Record one externally observable request; status >= 500 counts as an
    /// error.
    pub fn record_endpoint(&self, path: &str, duration: Duration, status: u16) {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.endpoints.entry(path.to_string()).or_default().record(
            Sample {
                duration,
                success: status < 500,
                at: now,
            },
            self.retention,
            now,
        );
    }

    /// Current aggregates for every operation and endpoint.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.lock();
        MetricsSnapshot {
            operations: inner
                .operations
                .iter()
                .map(|(name, series)| (name.clone(), series.aggregate()))
                .collect(),
            endpoints: inner
                .endpoints
                .iter()
                .map(|(path, series)| (path.clone(), series.aggregate()))
                .collect(),
        }
    }
}

impl std::fmt::Debug for PerformanceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("PerformanceMonitor")
            .field("operations", &inner.operations.len())
            .field("endpoints", &inner.endpoints.len())
            .finish()
    }
}

/// Rolling aggregates for one operation or endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SeriesStats {
    pub count: u64,
    pub mean_duration_ms: f64,
    /// Fraction of samples that failed, 0.0..=1.0.
    pub error_rate: f64,
}

/// Point-in-time view of every tracked series.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub operations: HashMap<String, SeriesStats>,
    pub endpoints: HashMap<String, SeriesStats>,
}

impl MetricsSnapshot {
    /// Aggregates for one operation name, if it has been recorded.
    #[must_use]
    pub fn operation(&self, name: &str) -> Option<&SeriesStats> {
        self.operations.get(name)
    }

    /// Aggregates for one endpoint path, if it has been recorded.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> Option<&SeriesStats> {
        self.endpoints.get(path)
    }
}
