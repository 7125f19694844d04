//! Request counters backing `/stats` and `/health`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

/// Process-lifetime request statistics. Shared via `Arc` and injected into
/// the detection service.
#[derive(Debug)]
pub struct ServiceStats {
    total_requests: AtomicU64,
    start: Instant,
    started_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    /// Seconds since the service started.
    pub elapsed_time: f64,
    pub requests_per_minute: f64,
    pub uptime: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub timestamp: String,
    pub requests_processed: u64,
}

impl ServiceStats {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            start: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// Count one request and return its 1-based sequence number.
    pub fn record_request(&self) -> u64 {
        self.total_requests.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Wall-clock startup time.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.snapshot_at(self.start.elapsed())
    }

    /// Snapshot as if `elapsed` had passed since startup.
    pub fn snapshot_at(&self, elapsed: Duration) -> StatsSnapshot {
        let total_requests = self.total_requests();
        let elapsed_time = elapsed.as_secs_f64();
        let requests_per_minute = if elapsed_time > 0.0 {
            total_requests as f64 / elapsed_time * 60.0
        } else {
            0.0
        };
        StatsSnapshot {
            total_requests,
            elapsed_time,
            requests_per_minute,
            uptime: elapsed_time,
        }
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: "healthy",
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            requests_processed: self.total_requests(),
        }
    }
}

impl Default for ServiceStats {
    fn default() -> Self {
        Self::new()
    }
}
