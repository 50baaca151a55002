//! Monotonic counters exposed on the admin server-overview endpoint, plus an
//! uptime clock anchored at process start.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub struct Metrics {
    started_at: Instant,
    total_requests: AtomicU64,
    responses_5xx: AtomicU64,
    responses_4xx: AtomicU64,
    push_events_accepted: AtomicU64,
    pull_requests: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            started_at: Instant::now(),
            total_requests: AtomicU64::new(0),
            responses_5xx: AtomicU64::new(0),
            responses_4xx: AtomicU64::new(0),
            push_events_accepted: AtomicU64::new(0),
            pull_requests: AtomicU64::new(0),
        }
    }
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, status: axum::http::StatusCode) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if status.is_server_error() {
            self.responses_5xx.fetch_add(1, Ordering::Relaxed);
        } else if status.is_client_error() {
            self.responses_4xx.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_push_accepted(&self, count: u64) {
        self.push_events_accepted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_pull(&self) {
        self.pull_requests.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        u64::try_from(self.started_at.elapsed().as_secs()).unwrap_or(u64::MAX)
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            responses_5xx: self.responses_5xx.load(Ordering::Relaxed),
            responses_4xx: self.responses_4xx.load(Ordering::Relaxed),
            push_events_accepted: self.push_events_accepted.load(Ordering::Relaxed),
            pull_requests: self.pull_requests.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub total_requests: u64,
    pub responses_5xx: u64,
    pub responses_4xx: u64,
    pub push_events_accepted: u64,
    pub pull_requests: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn counts_requests_by_status_class() {
        let metrics = Metrics::new();
        metrics.record_request(StatusCode::OK);
        metrics.record_request(StatusCode::NOT_FOUND);
        metrics.record_request(StatusCode::INTERNAL_SERVER_ERROR);
        let snap = metrics.snapshot();
        assert_eq!(snap.total_requests, 3);
        assert_eq!(snap.responses_4xx, 1);
        assert_eq!(snap.responses_5xx, 1);
    }
}
