//! Fixed-window admission control, keyed per principal.
//!
//! Each bucket holds `(count, window_start)`. A window is 60 s; on access,
//! an expired or absent bucket resets to `(1, now)` and admits, a bucket
//! under its limit increments and admits, and a bucket at or over its limit
//! rejects. This is an admission filter, not a billing meter: bursty
//! traffic can admit up to ~2x the limit across a window boundary.

use std::time::{Duration, Instant};

use dashmap::DashMap;

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct Bucket {
    count: u32,
    window_start: Instant,
}

/// The class of endpoint a request is being admitted into, used both to
/// pick a default limit and to label rate-limit-violation observability
/// events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    Auth,
    Push,
    Pull,
    Other,
}

impl EndpointClass {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Push => "push",
            Self::Pull => "pull",
            Self::Other => "other",
        }
    }
}

/// Per-tier defaults (requests per 60 s window), overridable via config.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitTiers {
    pub auth: u32,
    pub push: u32,
    pub pull: u32,
    pub other: u32,
}

impl Default for RateLimitTiers {
    fn default() -> Self {
        Self {
            auth: 10,
            push: 60,
            pull: 120,
            other: 300,
        }
    }
}

impl RateLimitTiers {
    #[must_use]
    pub fn limit_for(&self, class: EndpointClass) -> u32 {
        match class {
            EndpointClass::Auth => self.auth,
            EndpointClass::Push => self.push,
            EndpointClass::Pull => self.pull,
            EndpointClass::Other => self.other,
        }
    }
}

/// `ip:<host>` for pre-auth requests.
#[must_use]
pub fn ip_key(ip: &str) -> String {
    format!("ip:{ip}")
}

/// `key:<keyid>:<limit>` for authenticated requests.
#[must_use]
pub fn key_key(key_id: &str, limit: u32) -> String {
    format!("key:{key_id}:{limit}")
}

/// In-memory fixed-window bucket map. Cheap to clone (backed by an `Arc`
/// inside `DashMap`'s sharded storage is not implied — callers should wrap
/// this in an `Arc` themselves and share that).
#[derive(Default)]
pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
}

impl RateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// Admits or rejects one request against `key`'s bucket, given `limit`
    /// requests per 60 s window.
    #[must_use]
    pub fn check(&self, key: &str, limit: u32) -> bool {
        let now = Instant::now();
        let mut entry = self.buckets.entry(key.to_owned()).or_insert(Bucket {
            count: 0,
            window_start: now,
        });
        if now.duration_since(entry.window_start) >= WINDOW {
            entry.count = 1;
            entry.window_start = now;
            return true;
        }
        if entry.count >= limit {
            return false;
        }
        entry.count += 1;
        true
    }

    /// Evicts buckets whose window started more than `max_age` ago. Run
    /// periodically by a background task (every 5 minutes, evicting
    /// anything older than 2 minutes, per the admission policy).
    pub fn evict_older_than(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.window_start) < max_age);
        before - self.buckets.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_limit_then_rejects() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            assert!(limiter.check("k", 5));
        }
        assert!(!limiter.check("k", 5));
    }

    #[test]
    fn distinct_keys_have_independent_buckets() {
        let limiter = RateLimiter::new();
        for _ in 0..3 {
            assert!(limiter.check("a", 3));
        }
        assert!(!limiter.check("a", 3));
        assert!(limiter.check("b", 3));
    }

    #[test]
    fn eviction_removes_only_stale_buckets() {
        let limiter = RateLimiter::new();
        limiter.check("fresh", 10);
        assert_eq!(limiter.evict_older_than(Duration::from_secs(0)), 1);
        assert!(limiter.is_empty());
    }

    #[test]
    fn well_known_key_formats() {
        assert_eq!(ip_key("10.0.0.1"), "ip:10.0.0.1");
        assert_eq!(key_key("abc123", 60), "key:abc123:60");
    }
}
