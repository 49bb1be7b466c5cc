//! Per-key token-bucket rate limiter.
//!
//! Each key gets a bucket holding up to `burst` tokens that refills at
//! `requests_per_minute / 60` tokens per second. A call consumes one token or
//! is rejected immediately. Entries idle for longer than the eviction window
//! are removed by [`AdmissionControl::sweep`].
//!
//! `allow` and `sweep` take the same lock, so an entry refreshed by `allow`
//! cannot be removed by a sweep that observed its older timestamp.

use crate::observability::metrics;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Admission limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Refill rate in tokens per minute. Must be greater than zero.
    pub requests_per_minute: u32,
    /// Bucket capacity. Must be greater than zero.
    pub burst: u32,
    /// Entries idle for at least this long are evicted by the sweep.
    pub idle_eviction_window: Duration,
}

#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last: Instant,
}

impl TokenBucket {
    fn full(config: &RateLimitConfig, now: Instant) -> Self {
        let capacity = f64::from(config.burst);
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: f64::from(config.requests_per_minute) / 60.0,
            last: now,
        }
    }

    fn allow(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            self.last = now;
        }
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug)]
struct RateLimiterEntry {
    bucket: TokenBucket,
    last_seen_at: Instant,
}

/// Admission control shared by all calls.
#[derive(Debug)]
pub struct AdmissionControl {
    config: RateLimitConfig,
    entries: Mutex<HashMap<String, RateLimiterEntry>>,
}

impl AdmissionControl {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Consume one token for `key`. Never blocks.
    ///
    /// Unseen keys start with a full bucket.
    pub fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| RateLimiterEntry {
                bucket: TokenBucket::full(&self.config, now),
                last_seen_at: now,
            });
        entry.last_seen_at = now;
        let allowed = entry.bucket.allow(now);
        drop(entries);

        if allowed {
            metrics::record_admission_decision("allowed");
        } else {
            tracing::debug!(target: "chat.admission", "Rate limit exceeded");
            metrics::record_admission_decision("rejected");
        }
        allowed
    }

    /// Remove every entry idle for at least the eviction window.
    ///
    /// Returns the number of entries removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let window = self.config.idle_eviction_window;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        let before = entries.len();
        entries.retain(|_, entry| now.saturating_duration_since(entry.last_seen_at) < window);
        let removed = before - entries.len();
        let remaining = entries.len();
        drop(entries);

        metrics::set_admission_tracked_keys(remaining);
        removed
    }

    /// Number of keys currently tracked.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
