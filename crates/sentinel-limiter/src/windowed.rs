//! Bucketed atomic-counter limiter for multi-worker deployments.
//!
//! Time is truncated into windows of the configured duration. Per key the
//! backend holds `{window_start, count}` with a TTL past the window end so
//! records self-expire. Admission is one conditional increment; when the
//! stored window has rolled over, a second unconditional reset starts the
//! new window at one.
//!
//! On backend errors this limiter fails open with a warning: the rate limit
//! protects capacity, it is not the access control.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::RwLock;
use tracing::warn;

use sentinel_core::RateLimitConfig;

use crate::{LimitDecision, RateLimiter};

/// Backend failure for counter operations.
#[derive(Debug, Clone, thiserror::Error)]
#[error("counter backend: {0}")]
pub struct CounterError(pub String);

/// Atomic windowed-counter storage capability.
///
/// Both operations must be atomic at the backend: the conditional increment
/// maps onto a conditional-write primitive, the reset onto an unconditional
/// put.
#[async_trait]
pub trait CounterBackend: Send + Sync {
    /// Increment `key`'s counter if its stored window is `window_start`.
    /// Returns the new count, or `None` when the stored window differs
    /// (including when no record exists).
    async fn increment_in_window(
        &self,
        key: &str,
        window_start: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Option<u64>, CounterError>;

    /// Unconditionally reset `key` to `{window_start, count: 1}`.
    async fn reset_window(
        &self,
        key: &str,
        window_start: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<(), CounterError>;
}

/// Windowed-counter limiter over a [`CounterBackend`].
pub struct WindowedCounterLimiter<B> {
    config: RateLimitConfig,
    backend: B,
}

impl<B: CounterBackend> WindowedCounterLimiter<B> {
    /// Records outlive their window by this much before the TTL reaps them.
    const TTL_SLACK: Duration = Duration::from_secs(3600);

    /// Create a limiter over `backend`.
    pub fn new(config: RateLimitConfig, backend: B) -> Self {
        Self { config, backend }
    }

    fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let window_secs = self.config.window.as_secs().max(1) as i64;
        let ts = now.timestamp();
        let truncated = ts - ts.rem_euclid(window_secs);
        Utc.timestamp_opt(truncated, 0)
            .single()
            .unwrap_or(now)
    }

    fn record_ttl(&self) -> Duration {
        self.config.window + Self::TTL_SLACK
    }

    fn window_end(&self, window_start: DateTime<Utc>) -> DateTime<Utc> {
        window_start
            + chrono::Duration::from_std(self.config.window)
                .unwrap_or_else(|_| chrono::Duration::seconds(60))
    }
}

#[async_trait]
impl<B: CounterBackend> RateLimiter for WindowedCounterLimiter<B> {
    async fn allow(&self, key: &str, now: DateTime<Utc>) -> LimitDecision {
        let window_start = self.window_start(now);
        let ttl = self.record_ttl();

        let count = match self
            .backend
            .increment_in_window(key, window_start, ttl)
            .await
        {
            Ok(Some(count)) => count,
            Ok(None) => {
                // Window rolled over (or first sighting): start a new one.
                if let Err(e) = self.backend.reset_window(key, window_start, ttl).await {
                    warn!(error = %e, "counter backend failed on reset; failing open");
                    return LimitDecision::allowed();
                }
                1
            }
            Err(e) => {
                warn!(error = %e, "counter backend failed on increment; failing open");
                return LimitDecision::allowed();
            }
        };

        if count <= u64::from(self.config.effective_burst()) {
            LimitDecision::allowed()
        } else {
            let retry_after = (self.window_end(window_start) - now)
                .to_std()
                .unwrap_or(Duration::ZERO);
            LimitDecision::denied(retry_after)
        }
    }
}

/// In-memory counter backend, also the test double for the distributed one.
#[derive(Default)]
pub struct MemoryCounterBackend {
    records: RwLock<HashMap<String, CounterRecord>>,
    fail_next: RwLock<bool>,
}

struct CounterRecord {
    window_start: DateTime<Utc>,
    count: u64,
    expires_at: DateTime<Utc>,
}

impl MemoryCounterBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next operation fail, to exercise fail-open handling.
    pub async fn fail_next_operation(&self) {
        *self.fail_next.write().await = true;
    }

    async fn take_failure(&self) -> bool {
        let mut flag = self.fail_next.write().await;
        std::mem::take(&mut *flag)
    }
}

#[async_trait]
impl CounterBackend for MemoryCounterBackend {
    async fn increment_in_window(
        &self,
        key: &str,
        window_start: DateTime<Utc>,
        _ttl: Duration,
    ) -> Result<Option<u64>, CounterError> {
        if self.take_failure().await {
            return Err(CounterError("injected failure".into()));
        }
        let mut records = self.records.write().await;
        match records.get_mut(key) {
            Some(record)
                if record.window_start == window_start && record.expires_at > window_start =>
            {
                record.count += 1;
                Ok(Some(record.count))
            }
            _ => Ok(None),
        }
    }

    async fn reset_window(
        &self,
        key: &str,
        window_start: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<(), CounterError> {
        if self.take_failure().await {
            return Err(CounterError("injected failure".into()));
        }
        let expires_at = window_start
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(2));
        let mut records = self.records.write().await;
        records.insert(
            key.to_string(),
            CounterRecord {
                window_start,
                count: 1,
                expires_at,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(per_window: u32, window_secs: u64) -> RateLimitConfig {
        RateLimitConfig {
            requests_per_window: per_window,
            window: Duration::from_secs(window_secs),
            burst_size: None,
        }
    }

    fn t0() -> DateTime<Utc> {
        // On a window boundary for readable arithmetic.
        Utc.timestamp_opt(1_800_000_000, 0).single().unwrap()
    }

    #[tokio::test]
    async fn enforces_burst_within_window() {
        let limiter = WindowedCounterLimiter::new(config(3, 60), MemoryCounterBackend::new());
        let now = t0();
        for i in 0..3 {
            assert!(limiter.allow("k", now + chrono::Duration::seconds(i)).await.allowed);
        }
        let denied = limiter.allow("k", now + chrono::Duration::seconds(10)).await;
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Duration::from_secs(50));
    }

    #[tokio::test]
    async fn rollover_resets_the_count() {
        let limiter = WindowedCounterLimiter::new(config(1, 60), MemoryCounterBackend::new());
        let now = t0();
        assert!(limiter.allow("k", now).await.allowed);
        assert!(!limiter.allow("k", now + chrono::Duration::seconds(30)).await.allowed);
        // Next window.
        assert!(limiter.allow("k", now + chrono::Duration::seconds(60)).await.allowed);
    }

    #[tokio::test]
    async fn backend_failure_fails_open() {
        let backend = MemoryCounterBackend::new();
        backend.fail_next_operation().await;
        let limiter = WindowedCounterLimiter::new(config(1, 60), backend);
        let now = t0();
        // Failure on the increment path: allowed anyway.
        assert!(limiter.allow("k", now).await.allowed);
        // Backend healthy again: normal enforcement resumes.
        assert!(limiter.allow("k", now).await.allowed);
        assert!(!limiter.allow("k", now + chrono::Duration::seconds(1)).await.allowed);
    }

    #[tokio::test]
    async fn keys_do_not_interfere() {
        let limiter = WindowedCounterLimiter::new(config(1, 60), MemoryCounterBackend::new());
        let now = t0();
        assert!(limiter.allow("a", now).await.allowed);
        assert!(limiter.allow("b", now).await.allowed);
        assert!(!limiter.allow("a", now).await.allowed);
    }
}
