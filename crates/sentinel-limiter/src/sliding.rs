//! In-memory sliding-window log limiter.
//!
//! Per key, a log of request timestamps inside the current window. Each call
//! prunes entries older than the window, then admits if the log is below the
//! effective burst. A background task sweeps keys whose logs have emptied so
//! the map does not grow with one entry per caller ever seen.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use sentinel_core::RateLimitConfig;

use crate::{LimitDecision, RateLimiter};

type Buckets = Arc<Mutex<HashMap<String, Vec<DateTime<Utc>>>>>;

/// Sliding-window log limiter.
pub struct SlidingWindowLimiter {
    config: RateLimitConfig,
    buckets: Buckets,
    pruner: tokio::sync::Mutex<Option<Pruner>>,
}

struct Pruner {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SlidingWindowLimiter {
    /// Interval at which the background sweep runs.
    pub const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

    /// Create a limiter and start its background sweep. Must run inside a
    /// tokio runtime; call [`close`](Self::close) to stop the sweep.
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_prune_interval(config, Self::PRUNE_INTERVAL)
    }

    /// As [`new`](Self::new) with a custom sweep interval.
    pub fn with_prune_interval(config: RateLimitConfig, interval: Duration) -> Self {
        let buckets: Buckets = Arc::new(Mutex::new(HashMap::new()));
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let window = config.window;
        let sweep_buckets = Arc::clone(&buckets);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let horizon = Utc::now()
                            - chrono::Duration::from_std(window)
                                .unwrap_or_else(|_| chrono::Duration::seconds(60));
                        let mut buckets = sweep_buckets.lock();
                        buckets.retain(|_, log| {
                            log.retain(|t| *t > horizon);
                            !log.is_empty()
                        });
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });
        Self {
            config,
            buckets,
            pruner: tokio::sync::Mutex::new(Some(Pruner { shutdown, task })),
        }
    }

    /// Stop the background sweep and wait for it to finish. Idempotent; the
    /// limiter keeps admitting after close, only the sweep stops.
    pub async fn close(&self) {
        if let Some(pruner) = self.pruner.lock().await.take() {
            let _ = pruner.shutdown.send(true);
            let _ = pruner.task.await;
            debug!("sliding-window limiter pruner stopped");
        }
    }

    /// Number of keys currently tracked, for diagnostics.
    pub fn tracked_keys(&self) -> usize {
        self.buckets.lock().len()
    }

    fn check(&self, key: &str, now: DateTime<Utc>) -> LimitDecision {
        let window = match chrono::Duration::from_std(self.config.window) {
            Ok(window) => window,
            Err(_) => return LimitDecision::allowed(),
        };
        let horizon = now - window;
        let burst = self.config.effective_burst() as usize;

        let mut buckets = self.buckets.lock();
        let log = buckets.entry(key.to_string()).or_default();
        log.retain(|t| *t > horizon);

        if log.len() < burst {
            log.push(now);
            return LimitDecision::allowed();
        }

        // Full window: the caller may retry once the oldest kept entry
        // leaves it.
        let retry_after = log
            .first()
            .map(|oldest| (*oldest + window - now).to_std().unwrap_or(Duration::ZERO))
            .unwrap_or(Duration::ZERO);
        LimitDecision::denied(retry_after)
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowLimiter {
    async fn allow(&self, key: &str, now: DateTime<Utc>) -> LimitDecision {
        self.check(key, now)
    }
}
