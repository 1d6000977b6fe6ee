//! # Sentinel Limiter
//!
//! Admission rate limiting for the broker endpoint. Two implementations of
//! one contract: an in-memory sliding-window log for single-process
//! deployments, and a bucketed atomic-counter limiter over a swappable
//! backend for fleets.
//!
//! The rate limit is not the primary access control; the windowed limiter
//! fails open on backend errors because availability beats strict limits
//! for this threat model. Policy, which is the primary control, never
//! fails open.

pub mod sliding;
pub mod windowed;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use sliding::SlidingWindowLimiter;
pub use windowed::{CounterBackend, CounterError, MemoryCounterBackend, WindowedCounterLimiter};

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// When a denied caller may retry. Zero when allowed.
    pub retry_after: Duration,
}

impl LimitDecision {
    /// An allowing decision.
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            retry_after: Duration::ZERO,
        }
    }

    /// A denying decision with a retry hint.
    pub fn denied(retry_after: Duration) -> Self {
        Self {
            allowed: false,
            retry_after,
        }
    }
}

/// Admission limiter contract shared by both implementations.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Whether `key` may make a request at `now`.
    async fn allow(&self, key: &str, now: DateTime<Utc>) -> LimitDecision;
}
