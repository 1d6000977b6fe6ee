//! Break-glass events.
//!
//! Break-glass is the policy-blessed emergency channel: it overrides a deny
//! decision, under stricter controls. Invocation enforces, atomically: one
//! active event per (invoker, profile), a cooldown between consecutive
//! events, an hourly quota per invoker, a policy-capped duration (hard
//! ceiling four hours), and MFA when required. Expiry is lazy on read, and
//! mutations refuse expired events.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use sentinel_core::{BreakGlassConfig, BreakGlassId, Clock, MfaEvidence};

/// Break-glass lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakGlassStatus {
    /// Open; overrides matching denies.
    Active,
    /// Closed by an operator before expiry. Terminal.
    Closed,
    /// Ran out its duration. Terminal.
    Expired,
}

/// An emergency-access event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakGlassEvent {
    /// Event id.
    pub id: BreakGlassId,
    /// Sanitized username that invoked the event.
    pub invoker: String,
    /// Profile the event covers.
    pub profile: String,
    /// Short operator-facing category, e.g. `incident`.
    pub reason: String,
    /// Free-form justification for the audit trail.
    pub justification: String,
    /// Current lifecycle state.
    pub status: BreakGlassStatus,
    /// Invocation instant.
    pub invoked_at: DateTime<Utc>,
    /// Hard end of the event's validity.
    pub expires_at: DateTime<Utc>,
    /// When the event was closed, if it was.
    pub closed_at: Option<DateTime<Utc>>,
    /// Who closed the event, if anyone.
    pub closed_by: Option<String>,
    /// MFA method used at invocation, when MFA was presented.
    pub mfa_method: Option<String>,
    /// Authenticator challenge id, for correlation.
    pub mfa_challenge_id: Option<String>,
    /// Whether MFA was verified at invocation.
    pub mfa_verified: bool,
    /// Monotonic version for conditional writes.
    pub version: u64,
}

impl BreakGlassEvent {
    /// Whether the event is past its expiry at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether the event currently overrides denies.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == BreakGlassStatus::Active && !self.is_expired(now)
    }

    /// Time the event has left at `now`, zero once expired.
    pub fn remaining_duration(&self, now: DateTime<Utc>) -> Duration {
        if self.status != BreakGlassStatus::Active {
            return Duration::ZERO;
        }
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Why a break-glass operation failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BreakGlassError {
    /// No event with that id.
    #[error("break-glass event not found")]
    NotFound,
    /// Another writer committed first.
    #[error("concurrent modification")]
    ConcurrentModification,
    /// An active event already covers this (invoker, profile).
    #[error("an active event already exists for this invoker and profile")]
    AlreadyActive,
    /// The invoker's cooldown has not elapsed.
    #[error("cooldown active for another {remaining:?}")]
    CooldownActive {
        /// Time until the next invocation is allowed.
        remaining: Duration,
    },
    /// The invoker is at the hourly quota.
    #[error("hourly break-glass quota ({quota}) reached")]
    QuotaExceeded {
        /// The configured quota.
        quota: u32,
    },
    /// Requested duration exceeds the configured (or hard) ceiling.
    #[error("requested duration exceeds the {max:?} ceiling")]
    DurationTooLong {
        /// The enforced ceiling.
        max: Duration,
    },
    /// Policy requires MFA and the evidence is missing or unverified.
    #[error("verified MFA is required for break-glass")]
    MfaRequired,
    /// The presented MFA method is not allow-listed.
    #[error("MFA method {method:?} is not allowed")]
    MfaMethodNotAllowed {
        /// The rejected method.
        method: String,
    },
    /// Mutation on an event that already expired.
    #[error("break-glass event expired")]
    Expired,
    /// Mutation on an event in a terminal state.
    #[error("break-glass event is {status:?}")]
    NotActive {
        /// The event's actual state.
        status: BreakGlassStatus,
    },
    /// Backend failure.
    #[error("break-glass store backend: {0}")]
    Backend(String),
}

/// Parameters for an invocation.
#[derive(Debug, Clone)]
pub struct BreakGlassInvocation {
    /// Sanitized invoker username.
    pub invoker: String,
    /// Profile to cover.
    pub profile: String,
    /// Short reason category.
    pub reason: String,
    /// Free-form justification.
    pub justification: String,
    /// Requested event duration.
    pub duration: Duration,
    /// MFA evidence, when presented.
    pub mfa: Option<MfaEvidence>,
}

/// Durable break-glass store capability.
#[async_trait]
pub trait BreakGlassStore: Send + Sync {
    /// Open a new event, enforcing all invocation invariants atomically.
    async fn invoke(
        &self,
        invocation: BreakGlassInvocation,
    ) -> Result<BreakGlassEvent, BreakGlassError>;

    /// Close an active event before its expiry.
    async fn close(
        &self,
        id: &BreakGlassId,
        closer: &str,
    ) -> Result<BreakGlassEvent, BreakGlassError>;

    /// The active event covering (invoker, profile) at `now`, if any.
    async fn find_active(
        &self,
        invoker: &str,
        profile: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<BreakGlassEvent>, BreakGlassError>;

    /// Events invoked by `invoker`, newest first.
    async fn list_by_invoker(
        &self,
        invoker: &str,
    ) -> Result<Vec<BreakGlassEvent>, BreakGlassError>;
}

/// In-memory break-glass store.
pub struct MemoryBreakGlassStore {
    clock: Arc<dyn Clock>,
    config: BreakGlassConfig,
    records: RwLock<HashMap<BreakGlassId, BreakGlassEvent>>,
}

impl MemoryBreakGlassStore {
    /// Create an empty store enforcing `config`.
    pub fn new(clock: Arc<dyn Clock>, config: BreakGlassConfig) -> Self {
        Self {
            clock,
            config,
            records: RwLock::new(HashMap::new()),
        }
    }

    fn check_mfa(&self, mfa: Option<&MfaEvidence>) -> Result<(), BreakGlassError> {
        if !self.config.require_mfa {
            return Ok(());
        }
        let evidence = mfa.ok_or(BreakGlassError::MfaRequired)?;
        if !evidence.verified {
            return Err(BreakGlassError::MfaRequired);
        }
        if !self
            .config
            .allowed_mfa_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(&evidence.method))
        {
            return Err(BreakGlassError::MfaMethodNotAllowed {
                method: evidence.method.clone(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BreakGlassStore for MemoryBreakGlassStore {
    async fn invoke(
        &self,
        invocation: BreakGlassInvocation,
    ) -> Result<BreakGlassEvent, BreakGlassError> {
        let now = self.clock.now();
        let max = self.config.effective_max_duration();
        if invocation.duration > max {
            return Err(BreakGlassError::DurationTooLong { max });
        }
        if invocation.duration.is_zero() {
            return Err(BreakGlassError::DurationTooLong { max });
        }
        self.check_mfa(invocation.mfa.as_ref())?;

        // All remaining invariants read and write the event table, so the
        // whole check-and-insert runs under one write guard.
        let mut records = self.records.write().await;

        if records.values().any(|e| {
            e.invoker == invocation.invoker
                && e.profile == invocation.profile
                && e.is_active(now)
        }) {
            return Err(BreakGlassError::AlreadyActive);
        }

        if let Some(latest) = records
            .values()
            .filter(|e| e.invoker == invocation.invoker)
            .map(|e| e.invoked_at)
            .max()
        {
            let since = now - latest;
            let cooldown = chrono::Duration::from_std(self.config.cooldown)
                .map_err(|e| BreakGlassError::Backend(e.to_string()))?;
            if since < cooldown {
                let remaining = (cooldown - since).to_std().unwrap_or(Duration::ZERO);
                return Err(BreakGlassError::CooldownActive { remaining });
            }
        }

        let hour_ago = now - chrono::Duration::hours(1);
        let recent = records
            .values()
            .filter(|e| e.invoker == invocation.invoker && e.invoked_at > hour_ago)
            .count();
        if recent as u32 >= self.config.hourly_quota {
            return Err(BreakGlassError::QuotaExceeded {
                quota: self.config.hourly_quota,
            });
        }

        let expires_at = now
            + chrono::Duration::from_std(invocation.duration)
                .map_err(|e| BreakGlassError::Backend(e.to_string()))?;
        let (mfa_method, mfa_challenge_id, mfa_verified) = match invocation.mfa {
            Some(evidence) => (
                Some(evidence.method),
                evidence.challenge_id,
                evidence.verified,
            ),
            None => (None, None, false),
        };
        let event = BreakGlassEvent {
            id: BreakGlassId::generate(now.timestamp_millis().max(0) as u64),
            invoker: invocation.invoker,
            profile: invocation.profile,
            reason: invocation.reason,
            justification: invocation.justification,
            status: BreakGlassStatus::Active,
            invoked_at: now,
            expires_at,
            closed_at: None,
            closed_by: None,
            mfa_method,
            mfa_challenge_id,
            mfa_verified,
            version: 0,
        };
        records.insert(event.id.clone(), event.clone());
        warn!(
            id = %event.id,
            invoker = %event.invoker,
            profile = %event.profile,
            "break-glass invoked"
        );
        Ok(event)
    }

    async fn close(
        &self,
        id: &BreakGlassId,
        closer: &str,
    ) -> Result<BreakGlassEvent, BreakGlassError> {
        let now = self.clock.now();
        let mut records = self.records.write().await;
        let event = records.get_mut(id).ok_or(BreakGlassError::NotFound)?;
        match event.status {
            BreakGlassStatus::Active if event.is_expired(now) => {
                // Lazy expiry: the mutation still refuses.
                event.status = BreakGlassStatus::Expired;
                event.version += 1;
                Err(BreakGlassError::Expired)
            }
            BreakGlassStatus::Active => {
                event.status = BreakGlassStatus::Closed;
                event.closed_at = Some(now);
                event.closed_by = Some(closer.to_string());
                event.version += 1;
                debug!(id = %event.id, closer, "break-glass closed");
                Ok(event.clone())
            }
            status => Err(BreakGlassError::NotActive { status }),
        }
    }

    async fn find_active(
        &self,
        invoker: &str,
        profile: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<BreakGlassEvent>, BreakGlassError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .find(|e| e.invoker == invoker && e.profile == profile && e.is_active(now))
            .cloned())
    }

    async fn list_by_invoker(
        &self,
        invoker: &str,
    ) -> Result<Vec<BreakGlassEvent>, BreakGlassError> {
        let records = self.records.read().await;
        let mut out: Vec<_> = records
            .values()
            .filter(|e| e.invoker == invoker)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.invoked_at.cmp(&a.invoked_at));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sentinel_core::FixedClock;

    fn clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::at(
            Utc.with_ymd_and_hms(2026, 1, 27, 12, 0, 0).unwrap(),
        ))
    }

    fn config() -> BreakGlassConfig {
        BreakGlassConfig {
            cooldown: Duration::from_secs(600),
            hourly_quota: 2,
            max_duration: Duration::from_secs(3600),
            require_mfa: false,
            allowed_mfa_methods: Vec::new(),
        }
    }

    fn invocation(invoker: &str, profile: &str) -> BreakGlassInvocation {
        BreakGlassInvocation {
            invoker: invoker.into(),
            profile: profile.into(),
            reason: "incident".into(),
            justification: "prod database is down".into(),
            duration: Duration::from_secs(1200),
            mfa: None,
        }
    }

    #[tokio::test]
    async fn invoke_and_find_active() {
        let clock = clock();
        let store = MemoryBreakGlassStore::new(clock.clone(), config());
        let event = store.invoke(invocation("dave", "prod")).await.unwrap();
        assert_eq!(event.status, BreakGlassStatus::Active);

        let found = store
            .find_active("dave", "prod", clock.now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, event.id);
        assert_eq!(
            found.remaining_duration(clock.now()),
            Duration::from_secs(1200)
        );

        assert!(store
            .find_active("dave", "staging", clock.now())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn second_active_event_is_refused() {
        let clock = clock();
        let store = MemoryBreakGlassStore::new(clock.clone(), config());
        store.invoke(invocation("dave", "prod")).await.unwrap();
        assert_eq!(
            store.invoke(invocation("dave", "prod")).await.unwrap_err(),
            BreakGlassError::AlreadyActive
        );
    }

    #[tokio::test]
    async fn cooldown_applies_across_profiles() {
        let clock = clock();
        let store = MemoryBreakGlassStore::new(clock.clone(), config());
        store.invoke(invocation("dave", "prod")).await.unwrap();
        // Different profile, same invoker, inside the cooldown.
        assert!(matches!(
            store.invoke(invocation("dave", "staging")).await.unwrap_err(),
            BreakGlassError::CooldownActive { .. }
        ));
        clock.advance_secs(601);
        assert!(store.invoke(invocation("dave", "staging")).await.is_ok());
    }

    #[tokio::test]
    async fn hourly_quota_is_enforced() {
        let clock = clock();
        let store = MemoryBreakGlassStore::new(clock.clone(), config());
        let first = store.invoke(invocation("dave", "a")).await.unwrap();
        store.close(&first.id, "dave").await.unwrap();
        clock.advance_secs(700);
        let second = store.invoke(invocation("dave", "b")).await.unwrap();
        store.close(&second.id, "dave").await.unwrap();
        clock.advance_secs(700);
        assert!(matches!(
            store.invoke(invocation("dave", "c")).await.unwrap_err(),
            BreakGlassError::QuotaExceeded { quota: 2 }
        ));
        // Other invokers are unaffected.
        assert!(store.invoke(invocation("erin", "c")).await.is_ok());
    }

    #[tokio::test]
    async fn duration_ceiling_and_zero_are_refused() {
        let store = MemoryBreakGlassStore::new(clock(), config());
        let mut long = invocation("dave", "prod");
        long.duration = Duration::from_secs(2 * 3600);
        assert!(matches!(
            store.invoke(long).await.unwrap_err(),
            BreakGlassError::DurationTooLong { .. }
        ));
        let mut zero = invocation("dave", "prod");
        zero.duration = Duration::ZERO;
        assert!(store.invoke(zero).await.is_err());
    }

    #[tokio::test]
    async fn mfa_requirements_are_enforced() {
        let mut cfg = config();
        cfg.require_mfa = true;
        cfg.allowed_mfa_methods = vec!["webauthn".into()];
        let store = MemoryBreakGlassStore::new(clock(), cfg);

        assert_eq!(
            store.invoke(invocation("dave", "prod")).await.unwrap_err(),
            BreakGlassError::MfaRequired
        );

        let mut with_totp = invocation("dave", "prod");
        with_totp.mfa = Some(MfaEvidence::verified("totp", None));
        assert!(matches!(
            store.invoke(with_totp).await.unwrap_err(),
            BreakGlassError::MfaMethodNotAllowed { .. }
        ));

        let mut with_webauthn = invocation("dave", "prod");
        with_webauthn.mfa = Some(MfaEvidence::verified("webauthn", Some("ch-1".into())));
        let event = store.invoke(with_webauthn).await.unwrap();
        assert!(event.mfa_verified);
        assert_eq!(event.mfa_method.as_deref(), Some("webauthn"));
    }

    #[tokio::test]
    async fn expired_event_is_not_active_and_refuses_close() {
        let clock = clock();
        let store = MemoryBreakGlassStore::new(clock.clone(), config());
        let event = store.invoke(invocation("dave", "prod")).await.unwrap();

        clock.advance_secs(1300);
        assert!(store
            .find_active("dave", "prod", clock.now())
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            store.close(&event.id, "dave").await.unwrap_err(),
            BreakGlassError::Expired
        );
        assert_eq!(event.remaining_duration(clock.now()), Duration::ZERO);
    }

    #[tokio::test]
    async fn close_is_single_shot() {
        let clock = clock();
        let store = MemoryBreakGlassStore::new(clock.clone(), config());
        let event = store.invoke(invocation("dave", "prod")).await.unwrap();
        let closed = store.close(&event.id, "oncall").await.unwrap();
        assert_eq!(closed.status, BreakGlassStatus::Closed);
        assert_eq!(closed.closed_by.as_deref(), Some("oncall"));
        assert!(matches!(
            store.close(&event.id, "oncall").await.unwrap_err(),
            BreakGlassError::NotActive { .. }
        ));
    }
}
