//! Approval tickets.
//!
//! An approval is a one-shot ticket that lifts one deny decision for one
//! requester/profile pair. The lifecycle is a strict state machine:
//!
//! ```text
//!             approve
//! pending ─────────────────▶ approved ──consume──▶ consumed
//!    │                          │
//!    │ deny                     │ (expires_at ≤ now)
//!    ▼                          ▼
//!  denied                     expired
//! ```
//!
//! Terminal states are frozen. Every mutation is a version-checked
//! conditional write; two concurrent writers resolve to one winner and one
//! `ConcurrentModification`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use sentinel_core::{ApprovalId, Clock};

/// Approval lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Waiting for an approver.
    Pending,
    /// Approved and not yet used.
    Approved,
    /// Refused by an approver. Terminal.
    Denied,
    /// Timed out before a decision or before use. Terminal.
    Expired,
    /// Used to authorize exactly one request. Terminal.
    Consumed,
}

impl ApprovalStatus {
    /// Whether no further transition is allowed from this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Denied | Self::Expired | Self::Consumed)
    }
}

/// A request for temporary access awaiting (or past) approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Ticket id.
    pub id: ApprovalId,
    /// Sanitized username of the requester.
    pub requester: String,
    /// Sanitized username of whoever decided, once someone has.
    pub approver: Option<String>,
    /// Profile the ticket is scoped to.
    pub profile: String,
    /// Requester's stated justification.
    pub justification: String,
    /// Duration the requester asked for.
    pub requested_duration: Duration,
    /// Current lifecycle state.
    pub status: ApprovalStatus,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Instant after which the ticket is unusable.
    pub expires_at: DateTime<Utc>,
    /// When the ticket was approved, if it was.
    pub approved_at: Option<DateTime<Utc>>,
    /// Approver's comment. Recorded on denials too, and visible to the
    /// requester through `get`/`list_by_user`.
    pub approval_comment: Option<String>,
    /// Monotonic version for conditional writes.
    pub version: u64,
}

impl ApprovalRequest {
    /// Whether the ticket is past its expiry at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Remaining validity at `now`, zero once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    fn transition(&mut self, next: ApprovalStatus) -> Result<(), ApprovalError> {
        let allowed = matches!(
            (self.status, next),
            (ApprovalStatus::Pending, ApprovalStatus::Approved)
                | (ApprovalStatus::Pending, ApprovalStatus::Denied)
                | (ApprovalStatus::Pending, ApprovalStatus::Expired)
                | (ApprovalStatus::Approved, ApprovalStatus::Consumed)
                | (ApprovalStatus::Approved, ApprovalStatus::Expired)
        );
        if !allowed {
            return Err(ApprovalError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.version += 1;
        Ok(())
    }

    /// Approve a pending ticket. Self-approval is forbidden.
    pub fn approve(
        &mut self,
        approver: &str,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), ApprovalError> {
        if approver == self.requester {
            return Err(ApprovalError::SelfApproval);
        }
        if self.is_expired(now) {
            self.transition(ApprovalStatus::Expired)?;
            return Err(ApprovalError::Expired);
        }
        self.transition(ApprovalStatus::Approved)?;
        self.approver = Some(approver.to_string());
        self.approved_at = Some(now);
        self.approval_comment = comment;
        Ok(())
    }

    /// Deny a pending ticket.
    pub fn deny(
        &mut self,
        approver: &str,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), ApprovalError> {
        if self.is_expired(now) {
            self.transition(ApprovalStatus::Expired)?;
            return Err(ApprovalError::Expired);
        }
        self.transition(ApprovalStatus::Denied)?;
        self.approver = Some(approver.to_string());
        self.approval_comment = comment;
        Ok(())
    }

    /// Consume an approved ticket for `user` on `profile`.
    ///
    /// This is the only path that answers "this approval authorizes this
    /// request": status, requester, profile, and expiry all have to line up.
    pub fn consume(
        &mut self,
        user: &str,
        profile: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ApprovalError> {
        if self.status != ApprovalStatus::Approved {
            return Err(ApprovalError::NotConsumable {
                status: self.status,
            });
        }
        if self.requester != user || self.profile != profile {
            return Err(ApprovalError::WrongSubject);
        }
        if self.is_expired(now) {
            self.transition(ApprovalStatus::Expired)?;
            return Err(ApprovalError::Expired);
        }
        self.transition(ApprovalStatus::Consumed)
    }
}

/// Why an approval operation failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApprovalError {
    /// No ticket with that id.
    #[error("approval not found")]
    NotFound,
    /// Another writer committed first; re-read and retry.
    #[error("concurrent modification")]
    ConcurrentModification,
    /// The requested transition is not in the state machine.
    #[error("invalid transition {from:?} -> {to:?}")]
    InvalidTransition {
        /// State the ticket was in.
        from: ApprovalStatus,
        /// State the caller asked for.
        to: ApprovalStatus,
    },
    /// Approver and requester are the same principal.
    #[error("self-approval is forbidden")]
    SelfApproval,
    /// The ticket is past its expiry.
    #[error("approval expired")]
    Expired,
    /// Consume on a ticket that is not in the approved state.
    #[error("approval not consumable from {status:?}")]
    NotConsumable {
        /// The ticket's actual state.
        status: ApprovalStatus,
    },
    /// Consume by a different user or for a different profile.
    #[error("approval does not cover this user/profile")]
    WrongSubject,
    /// Backend failure.
    #[error("approval store backend: {0}")]
    Backend(String),
}

/// Parameters for a new ticket.
#[derive(Debug, Clone)]
pub struct NewApproval {
    /// Sanitized requester username.
    pub requester: String,
    /// Profile the ticket is scoped to.
    pub profile: String,
    /// Stated justification.
    pub justification: String,
    /// Duration the requester asks for.
    pub requested_duration: Duration,
    /// Ticket validity; the store default applies when absent.
    pub ttl: Option<Duration>,
}

/// Durable approval store capability.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    /// Create a pending ticket.
    async fn create(&self, new: NewApproval) -> Result<ApprovalRequest, ApprovalError>;

    /// Fetch a ticket by id.
    async fn get(&self, id: &ApprovalId) -> Result<ApprovalRequest, ApprovalError>;

    /// Tickets requested by `user`, newest first.
    async fn list_by_user(&self, user: &str) -> Result<Vec<ApprovalRequest>, ApprovalError>;

    /// Tickets scoped to `profile`, newest first.
    async fn list_by_profile(&self, profile: &str)
        -> Result<Vec<ApprovalRequest>, ApprovalError>;

    /// Approve a pending ticket.
    async fn approve(
        &self,
        id: &ApprovalId,
        approver: &str,
        comment: Option<String>,
    ) -> Result<ApprovalRequest, ApprovalError>;

    /// Deny a pending ticket.
    async fn deny(
        &self,
        id: &ApprovalId,
        approver: &str,
        comment: Option<String>,
    ) -> Result<ApprovalRequest, ApprovalError>;

    /// Atomically consume an approved ticket for `user` on `profile`.
    /// Succeeds for at most one caller per ticket.
    async fn consume_if_approved(
        &self,
        id: &ApprovalId,
        user: &str,
        profile: &str,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest, ApprovalError>;

    /// Sweep: mark overdue pending/approved tickets expired. Returns how
    /// many changed.
    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<usize, ApprovalError>;
}

/// In-memory approval store.
///
/// Mutations follow the same read–transition–conditional-write shape a
/// remote tabular backend uses, so version conflicts surface here exactly as
/// they would in production.
pub struct MemoryApprovalStore {
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
    records: RwLock<HashMap<ApprovalId, ApprovalRequest>>,
}

impl MemoryApprovalStore {
    /// Default ticket validity: one hour.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

    /// Create an empty store.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            default_ttl: Self::DEFAULT_TTL,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Override the default ticket validity.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    async fn read(&self, id: &ApprovalId) -> Result<ApprovalRequest, ApprovalError> {
        let records = self.records.read().await;
        records.get(id).cloned().ok_or(ApprovalError::NotFound)
    }

    /// Conditional write: commits `updated` only if the stored version still
    /// matches the version `updated` was derived from.
    async fn commit(&self, updated: ApprovalRequest) -> Result<ApprovalRequest, ApprovalError> {
        let mut records = self.records.write().await;
        let stored = records.get(&updated.id).ok_or(ApprovalError::NotFound)?;
        if stored.version + 1 != updated.version {
            return Err(ApprovalError::ConcurrentModification);
        }
        records.insert(updated.id.clone(), updated.clone());
        Ok(updated)
    }
}

#[async_trait]
impl ApprovalStore for MemoryApprovalStore {
    async fn create(&self, new: NewApproval) -> Result<ApprovalRequest, ApprovalError> {
        let now = self.clock.now();
        let ttl = new.ttl.unwrap_or(self.default_ttl);
        let expires_at = now
            + chrono::Duration::from_std(ttl)
                .map_err(|e| ApprovalError::Backend(e.to_string()))?;
        let record = ApprovalRequest {
            id: ApprovalId::generate(now.timestamp_millis().max(0) as u64),
            requester: new.requester,
            approver: None,
            profile: new.profile,
            justification: new.justification,
            requested_duration: new.requested_duration,
            status: ApprovalStatus::Pending,
            created_at: now,
            expires_at,
            approved_at: None,
            approval_comment: None,
            version: 0,
        };
        let mut records = self.records.write().await;
        records.insert(record.id.clone(), record.clone());
        debug!(id = %record.id, requester = %record.requester, "approval created");
        Ok(record)
    }

    async fn get(&self, id: &ApprovalId) -> Result<ApprovalRequest, ApprovalError> {
        self.read(id).await
    }

    async fn list_by_user(&self, user: &str) -> Result<Vec<ApprovalRequest>, ApprovalError> {
        let records = self.records.read().await;
        let mut out: Vec<_> = records
            .values()
            .filter(|r| r.requester == user)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn list_by_profile(
        &self,
        profile: &str,
    ) -> Result<Vec<ApprovalRequest>, ApprovalError> {
        let records = self.records.read().await;
        let mut out: Vec<_> = records
            .values()
            .filter(|r| r.profile == profile)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn approve(
        &self,
        id: &ApprovalId,
        approver: &str,
        comment: Option<String>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let mut record = self.read(id).await?;
        record.approve(approver, comment, self.clock.now())?;
        self.commit(record).await
    }

    async fn deny(
        &self,
        id: &ApprovalId,
        approver: &str,
        comment: Option<String>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let mut record = self.read(id).await?;
        record.deny(approver, comment, self.clock.now())?;
        self.commit(record).await
    }

    async fn consume_if_approved(
        &self,
        id: &ApprovalId,
        user: &str,
        profile: &str,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let mut record = self.read(id).await?;
        record.consume(user, profile, now)?;
        self.commit(record).await
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<usize, ApprovalError> {
        let mut records = self.records.write().await;
        let mut changed = 0;
        for record in records.values_mut() {
            if !record.status.is_terminal() && record.is_expired(now) {
                record.status = ApprovalStatus::Expired;
                record.version += 1;
                changed += 1;
            }
        }
        Ok(changed)
    }
}
