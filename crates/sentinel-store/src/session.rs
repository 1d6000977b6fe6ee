//! Server-mode sessions.
//!
//! In server mode every issuance opens (or refreshes) a tracked session whose
//! source identity is stamped onto the credentials. Revocation is the one
//! real-time control the broker has between credential refreshes, so
//! `check_revocation` is fail-closed on a revoked record; store availability
//! problems are the broker's call (it fails open there, documented in the
//! pipeline).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use sentinel_core::{Clock, ServerSessionId};

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Live; refreshes are allowed.
    Active,
    /// Killed by an operator. Terminal and sticky: a revoked session never
    /// leaves this state.
    Revoked,
    /// Ran past its expiry. Terminal.
    Expired,
}

/// A tracked server-mode session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSession {
    /// Session id (16 hex chars).
    pub id: ServerSessionId,
    /// Identity string stamped onto credentials issued under this session.
    pub source_identity: String,
    /// Sanitized username.
    pub user: String,
    /// Profile the session is for.
    pub profile: String,
    /// Device the session was opened from, when posture was presented.
    pub device_id: Option<String>,
    /// Creation instant.
    pub started_at: DateTime<Utc>,
    /// Last credential refresh under this session.
    pub last_access_at: DateTime<Utc>,
    /// Hard end of the session.
    pub expires_at: DateTime<Utc>,
    /// Current lifecycle state.
    pub status: SessionStatus,
    /// Operator-supplied reason, set on revocation.
    pub revocation_reason: Option<String>,
    /// Monotonic version for conditional writes.
    pub version: u64,
}

impl ServerSession {
    /// Whether the session is past its expiry at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Why a session operation failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No session with that id.
    #[error("session not found")]
    NotFound,
    /// Another writer committed first.
    #[error("concurrent modification")]
    ConcurrentModification,
    /// Mutation on a revoked session.
    #[error("session revoked")]
    Revoked,
    /// Backend failure.
    #[error("session store backend: {0}")]
    Backend(String),
}

/// Parameters for a new session.
#[derive(Debug, Clone)]
pub struct NewSession {
    /// Sanitized username.
    pub user: String,
    /// Profile the session is for.
    pub profile: String,
    /// Identity string to stamp on credentials.
    pub source_identity: String,
    /// Originating device, when known.
    pub device_id: Option<String>,
    /// Session lifetime.
    pub duration: Duration,
}

/// Durable session store capability.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Open a session.
    async fn create(&self, new: NewSession) -> Result<ServerSession, SessionError>;

    /// Fetch a session by id.
    async fn get(&self, id: &ServerSessionId) -> Result<ServerSession, SessionError>;

    /// Record a credential refresh. Only `last_access_at` changes; calling
    /// this repeatedly is idempotent with respect to status.
    async fn touch(
        &self,
        id: &ServerSessionId,
        now: DateTime<Utc>,
    ) -> Result<ServerSession, SessionError>;

    /// Whether the session has been revoked. `true` must be sticky: once a
    /// caller observes it, every later call observes it too.
    async fn check_revocation(&self, id: &ServerSessionId) -> Result<bool, SessionError>;

    /// Revoke a session. Idempotent; the first reason wins.
    async fn revoke(
        &self,
        id: &ServerSessionId,
        reason: &str,
    ) -> Result<ServerSession, SessionError>;

    /// Mark a session expired. Idempotent; never demotes a revoked session.
    async fn expire(&self, id: &ServerSessionId) -> Result<ServerSession, SessionError>;

    /// Look a session up by its stamped source identity.
    async fn get_by_source_identity(
        &self,
        source_identity: &str,
    ) -> Result<Option<ServerSession>, SessionError>;

    /// Sessions currently active at `now`.
    async fn list_active(&self, now: DateTime<Utc>) -> Result<Vec<ServerSession>, SessionError>;

    /// Sessions opened from `device_id`, newest first.
    async fn list_by_device(&self, device_id: &str)
        -> Result<Vec<ServerSession>, SessionError>;

    /// Sweep: mark overdue active sessions expired. Returns how many
    /// changed. Never touches revoked sessions.
    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<usize, SessionError>;
}

/// In-memory session store.
pub struct MemorySessionStore {
    clock: Arc<dyn Clock>,
    records: RwLock<HashMap<ServerSessionId, ServerSession>>,
}

impl MemorySessionStore {
    /// Create an empty store.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            records: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, new: NewSession) -> Result<ServerSession, SessionError> {
        let now = self.clock.now();
        let expires_at = now
            + chrono::Duration::from_std(new.duration)
                .map_err(|e| SessionError::Backend(e.to_string()))?;
        let session = ServerSession {
            id: ServerSessionId::generate(),
            source_identity: new.source_identity,
            user: new.user,
            profile: new.profile,
            device_id: new.device_id,
            started_at: now,
            last_access_at: now,
            expires_at,
            status: SessionStatus::Active,
            revocation_reason: None,
            version: 0,
        };
        let mut records = self.records.write().await;
        records.insert(session.id.clone(), session.clone());
        debug!(id = %session.id, user = %session.user, "server session created");
        Ok(session)
    }

    async fn get(&self, id: &ServerSessionId) -> Result<ServerSession, SessionError> {
        let records = self.records.read().await;
        records.get(id).cloned().ok_or(SessionError::NotFound)
    }

    async fn touch(
        &self,
        id: &ServerSessionId,
        now: DateTime<Utc>,
    ) -> Result<ServerSession, SessionError> {
        let mut records = self.records.write().await;
        let session = records.get_mut(id).ok_or(SessionError::NotFound)?;
        session.last_access_at = now;
        session.version += 1;
        Ok(session.clone())
    }

    async fn check_revocation(&self, id: &ServerSessionId) -> Result<bool, SessionError> {
        let records = self.records.read().await;
        match records.get(id) {
            Some(session) => Ok(session.status == SessionStatus::Revoked),
            None => Err(SessionError::NotFound),
        }
    }

    async fn revoke(
        &self,
        id: &ServerSessionId,
        reason: &str,
    ) -> Result<ServerSession, SessionError> {
        let mut records = self.records.write().await;
        let session = records.get_mut(id).ok_or(SessionError::NotFound)?;
        if session.status != SessionStatus::Revoked {
            session.status = SessionStatus::Revoked;
            session.revocation_reason = Some(reason.to_string());
            session.version += 1;
            info!(id = %session.id, reason, "server session revoked");
        }
        Ok(session.clone())
    }

    async fn expire(&self, id: &ServerSessionId) -> Result<ServerSession, SessionError> {
        let mut records = self.records.write().await;
        let session = records.get_mut(id).ok_or(SessionError::NotFound)?;
        // Revocation is sticky; expiry never weakens it.
        if session.status == SessionStatus::Active {
            session.status = SessionStatus::Expired;
            session.version += 1;
        }
        Ok(session.clone())
    }

    async fn get_by_source_identity(
        &self,
        source_identity: &str,
    ) -> Result<Option<ServerSession>, SessionError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .find(|s| s.source_identity == source_identity)
            .cloned())
    }

    async fn list_active(&self, now: DateTime<Utc>) -> Result<Vec<ServerSession>, SessionError> {
        let records = self.records.read().await;
        let mut out: Vec<_> = records
            .values()
            .filter(|s| s.status == SessionStatus::Active && !s.is_expired(now))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(out)
    }

    async fn list_by_device(
        &self,
        device_id: &str,
    ) -> Result<Vec<ServerSession>, SessionError> {
        let records = self.records.read().await;
        let mut out: Vec<_> = records
            .values()
            .filter(|s| s.device_id.as_deref() == Some(device_id))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(out)
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<usize, SessionError> {
        let mut records = self.records.write().await;
        let mut changed = 0;
        for session in records.values_mut() {
            if session.status == SessionStatus::Active && session.is_expired(now) {
                session.status = SessionStatus::Expired;
                session.version += 1;
                changed += 1;
            }
        }
        Ok(changed)
    }
}
