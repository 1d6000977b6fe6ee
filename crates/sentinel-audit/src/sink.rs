//! Audit sink capability and the in-memory stream.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::chain::{compute_hmac, ChainError, GENESIS_PREV_HMAC};
use crate::record::{AuditDraft, AuditRecord};

/// Why an append failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuditError {
    /// Chain computation failed.
    #[error(transparent)]
    Chain(#[from] ChainError),
    /// Backend failure.
    #[error("audit sink backend: {0}")]
    Backend(String),
}

/// Append-only audit sink capability.
///
/// Implementations must make the record durable before returning: the broker
/// does not respond to a request until its audit record is down.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append one decision record, assigning its chain position.
    async fn append(&self, draft: AuditDraft) -> Result<AuditRecord, AuditError>;
}

struct StreamState {
    records: Vec<AuditRecord>,
    tail_hmac: String,
}

/// In-memory HMAC-chained audit stream.
///
/// Appends are serialized through one mutex; the `prev_hmac` dependency
/// makes anything else unsound. Key rotation is a new `MemoryAuditLog`,
/// which starts a new stream.
pub struct MemoryAuditLog {
    key: Vec<u8>,
    state: Mutex<StreamState>,
}

impl MemoryAuditLog {
    /// Create an empty stream MACed with `key`.
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            state: Mutex::new(StreamState {
                records: Vec::new(),
                tail_hmac: GENESIS_PREV_HMAC.to_string(),
            }),
        }
    }

    /// Snapshot of the stream so far.
    pub async fn records(&self) -> Vec<AuditRecord> {
        self.state.lock().await.records.clone()
    }

    /// MAC of the last record, for external truncation checks.
    pub async fn tail_hmac(&self) -> String {
        self.state.lock().await.tail_hmac.clone()
    }

    /// Verify the whole stream against this log's key.
    pub async fn verify(&self) -> Result<(), ChainError> {
        let state = self.state.lock().await;
        crate::chain::verify_stream(&self.key, &state.records)
    }
}

#[async_trait]
impl AuditSink for MemoryAuditLog {
    async fn append(&self, draft: AuditDraft) -> Result<AuditRecord, AuditError> {
        let mut state = self.state.lock().await;
        let sequence = state.records.len() as u64 + 1;
        let mut record = AuditRecord {
            sequence,
            prev_hmac: state.tail_hmac.clone(),
            timestamp: draft.timestamp,
            caller: draft.caller,
            profile: draft.profile,
            effect: draft.effect,
            matched_rule: draft.matched_rule,
            approval_id: draft.approval_id,
            breakglass_id: draft.breakglass_id,
            session_id: draft.session_id,
            request_id: draft.request_id,
            reason: draft.reason,
            hmac: String::new(),
        };
        record.hmac = compute_hmac(&self.key, &record)?;
        state.tail_hmac = record.hmac.clone();
        state.records.push(record.clone());
        debug!(
            sequence,
            effect = record.effect.as_str(),
            request_id = %record.request_id,
            "audit record appended"
        );
        Ok(record)
    }
}
