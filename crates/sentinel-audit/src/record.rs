//! Audit record shape and canonical encoding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Effect recorded for a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEffect {
    /// Credentials were issued.
    Allow,
    /// The request was denied.
    Deny,
}

impl AuditEffect {
    /// Wire representation of the effect.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEffect::Allow => "allow",
            AuditEffect::Deny => "deny",
        }
    }
}

/// Decision fields supplied by the broker; the log adds chain position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditDraft {
    /// Decision instant.
    pub timestamp: DateTime<Utc>,
    /// Sanitized caller username.
    pub caller: String,
    /// Requested profile.
    pub profile: String,
    /// Final effect for the request.
    pub effect: AuditEffect,
    /// Rule that decided, when one did.
    pub matched_rule: Option<String>,
    /// Approval ticket consumed for this request, if any.
    pub approval_id: Option<String>,
    /// Break-glass event that lifted the deny, if any.
    pub breakglass_id: Option<String>,
    /// Server session opened or reused, if any.
    pub session_id: Option<String>,
    /// Per-invocation request id.
    pub request_id: String,
    /// Reason string; on denies this is the fixed-vocabulary reason.
    pub reason: String,
}

/// One record in an HMAC-chained audit stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Position in the stream, starting at 1 and strictly increasing.
    pub sequence: u64,
    /// Hex MAC of the previous record; all zeros for the first.
    pub prev_hmac: String,
    /// Decision instant.
    pub timestamp: DateTime<Utc>,
    /// Sanitized caller username.
    pub caller: String,
    /// Requested profile.
    pub profile: String,
    /// Final effect for the request.
    pub effect: AuditEffect,
    /// Rule that decided, when one did.
    pub matched_rule: Option<String>,
    /// Approval ticket consumed for this request, if any.
    pub approval_id: Option<String>,
    /// Break-glass event that lifted the deny, if any.
    pub breakglass_id: Option<String>,
    /// Server session opened or reused, if any.
    pub session_id: Option<String>,
    /// Per-invocation request id.
    pub request_id: String,
    /// Reason string; on denies this is the fixed-vocabulary reason.
    pub reason: String,
    /// Hex MAC over the canonical encoding of everything above.
    pub hmac: String,
}

impl AuditRecord {
    /// Canonical byte encoding the MAC covers: a JSON array, field order
    /// fixed, timestamps in RFC 3339 with explicit UTC offset. Field order
    /// must never change once streams exist.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let fields = (
            self.sequence,
            self.prev_hmac.as_str(),
            self.timestamp.to_rfc3339(),
            self.caller.as_str(),
            self.profile.as_str(),
            self.effect.as_str(),
            self.matched_rule.as_deref(),
            self.approval_id.as_deref(),
            self.breakglass_id.as_deref(),
            self.session_id.as_deref(),
            self.request_id.as_str(),
            self.reason.as_str(),
        );
        // Tuple serialization is infallible for these field types.
        serde_json::to_vec(&fields).unwrap_or_default()
    }
}
