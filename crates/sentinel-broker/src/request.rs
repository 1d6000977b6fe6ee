//! Broker request and response types.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sentinel_core::{ApprovalId, DevicePosture, MfaEvidence, RequestId, ServerSessionId};

/// A credential request as it arrives at the broker.
#[derive(Debug, Clone)]
pub struct BrokerRequest {
    /// Authenticated caller's principal ARN.
    pub caller_arn: String,
    /// Requested profile name.
    pub profile: String,
    /// Session duration the caller asks for; the configured default applies
    /// when absent. Always capped, never extended.
    pub session_duration: Option<Duration>,
    /// Posture claim collected on the device, when present.
    pub device_posture: Option<DevicePosture>,
    /// Device to look posture up for when no claim accompanies the request.
    pub device_id: Option<String>,
    /// Approval ticket the caller wants applied to a deny.
    pub approval_id: Option<ApprovalId>,
    /// MFA evidence, forwarded to the role assumer when roles mandate it.
    pub mfa: Option<MfaEvidence>,
    /// Existing server session to refresh, for subsequent server-mode calls.
    pub session_id: Option<ServerSessionId>,
}

impl BrokerRequest {
    /// A minimal request for `caller_arn` on `profile`.
    pub fn new(caller_arn: impl Into<String>, profile: impl Into<String>) -> Self {
        Self {
            caller_arn: caller_arn.into(),
            profile: profile.into(),
            session_duration: None,
            device_posture: None,
            device_id: None,
            approval_id: None,
            mfa: None,
            session_id: None,
        }
    }
}

/// Credentials plus the correlation data stamped onto them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedCredentials {
    /// Access key id.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Session token.
    pub session_token: String,
    /// When the credentials stop working.
    pub expires_at: DateTime<Utc>,
    /// Stamped source identity (`sentinel:<user>:<request_id>`).
    pub source_identity: String,
    /// Per-invocation request id, matching the audit record.
    pub request_id: RequestId,
    /// Server session the credentials belong to, in server mode.
    pub session_id: Option<ServerSessionId>,
    /// Duration actually granted after capping.
    pub granted_duration: Duration,
    /// Rule that allowed the request, when one did.
    pub matched_rule: Option<String>,
}
