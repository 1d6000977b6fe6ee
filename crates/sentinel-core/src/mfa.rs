//! MFA evidence attached to requests and break-glass invocations.

use serde::{Deserialize, Serialize};

/// Proof that the caller completed an MFA challenge.
///
/// The broker does not run challenges itself; an external authenticator does
/// and hands the outcome over. The broker checks `verified` and that
/// `method` is on the configured allow-list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MfaEvidence {
    /// Mechanism used, e.g. `totp`, `webauthn`, `push`.
    pub method: String,
    /// Authenticator's challenge identifier, for correlation.
    pub challenge_id: Option<String>,
    /// Whether the authenticator reports the challenge passed.
    pub verified: bool,
}

impl MfaEvidence {
    /// Evidence for a passed challenge.
    pub fn verified(method: impl Into<String>, challenge_id: Option<String>) -> Self {
        Self {
            method: method.into(),
            challenge_id,
            verified: true,
        }
    }
}
