//! Unified error taxonomy for Sentinel.
//!
//! Every fallible surface in the broker returns `SentinelError`. The enum is a
//! closed sum over the six error kinds the pipeline branches on; callers match
//! on the variant, never on message text. Backend detail stays in the
//! `message` fields (internal logs, audit records) and is never the string a
//! remote caller sees.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Fixed vocabulary of denial reasons surfaced to callers.
///
/// These are the only strings the broker echoes back on a deny. Rule names
/// are sanitized at policy-validation time, so `RuleDeny` is safe to display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DenyReason {
    /// No rule in the policy matched the request.
    DefaultDeny,
    /// An explicit deny rule matched.
    RuleDeny {
        /// Name of the matching deny rule.
        rule: String,
    },
    /// An approval id was presented but no consumable approval exists.
    ApprovalNotFound,
    /// No valid break-glass event covers this request.
    BreakGlassNotValid,
    /// The server session has been revoked.
    Revoked,
    /// Duration capping left nothing to grant.
    DurationZero,
    /// The caller is over the admission rate limit.
    RateLimited,
}

impl DenyReason {
    /// Wire representation of the reason.
    pub fn as_str(&self) -> String {
        match self {
            DenyReason::DefaultDeny => "default-deny".to_string(),
            DenyReason::RuleDeny { rule } => format!("rule-deny: {rule}"),
            DenyReason::ApprovalNotFound => "approval-not-found".to_string(),
            DenyReason::BreakGlassNotValid => "breakglass-not-valid".to_string(),
            DenyReason::Revoked => "revoked".to_string(),
            DenyReason::DurationZero => "duration-zero".to_string(),
            DenyReason::RateLimited => "rate-limited".to_string(),
        }
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unified error type for all broker operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SentinelError {
    /// Invalid input: malformed profile name, unparseable ARN, bad parameters.
    /// Safe to surface verbatim.
    #[error("invalid input: {message}")]
    Input {
        /// What was wrong with the input.
        message: String,
    },

    /// Policy parse, validation, or signature failure. Denies the request;
    /// callers see a generic policy error, the detail stays internal.
    #[error("policy error: {message}")]
    Policy {
        /// Internal detail, not for remote callers.
        message: String,
    },

    /// The request was denied. `reason` is drawn from the fixed vocabulary.
    #[error("denied: {reason}")]
    Authorization {
        /// Structured denial reason.
        reason: DenyReason,
        /// For rate-limit denies, when the caller may retry.
        retry_after: Option<Duration>,
    },

    /// Store timeout, role-assumer throttling, or similar recoverable
    /// backend failure.
    #[error("transient failure: {message}")]
    Transient {
        /// Internal detail.
        message: String,
        /// Suggested retry delay, when the backend provided one.
        retry_after: Option<Duration>,
    },

    /// Tamper evidence: audit chain mismatch or invalid policy signature.
    #[error("integrity failure: {message}")]
    Integrity {
        /// Internal detail, operator-visible.
        message: String,
    },

    /// Missing or inconsistent startup configuration. The broker refuses to
    /// construct.
    #[error("configuration error: {message}")]
    Configuration {
        /// What is missing or inconsistent.
        message: String,
    },
}

impl SentinelError {
    /// Create an input error.
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input {
            message: message.into(),
        }
    }

    /// Create a policy error.
    pub fn policy(message: impl Into<String>) -> Self {
        Self::Policy {
            message: message.into(),
        }
    }

    /// Create a denial with the given reason.
    pub fn denied(reason: DenyReason) -> Self {
        Self::Authorization {
            reason,
            retry_after: None,
        }
    }

    /// Create a rate-limit denial carrying a retry hint.
    pub fn rate_limited(retry_after: Duration) -> Self {
        Self::Authorization {
            reason: DenyReason::RateLimited,
            retry_after: Some(retry_after),
        }
    }

    /// Create a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Create an integrity error.
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether this error denies the request (as opposed to rejecting it
    /// before a decision was made).
    pub fn is_denial(&self) -> bool {
        matches!(self, Self::Authorization { .. })
    }

    /// The denial reason, when this error is a denial.
    pub fn deny_reason(&self) -> Option<&DenyReason> {
        match self {
            Self::Authorization { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// Result alias used across the broker.
pub type SentinelResult<T> = Result<T, SentinelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_reason_vocabulary_is_stable() {
        assert_eq!(DenyReason::DefaultDeny.as_str(), "default-deny");
        assert_eq!(
            DenyReason::RuleDeny {
                rule: "block-prod".into()
            }
            .as_str(),
            "rule-deny: block-prod"
        );
        assert_eq!(DenyReason::ApprovalNotFound.as_str(), "approval-not-found");
        assert_eq!(
            DenyReason::BreakGlassNotValid.as_str(),
            "breakglass-not-valid"
        );
        assert_eq!(DenyReason::Revoked.as_str(), "revoked");
        assert_eq!(DenyReason::DurationZero.as_str(), "duration-zero");
        assert_eq!(DenyReason::RateLimited.as_str(), "rate-limited");
    }

    #[test]
    fn denial_predicate_matches_authorization_only() {
        assert!(SentinelError::denied(DenyReason::DefaultDeny).is_denial());
        assert!(!SentinelError::input("bad profile").is_denial());
        assert!(!SentinelError::transient("timeout").is_denial());
    }
}
