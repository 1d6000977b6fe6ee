//! Role-assumer capability.
//!
//! The actual STS-style call lives behind this trait; the broker only ever
//! sees the structured request/response pair. The session name is the
//! stamped source identity, which is how every downstream API call carries
//! human-level attribution.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sentinel_core::MfaEvidence;

/// Classified role-assumption failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssumeRoleErrorCode {
    /// The cloud IAM layer refused the assumption.
    AccessDenied,
    /// The requested duration is outside what the role allows.
    InvalidDuration,
    /// The caller is being throttled; retry later.
    Throttled,
    /// Recoverable infrastructure failure.
    Transient,
    /// Anything else.
    Other,
}

/// Role-assumption failure with its classification.
#[derive(Debug, Clone, thiserror::Error)]
#[error("assume-role failed ({code:?}): {message}")]
pub struct AssumeRoleError {
    /// Failure classification the pipeline branches on.
    pub code: AssumeRoleErrorCode,
    /// Backend detail; logged, never surfaced to callers.
    pub message: String,
}

impl AssumeRoleError {
    /// Create an error with the given code and detail.
    pub fn new(code: AssumeRoleErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Parameters for one role assumption.
#[derive(Debug, Clone)]
pub struct AssumeRoleRequest {
    /// Role to assume.
    pub role_arn: String,
    /// Session name: the stamped source identity.
    pub session_name: String,
    /// Credential lifetime to request.
    pub duration: Duration,
    /// Session tags to propagate (session id, device id).
    pub session_tags: BTreeMap<String, String>,
    /// MFA evidence, when the role mandates it.
    pub mfa: Option<MfaEvidence>,
}

/// Short-term credentials returned by the assumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssumeRoleOutput {
    /// Access key id.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Session token.
    pub session_token: String,
    /// When the credentials stop working.
    pub expires_at: DateTime<Utc>,
}

/// Role-assumption capability.
#[async_trait]
pub trait RoleAssumer: Send + Sync {
    /// Perform the role assumption.
    async fn assume_role(
        &self,
        request: AssumeRoleRequest,
    ) -> Result<AssumeRoleOutput, AssumeRoleError>;
}

/// Profile-to-role resolution capability.
///
/// Which role ARN a profile maps to is deployment configuration owned by the
/// host; the broker only needs the lookup.
#[async_trait]
pub trait ProfileResolver: Send + Sync {
    /// The role ARN `profile` maps to, or `None` when the profile is
    /// unknown.
    async fn role_arn(&self, profile: &str) -> Option<String>;
}

/// Static profile → role map.
#[derive(Debug, Clone, Default)]
pub struct MapProfileResolver {
    mappings: BTreeMap<String, String>,
}

impl MapProfileResolver {
    /// Create a resolver over fixed mappings.
    pub fn new(mappings: BTreeMap<String, String>) -> Self {
        Self { mappings }
    }

    /// Add one mapping.
    pub fn with_mapping(mut self, profile: impl Into<String>, role_arn: impl Into<String>) -> Self {
        self.mappings.insert(profile.into(), role_arn.into());
        self
    }
}

#[async_trait]
impl ProfileResolver for MapProfileResolver {
    async fn role_arn(&self, profile: &str) -> Option<String> {
        self.mappings.get(profile).cloned()
    }
}
