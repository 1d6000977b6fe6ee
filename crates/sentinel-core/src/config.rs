//! Broker configuration.
//!
//! Assembled once at startup by the hosting process (config-file parsing is
//! out of scope here) and validated before the broker constructs. A broker
//! never starts with missing required configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SentinelError, SentinelResult};

/// Default session duration when the caller does not request one: 15 minutes.
pub const DEFAULT_SESSION_DURATION: Duration = Duration::from_secs(900);

/// Hard ceiling on break-glass event duration: 4 hours.
pub const BREAK_GLASS_HARD_MAX: Duration = Duration::from_secs(4 * 60 * 60);

/// Admission rate-limit settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per window when no burst size is set.
    pub requests_per_window: u32,
    /// Window length.
    pub window: Duration,
    /// Optional burst allowance overriding `requests_per_window`.
    pub burst_size: Option<u32>,
}

impl RateLimitConfig {
    /// The burst the limiter actually enforces.
    pub fn effective_burst(&self) -> u32 {
        self.burst_size.unwrap_or(self.requests_per_window)
    }

    /// Reject non-positive settings.
    pub fn validate(&self) -> SentinelResult<()> {
        if self.requests_per_window == 0 {
            return Err(SentinelError::configuration(
                "rate_limit.requests_per_window must be positive",
            ));
        }
        if self.window.is_zero() {
            return Err(SentinelError::configuration(
                "rate_limit.window must be positive",
            ));
        }
        if self.burst_size == Some(0) {
            return Err(SentinelError::configuration(
                "rate_limit.burst_size must be positive when set",
            ));
        }
        Ok(())
    }
}

/// Break-glass channel settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakGlassConfig {
    /// Minimum gap between consecutive events per invoker.
    pub cooldown: Duration,
    /// Events an invoker may open per hour.
    pub hourly_quota: u32,
    /// Maximum event duration policy may grant. Clamped to
    /// [`BREAK_GLASS_HARD_MAX`].
    pub max_duration: Duration,
    /// Whether invocation requires verified MFA.
    pub require_mfa: bool,
    /// MFA methods accepted when `require_mfa` is set.
    pub allowed_mfa_methods: Vec<String>,
}

impl Default for BreakGlassConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(600),
            hourly_quota: 3,
            max_duration: Duration::from_secs(60 * 60),
            require_mfa: false,
            allowed_mfa_methods: Vec::new(),
        }
    }
}

impl BreakGlassConfig {
    /// The duration ceiling actually enforced: configured max, never above
    /// the hard cap.
    pub fn effective_max_duration(&self) -> Duration {
        self.max_duration.min(BREAK_GLASS_HARD_MAX)
    }

    /// Validate the section.
    pub fn validate(&self) -> SentinelResult<()> {
        if self.hourly_quota == 0 {
            return Err(SentinelError::configuration(
                "breakglass.hourly_quota must be positive",
            ));
        }
        if self.max_duration.is_zero() {
            return Err(SentinelError::configuration(
                "breakglass.max_duration must be positive",
            ));
        }
        if self.require_mfa && self.allowed_mfa_methods.is_empty() {
            return Err(SentinelError::configuration(
                "breakglass.require_mfa is set but no MFA methods are allowed",
            ));
        }
        Ok(())
    }
}

/// Top-level broker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// OS keyring service name used by the host for secret material.
    pub keyring_service_name: String,
    /// Path prefix under which policies live in the policy store.
    pub policy_root: String,
    /// Whether a detached policy signature is mandatory.
    pub policy_signature_required: bool,
    /// Signing identity trusted for policy verification. Required when
    /// `policy_signature_required` is set.
    pub policy_public_key_id: Option<String>,
    /// Symmetric key for the audit HMAC chain.
    pub audit_hmac_key: Vec<u8>,
    /// Granted duration when the request does not specify one.
    pub default_session_duration: Duration,
    /// Admission limiter settings.
    pub rate_limit: RateLimitConfig,
    /// Break-glass channel settings.
    pub breakglass: BreakGlassConfig,
    /// Backing table for server sessions. `Some` enables server mode.
    pub session_table_name: Option<String>,
}

impl BrokerConfig {
    /// Whether the broker runs in server mode (tracked, revocable sessions).
    pub fn server_mode(&self) -> bool {
        self.session_table_name.is_some()
    }

    /// Validate the whole configuration. Called at broker construction; any
    /// error refuses startup.
    pub fn validate(&self) -> SentinelResult<()> {
        if self.keyring_service_name.is_empty() {
            return Err(SentinelError::configuration(
                "keyring_service_name is required",
            ));
        }
        if self.policy_root.is_empty() {
            return Err(SentinelError::configuration("policy_root is required"));
        }
        if self.policy_signature_required
            && self
                .policy_public_key_id
                .as_deref()
                .map_or(true, str::is_empty)
        {
            return Err(SentinelError::configuration(
                "policy_signature_required is set but policy_public_key_id is missing",
            ));
        }
        if self.audit_hmac_key.len() < 16 {
            return Err(SentinelError::configuration(
                "audit_hmac_key must be at least 16 bytes",
            ));
        }
        if self.default_session_duration.is_zero() {
            return Err(SentinelError::configuration(
                "default_session_duration must be positive",
            ));
        }
        self.rate_limit.validate()?;
        self.breakglass.validate()?;
        if let Some(table) = &self.session_table_name {
            if table.is_empty() {
                return Err(SentinelError::configuration(
                    "session_table_name must be non-empty when set",
                ));
            }
        }
        Ok(())
    }
}
