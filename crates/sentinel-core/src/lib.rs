//! # Sentinel Core
//!
//! Foundation types for the Sentinel credential broker: the unified error
//! taxonomy, identifier newtypes, caller-identity (ARN) parsing, input
//! sanitization, device-posture claims, broker configuration, and the clock
//! capability used to inject evaluation instants.
//!
//! This crate has no I/O and no dependency on any other sentinel crate;
//! everything above it (policy, stores, audit, broker) builds on these types.

pub mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod ids;
pub mod mfa;
pub mod posture;
pub mod validation;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{
    BreakGlassConfig, BrokerConfig, RateLimitConfig, BREAK_GLASS_HARD_MAX,
    DEFAULT_SESSION_DURATION,
};
pub use error::{DenyReason, SentinelError, SentinelResult};
pub use identity::{sanitize_username, CallerIdentity, IdentityKind};
pub use ids::{ApprovalId, BreakGlassId, RequestId, ServerSessionId};
pub use mfa::MfaEvidence;
pub use posture::{validate_device_id, DevicePosture, PostureStatus};
pub use validation::{escape_for_log, is_safe_display_string, validate_profile_name};
