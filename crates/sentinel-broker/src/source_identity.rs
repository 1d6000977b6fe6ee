//! Source-identity stamping.
//!
//! The stamped identity is the single wire-visible correlation key:
//! `sentinel:<sanitized_username>:<request_id>`, at most 64 characters.
//! Both components are constrained at construction, but the stamp is still
//! validated before it leaves the broker; a malformed stamp would poison
//! every downstream audit system keyed on it.

use sentinel_core::{RequestId, SentinelError, SentinelResult};

/// Maximum length of a stamped source identity.
pub const MAX_SOURCE_IDENTITY_LEN: usize = 64;

/// Build the source identity for a request.
pub fn stamp(sanitized_username: &str, request_id: &RequestId) -> SentinelResult<String> {
    let identity = format!("sentinel:{sanitized_username}:{request_id}");
    validate(&identity)?;
    Ok(identity)
}

/// Check a source identity against the wire format
/// `^sentinel:[a-z0-9_-]{1,20}:[a-zA-Z0-9_-]{8,20}$`.
pub fn validate(identity: &str) -> SentinelResult<()> {
    if identity.len() > MAX_SOURCE_IDENTITY_LEN {
        return Err(SentinelError::input("source identity exceeds 64 chars"));
    }
    let mut parts = identity.splitn(3, ':');
    let (prefix, user, request) = match (parts.next(), parts.next(), parts.next()) {
        (Some(prefix), Some(user), Some(request)) => (prefix, user, request),
        _ => return Err(SentinelError::input("source identity has wrong shape")),
    };
    if prefix != "sentinel" {
        return Err(SentinelError::input("source identity has wrong prefix"));
    }
    if user.is_empty()
        || user.len() > 20
        || !user
            .bytes()
            .all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-'))
    {
        return Err(SentinelError::input("source identity username segment invalid"));
    }
    if request.len() < 8
        || request.len() > 20
        || !request
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(SentinelError::input("source identity request segment invalid"));
    }
    Ok(())
}
