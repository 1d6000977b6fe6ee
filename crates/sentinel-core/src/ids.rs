//! Identifier newtypes for broker entities.
//!
//! Ids that end up inside a stamped source identity are constrained to a
//! URL-safe alphabet and bounded length, so they are generated from a fixed
//! character set rather than formatted UUIDs.

use std::fmt;
use std::str::FromStr;

use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::SentinelError;

/// Lowercase base32 alphabet used for request ids.
const REQUEST_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz234567";

/// Length of generated request ids. Must stay within the 8..=20 range the
/// source-identity format admits.
const REQUEST_ID_LEN: usize = 16;

/// Per-invocation request identifier.
///
/// Drawn from a cryptographic RNG; embedded in the stamped source identity
/// and in every audit record for the request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a fresh request id.
    pub fn generate() -> Self {
        let mut rng = OsRng;
        let id: String = (0..REQUEST_ID_LEN)
            .map(|_| REQUEST_ID_ALPHABET[rng.gen_range(0..REQUEST_ID_ALPHABET.len())] as char)
            .collect();
        Self(id)
    }

    /// View as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RequestId {
    type Err = SentinelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() < 8 || s.len() > 20 {
            return Err(SentinelError::input("request id length out of range"));
        }
        if !s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(SentinelError::input("request id has invalid characters"));
        }
        Ok(Self(s.to_string()))
    }
}

/// Server-session identifier: 16 lowercase hex characters (64 random bits).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerSessionId(String);

impl ServerSessionId {
    /// Generate a fresh session id.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 8];
        OsRng.fill(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// View as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ServerSessionId {
    type Err = SentinelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 16 || !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(SentinelError::input("session id must be 16 hex chars"));
        }
        Ok(Self(s.to_string()))
    }
}

/// Opaque approval-ticket identifier.
///
/// ULID-like: 26 characters, time-prefixed so listings sort by creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApprovalId(String);

/// Crockford base32 alphabet, as used by ULID encodings.
const ULID_ALPHABET: &[u8] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

fn ulid_like(timestamp_ms: u64) -> String {
    let mut out = String::with_capacity(26);
    // 48-bit timestamp, most significant character first.
    for shift in (0..10).rev() {
        let idx = ((timestamp_ms >> (shift * 5)) & 0x1f) as usize;
        out.push(ULID_ALPHABET[idx] as char);
    }
    let mut rng = OsRng;
    for _ in 0..16 {
        out.push(ULID_ALPHABET[rng.gen_range(0..ULID_ALPHABET.len())] as char);
    }
    out
}

impl ApprovalId {
    /// Generate a fresh approval id with the given creation instant.
    pub fn generate(timestamp_ms: u64) -> Self {
        Self(ulid_like(timestamp_ms))
    }

    /// Wrap an externally supplied id.
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// View as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ApprovalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Break-glass event identifier, same encoding as approval ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BreakGlassId(String);

impl BreakGlassId {
    /// Generate a fresh break-glass id with the given invocation instant.
    pub fn generate(timestamp_ms: u64) -> Self {
        Self(ulid_like(timestamp_ms))
    }

    /// Wrap an externally supplied id.
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// View as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BreakGlassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn request_ids_are_unique_and_well_formed() {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let id = RequestId::generate();
            assert_eq!(id.as_str().len(), REQUEST_ID_LEN);
            assert!(id
                .as_str()
                .bytes()
                .all(|b| REQUEST_ID_ALPHABET.contains(&b)));
            assert!(seen.insert(id));
        }
    }

    #[test]
    fn request_id_parse_rejects_bad_input() {
        assert!("short".parse::<RequestId>().is_err());
        assert!("has spaces inside!".parse::<RequestId>().is_err());
        assert!("abcdefgh2345".parse::<RequestId>().is_ok());
    }

    #[test]
    fn session_ids_are_sixteen_hex_chars() {
        let id = ServerSessionId::generate();
        assert_eq!(id.as_str().len(), 16);
        assert!(id.as_str().parse::<ServerSessionId>().is_ok());
        assert!("xyz".parse::<ServerSessionId>().is_err());
        assert!("ABCDEF0123456789".parse::<ServerSessionId>().is_err());
    }

    #[test]
    fn approval_ids_sort_by_creation_time() {
        let early = ApprovalId::generate(1_000);
        let late = ApprovalId::generate(2_000_000);
        assert!(early < late);
        assert_eq!(early.as_str().len(), 26);
    }
}
