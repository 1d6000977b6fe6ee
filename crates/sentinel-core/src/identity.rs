//! Caller identity parsing.
//!
//! The broker receives the caller as an already-authenticated principal ARN.
//! This module parses the ARN into its parts, classifies the principal kind,
//! and derives the sanitized username used everywhere policy matching and
//! source-identity stamping touch it. The raw username survives for display
//! only.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{SentinelError, SentinelResult};

/// Partitions the broker recognizes.
const KNOWN_PARTITIONS: &[&str] = &["aws", "aws-cn", "aws-us-gov"];

/// Maximum length of a sanitized username.
const SANITIZED_MAX_LEN: usize = 20;

/// Kind of authenticated principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentityKind {
    /// A long-lived IAM user.
    User,
    /// A role session, including SSO-style reserved roles.
    AssumedRole,
    /// A federated user.
    Federated,
    /// The account root principal.
    Root,
}

impl IdentityKind {
    /// Wire representation of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityKind::User => "user",
            IdentityKind::AssumedRole => "assumed-role",
            IdentityKind::Federated => "federated",
            IdentityKind::Root => "root",
        }
    }
}

impl fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parsed caller identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    /// Partition the ARN belongs to.
    pub partition: String,
    /// Twelve-digit account id.
    pub account: String,
    /// Principal kind.
    pub kind: IdentityKind,
    /// Username as it appeared in the ARN, for display.
    pub raw_username: String,
    /// Case-folded, stripped, truncated username used for matching and
    /// stamping.
    pub sanitized_username: String,
    /// The full ARN as presented.
    pub arn: String,
}

impl CallerIdentity {
    /// Parse a principal ARN.
    ///
    /// Accepted shapes:
    /// - `arn:<p>:iam::<acct>:user/<path…>/<name>`
    /// - `arn:<p>:sts::<acct>:assumed-role/<role>/<session>`
    /// - `arn:<p>:sts::<acct>:federated-user/<name>`
    /// - `arn:<p>:iam::<acct>:root`
    pub fn parse(arn: &str) -> SentinelResult<Self> {
        let parts: Vec<&str> = arn.splitn(6, ':').collect();
        if parts.len() != 6 || parts[0] != "arn" {
            return Err(SentinelError::input("not a valid ARN"));
        }
        let partition = parts[1];
        let service = parts[2];
        let account = parts[4];
        let resource = parts[5];

        if !KNOWN_PARTITIONS.contains(&partition) {
            return Err(SentinelError::input(format!(
                "InvalidPartition: unrecognized partition {partition:?}"
            )));
        }
        if account.len() != 12 || !account.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SentinelError::input("account id must be 12 digits"));
        }

        let (kind, raw_username) = match (service, resource) {
            ("iam", "root") => (IdentityKind::Root, "root".to_string()),
            ("iam", r) if r.starts_with("user/") => {
                // Path segments between "user/" and the final name are
                // organizational only.
                let name = r
                    .rsplit('/')
                    .next()
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| SentinelError::input("user ARN has empty name"))?;
                (IdentityKind::User, name.to_string())
            }
            ("sts", r) if r.starts_with("assumed-role/") => {
                let mut segments = r.splitn(3, '/');
                segments.next(); // "assumed-role"
                segments
                    .next()
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| SentinelError::input("assumed-role ARN missing role name"))?;
                let session = segments
                    .next()
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| SentinelError::input("assumed-role ARN missing session name"))?;
                (IdentityKind::AssumedRole, session.to_string())
            }
            ("sts", r) if r.starts_with("federated-user/") => {
                let name = &r["federated-user/".len()..];
                if name.is_empty() {
                    return Err(SentinelError::input("federated-user ARN has empty name"));
                }
                (IdentityKind::Federated, name.to_string())
            }
            _ => {
                return Err(SentinelError::input(format!(
                    "unsupported principal resource {resource:?}"
                )))
            }
        };

        let sanitized_username = sanitize_username(&raw_username)?;

        Ok(Self {
            partition: partition.to_string(),
            account: account.to_string(),
            kind,
            raw_username,
            sanitized_username,
            arn: arn.to_string(),
        })
    }
}

/// Derive the stable sanitized form of a username.
///
/// Case-folds, strips everything outside `[a-z0-9_-]`, truncates to 20
/// characters. An empty result is an error: a caller whose name sanitizes
/// away entirely cannot be attributed.
pub fn sanitize_username(raw: &str) -> SentinelResult<String> {
    let mut out = String::with_capacity(raw.len().min(SANITIZED_MAX_LEN));
    for ch in raw.chars().flat_map(char::to_lowercase) {
        if matches!(ch, 'a'..='z' | '0'..='9' | '_' | '-') {
            out.push(ch);
            if out.len() == SANITIZED_MAX_LEN {
                break;
            }
        }
    }
    if out.is_empty() {
        return Err(SentinelError::input(
            "username sanitizes to the empty string",
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_iam_user_with_path() {
        let id =
            CallerIdentity::parse("arn:aws:iam::123456789012:user/engineering/Alice").unwrap();
        assert_eq!(id.kind, IdentityKind::User);
        assert_eq!(id.account, "123456789012");
        assert_eq!(id.raw_username, "Alice");
        assert_eq!(id.sanitized_username, "alice");
    }

    #[test]
    fn parses_sso_assumed_role_session() {
        let id = CallerIdentity::parse(
            "arn:aws:sts::123456789012:assumed-role/AWSReservedSSO_AdminAccess_abc123/alice@example.com",
        )
        .unwrap();
        assert_eq!(id.kind, IdentityKind::AssumedRole);
        assert_eq!(id.raw_username, "alice@example.com");
        // The '@' and '.' strip out.
        assert_eq!(id.sanitized_username, "aliceexamplecom");
    }

    #[test]
    fn parses_federated_user_and_root() {
        let fed = CallerIdentity::parse("arn:aws:sts::123456789012:federated-user/bob").unwrap();
        assert_eq!(fed.kind, IdentityKind::Federated);
        assert_eq!(fed.sanitized_username, "bob");

        let root = CallerIdentity::parse("arn:aws:iam::123456789012:root").unwrap();
        assert_eq!(root.kind, IdentityKind::Root);
        assert_eq!(root.sanitized_username, "root");
    }

    #[test]
    fn rejects_unknown_partition() {
        let err = CallerIdentity::parse("arn:aws-iso:iam::123456789012:user/alice").unwrap_err();
        assert!(err.to_string().contains("InvalidPartition"));
    }

    #[test]
    fn rejects_malformed_arns() {
        assert!(CallerIdentity::parse("not-an-arn").is_err());
        assert!(CallerIdentity::parse("arn:aws:iam::12:user/alice").is_err());
        assert!(CallerIdentity::parse("arn:aws:iam::123456789012:group/dev").is_err());
        assert!(CallerIdentity::parse("arn:aws:sts::123456789012:assumed-role/role").is_err());
    }

    #[test]
    fn sanitization_truncates_and_can_fail() {
        assert_eq!(
            sanitize_username("A_Very_Long_Username_Indeed_2024").unwrap(),
            "a_very_long_username"
        );
        assert!(sanitize_username("@@@").is_err());
        assert_eq!(sanitize_username("Bob-01").unwrap(), "bob-01");
    }
}
