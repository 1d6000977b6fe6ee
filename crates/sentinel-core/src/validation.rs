//! Input sanitization helpers.
//!
//! Profile names come from the network and end up in policy-store paths, so
//! they get a strict character-set check plus traversal rejection. Anything
//! else that reaches a diagnostic string goes through `escape_for_log` first.

use crate::error::{SentinelError, SentinelResult};

/// Maximum accepted profile-name length.
const PROFILE_MAX_LEN: usize = 256;

/// Validate a requested profile name.
///
/// Accepted: `^[A-Za-z0-9_/:-]{1,256}$`, ASCII only, with `..`, `//`, and
/// `./` sequences rejected so a profile can never traverse the policy root.
pub fn validate_profile_name(name: &str) -> SentinelResult<()> {
    if name.is_empty() {
        return Err(SentinelError::input("profile name is empty"));
    }
    if name.len() > PROFILE_MAX_LEN {
        return Err(SentinelError::input(format!(
            "profile name exceeds {PROFILE_MAX_LEN} characters"
        )));
    }
    for b in name.bytes() {
        let ok = b.is_ascii_alphanumeric() || matches!(b, b'_' | b'/' | b':' | b'-');
        if !ok {
            return Err(SentinelError::input(format!(
                "profile name contains invalid byte: {}",
                escape_for_log(name)
            )));
        }
    }
    if name.contains("..") || name.contains("//") || name.contains("./") {
        return Err(SentinelError::input(
            "profile name contains a path traversal sequence",
        ));
    }
    Ok(())
}

/// Escape a string for inclusion in logs and diagnostics.
///
/// Control characters and non-ASCII bytes are rendered as `\x{..}` escapes so
/// attacker-supplied input cannot forge log lines or smuggle terminal control
/// sequences.
pub fn escape_for_log(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_ascii_graphic() || c == ' ' => out.push(c),
            c => {
                for unit in c.to_string().bytes() {
                    out.push_str(&format!("\\x{{{unit:02x}}}"));
                }
            }
        }
    }
    out
}

/// Whether a string is safe to echo verbatim in a caller-facing message.
///
/// Stricter than log escaping: printable ASCII only, bounded length.
pub fn is_safe_display_string(input: &str) -> bool {
    input.len() <= 512 && input.chars().all(|c| c.is_ascii_graphic() || c == ' ')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_reasonable_profile_names() {
        for name in ["staging", "prod/us-east-1", "team:web-app", "a_b-c"] {
            assert!(validate_profile_name(name).is_ok(), "rejected {name}");
        }
    }

    #[test]
    fn rejects_traversal_and_bad_bytes() {
        for name in [
            "",
            "../etc/passwd",
            "a//b",
            "./hidden",
            "name with space",
            "null\0byte",
            "caf\u{e9}",
        ] {
            assert!(validate_profile_name(name).is_err(), "accepted {name:?}");
        }
        assert!(validate_profile_name(&"x".repeat(257)).is_err());
        assert!(validate_profile_name(&"x".repeat(256)).is_ok());
    }

    #[test]
    fn log_escape_neutralizes_control_sequences() {
        assert_eq!(escape_for_log("plain text"), "plain text");
        assert_eq!(escape_for_log("two\nlines"), "two\\nlines");
        assert_eq!(escape_for_log("esc\u{1b}[31m"), "esc\\x{1b}[31m");
        assert!(!escape_for_log("naïve").contains('ï'));
    }

    #[test]
    fn display_safety_check() {
        assert!(is_safe_display_string("rule-deny: block-prod"));
        assert!(!is_safe_display_string("evil\u{7}bell"));
    }
}
