//! Policy document parsing.

use sentinel_core::{SentinelError, SentinelResult};

use crate::model::Policy;
use crate::validate::validate;

/// Parse a YAML policy document without validating it.
pub fn parse(bytes: &[u8]) -> SentinelResult<Policy> {
    serde_yaml::from_slice(bytes)
        .map_err(|e| SentinelError::policy(format!("policy parse failed: {e}")))
}

/// Parse and fully validate a YAML policy document.
///
/// This is the only entry point the loader uses: a policy that reaches the
/// engine has always passed both steps.
pub fn parse_and_validate(bytes: &[u8]) -> SentinelResult<Policy> {
    let policy = parse(bytes)?;
    validate(&policy).map_err(|e| SentinelError::policy(format!("policy invalid: {e}")))?;
    Ok(policy)
}

/// Serialize a policy back to YAML.
pub fn to_yaml(policy: &Policy) -> SentinelResult<String> {
    serde_yaml::to_string(policy)
        .map_err(|e| SentinelError::policy(format!("policy serialize failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Effect;

    const SAMPLE: &str = r#"
version: "1"
rules:
  - name: dev-hours
    effect: allow
    condition:
      users: [alice]
      profiles: [staging]
      time:
        weekdays: [mon, tue, wed, thu, fri]
        hours: { start: "09:00", end: "18:00" }
        timezone: America/New_York
    max_server_duration: 900
  - name: block-everyone-else
    effect: deny
    condition:
      profiles: [staging]
"#;

    #[test]
    fn parses_sample_document() {
        let policy = parse_and_validate(SAMPLE.as_bytes()).unwrap();
        assert_eq!(policy.rules.len(), 2);
        assert_eq!(policy.rules[0].name, "dev-hours");
        assert_eq!(policy.rules[0].effect, Effect::Allow);
        assert_eq!(policy.rules[0].duration_cap_secs(), Some(900));
        assert_eq!(policy.rules[1].effect, Effect::Deny);
    }

    #[test]
    fn parse_serialize_parse_is_stable() {
        let first = parse_and_validate(SAMPLE.as_bytes()).unwrap();
        let yaml = to_yaml(&first).unwrap();
        let second = parse_and_validate(yaml.as_bytes()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_unknown_effects_and_garbage() {
        let bad_effect = SAMPLE.replace("effect: deny", "effect: audit");
        assert!(parse(bad_effect.as_bytes()).is_err());
        assert!(parse(b"{{{{ not yaml").is_err());
    }

    #[test]
    fn parse_alone_skips_semantic_checks() {
        // Parseable but invalid: no rules.
        let doc = b"version: '1'\nrules: []\n";
        assert!(parse(doc).is_ok());
        assert!(parse_and_validate(doc).is_err());
    }
}
