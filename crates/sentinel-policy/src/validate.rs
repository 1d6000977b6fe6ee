//! Structural and semantic policy validation.
//!
//! Validation is total: a `Policy` that passes `validate` has no further
//! structural surprises. The engine and the loader both assume validated
//! input.

use sentinel_core::is_safe_display_string;

use crate::model::{DeviceCondition, Policy, Rule, TimeWindow};

/// Why a policy failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyValidationError {
    /// Policy has no rules.
    #[error("policy has no rules")]
    EmptyRules,
    /// Policy is missing the schema-version string.
    #[error("policy is missing a version")]
    MissingVersion,
    /// Rule has no name.
    #[error("rule {index} is missing a name")]
    MissingRuleName {
        /// Zero-based rule position.
        index: usize,
    },
    /// Rule name is not display-safe.
    #[error("rule {index} has an unsafe name")]
    InvalidRuleName {
        /// Zero-based rule position.
        index: usize,
    },
    /// Rule condition has no populated sub-predicate.
    #[error("rule {rule:?} has an empty condition")]
    EmptyConditionMatchers {
        /// Offending rule name.
        rule: String,
    },
    /// Unparseable weekday in a time window.
    ///
    /// Unknown names are rejected by serde at parse time; this covers
    /// duplicates, which would make the window ambiguous to audit.
    #[error("rule {rule:?} repeats weekday {weekday}")]
    InvalidWeekday {
        /// Offending rule name.
        rule: String,
        /// The repeated day.
        weekday: String,
    },
    /// Hour bound does not match `HH:MM`.
    #[error("rule {rule:?} has invalid hour {value:?} (expected 24h HH:MM)")]
    InvalidHourFormat {
        /// Offending rule name.
        rule: String,
        /// The rejected bound.
        value: String,
    },
    /// Timezone is not a loadable IANA zone.
    #[error("rule {rule:?} names unknown timezone {timezone:?}")]
    InvalidTimezone {
        /// Offending rule name.
        rule: String,
        /// The rejected zone name.
        timezone: String,
    },
    /// Device condition is populated but meaningless.
    #[error("rule {rule:?} has an invalid device condition: {detail}")]
    InvalidDeviceFlag {
        /// Offending rule name.
        rule: String,
        /// What was wrong.
        detail: String,
    },
}

/// Validate a parsed policy.
pub fn validate(policy: &Policy) -> Result<(), PolicyValidationError> {
    if policy.version.trim().is_empty() {
        return Err(PolicyValidationError::MissingVersion);
    }
    if policy.rules.is_empty() {
        return Err(PolicyValidationError::EmptyRules);
    }
    for (index, rule) in policy.rules.iter().enumerate() {
        validate_rule(index, rule)?;
    }
    Ok(())
}

fn validate_rule(index: usize, rule: &Rule) -> Result<(), PolicyValidationError> {
    if rule.name.trim().is_empty() {
        return Err(PolicyValidationError::MissingRuleName { index });
    }
    if !is_safe_display_string(&rule.name) {
        return Err(PolicyValidationError::InvalidRuleName { index });
    }
    if rule.condition.is_vacuous() {
        return Err(PolicyValidationError::EmptyConditionMatchers {
            rule: rule.name.clone(),
        });
    }
    if let Some(window) = &rule.condition.time {
        validate_window(&rule.name, window)?;
    }
    if let Some(device) = &rule.condition.device {
        validate_device(&rule.name, device)?;
    }
    Ok(())
}

fn validate_window(rule: &str, window: &TimeWindow) -> Result<(), PolicyValidationError> {
    let mut seen = std::collections::HashSet::new();
    for day in &window.weekdays {
        if !seen.insert(*day) {
            return Err(PolicyValidationError::InvalidWeekday {
                rule: rule.to_string(),
                weekday: format!("{day:?}").to_lowercase(),
            });
        }
    }
    if let Some(hours) = &window.hours {
        for bound in [&hours.start, &hours.end] {
            if parse_hhmm(bound).is_none() {
                return Err(PolicyValidationError::InvalidHourFormat {
                    rule: rule.to_string(),
                    value: bound.clone(),
                });
            }
        }
    }
    if window.timezone.parse::<chrono_tz::Tz>().is_err() {
        return Err(PolicyValidationError::InvalidTimezone {
            rule: rule.to_string(),
            timezone: window.timezone.clone(),
        });
    }
    Ok(())
}

fn validate_device(rule: &str, device: &DeviceCondition) -> Result<(), PolicyValidationError> {
    if device.is_vacuous() {
        return Err(PolicyValidationError::InvalidDeviceFlag {
            rule: rule.to_string(),
            detail: "device condition has no checks".to_string(),
        });
    }
    if device.os_types.iter().any(|t| t.trim().is_empty()) {
        return Err(PolicyValidationError::InvalidDeviceFlag {
            rule: rule.to_string(),
            detail: "os_types contains an empty entry".to_string(),
        });
    }
    if let Some(version) = &device.min_os_version {
        if version.is_empty()
            || !version
                .split('.')
                .all(|seg| !seg.is_empty() && seg.bytes().all(|b| b.is_ascii_digit()))
        {
            return Err(PolicyValidationError::InvalidDeviceFlag {
                rule: rule.to_string(),
                detail: format!("min_os_version {version:?} is not dotted-numeric"),
            });
        }
    }
    Ok(())
}

/// Parse an `HH:MM` bound into minutes past midnight. `None` when the text
/// does not match the required pattern.
pub(crate) fn parse_hhmm(text: &str) -> Option<u32> {
    hour_minute(text).map(|(h, m)| h * 60 + m)
}

fn hour_minute(text: &str) -> Option<(u32, u32)> {
    let bytes = text.as_bytes();
    if bytes.len() != 5 || bytes[2] != b':' {
        return None;
    }
    let digits = |b: u8| (b as char).to_digit(10);
    let (h1, h2) = (digits(bytes[0])?, digits(bytes[1])?);
    let (m1, m2) = (digits(bytes[3])?, digits(bytes[4])?);
    let hours = h1 * 10 + h2;
    let minutes = m1 * 10 + m2;
    if hours > 23 || minutes > 59 {
        return None;
    }
    Some((hours, minutes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Condition, Effect, HourRange, Weekday};

    fn rule(name: &str, condition: Condition) -> Rule {
        Rule {
            name: name.into(),
            effect: Effect::Allow,
            description: None,
            condition,
            max_server_duration: None,
        }
    }

    fn policy(rules: Vec<Rule>) -> Policy {
        Policy {
            version: "1".into(),
            rules,
        }
    }

    fn user_condition() -> Condition {
        Condition {
            users: vec!["alice".into()],
            ..Condition::default()
        }
    }

    #[test]
    fn empty_policy_and_missing_version_fail() {
        assert_eq!(
            validate(&policy(vec![])),
            Err(PolicyValidationError::EmptyRules)
        );
        let mut p = policy(vec![rule("r", user_condition())]);
        p.version = "  ".into();
        assert_eq!(validate(&p), Err(PolicyValidationError::MissingVersion));
    }

    #[test]
    fn unnamed_and_vacuous_rules_fail() {
        let p = policy(vec![rule("", user_condition())]);
        assert_eq!(
            validate(&p),
            Err(PolicyValidationError::MissingRuleName { index: 0 })
        );

        let p = policy(vec![rule("vacuous", Condition::default())]);
        assert!(matches!(
            validate(&p),
            Err(PolicyValidationError::EmptyConditionMatchers { .. })
        ));
    }

    #[test]
    fn hour_and_timezone_validation() {
        let window = |start: &str, end: &str, tz: &str| Condition {
            time: Some(TimeWindow {
                weekdays: vec![],
                hours: Some(HourRange {
                    start: start.into(),
                    end: end.into(),
                }),
                timezone: tz.into(),
            }),
            ..Condition::default()
        };

        assert!(validate(&policy(vec![rule("ok", window("09:00", "18:00", "America/New_York"))])).is_ok());
        assert!(matches!(
            validate(&policy(vec![rule("bad", window("9:00", "18:00", "UTC"))])),
            Err(PolicyValidationError::InvalidHourFormat { .. })
        ));
        assert!(matches!(
            validate(&policy(vec![rule("bad", window("24:00", "18:00", "UTC"))])),
            Err(PolicyValidationError::InvalidHourFormat { .. })
        ));
        assert!(matches!(
            validate(&policy(vec![rule("bad", window("09:00", "18:00", "Mars/Olympus"))])),
            Err(PolicyValidationError::InvalidTimezone { .. })
        ));
    }

    #[test]
    fn duplicate_weekdays_fail() {
        let condition = Condition {
            time: Some(TimeWindow {
                weekdays: vec![Weekday::Mon, Weekday::Mon],
                hours: None,
                timezone: "UTC".into(),
            }),
            ..Condition::default()
        };
        assert!(matches!(
            validate(&policy(vec![rule("dup", condition)])),
            Err(PolicyValidationError::InvalidWeekday { .. })
        ));
    }

    #[test]
    fn device_condition_validation() {
        let with_device = |device: DeviceCondition| Condition {
            device: Some(device),
            ..Condition::default()
        };

        let ok = DeviceCondition {
            require_disk_encryption: Some(true),
            min_os_version: Some("14.2.1".into()),
            ..DeviceCondition::default()
        };
        assert!(validate(&policy(vec![rule("ok", with_device(ok))])).is_ok());

        let bad_version = DeviceCondition {
            min_os_version: Some("14.x".into()),
            ..DeviceCondition::default()
        };
        assert!(matches!(
            validate(&policy(vec![rule("bad", with_device(bad_version))])),
            Err(PolicyValidationError::InvalidDeviceFlag { .. })
        ));
    }

    #[test]
    fn hhmm_parser_bounds() {
        assert_eq!(parse_hhmm("00:00"), Some(0));
        assert_eq!(parse_hhmm("23:59"), Some(23 * 60 + 59));
        assert_eq!(parse_hhmm("24:00"), None);
        assert_eq!(parse_hhmm("12:60"), None);
        assert_eq!(parse_hhmm("1200"), None);
        assert_eq!(parse_hhmm("ab:cd"), None);
    }
}
