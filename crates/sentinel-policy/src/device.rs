//! Device-condition matching.
//!
//! Every check here is evaluated against a posture *claim*. A required
//! tri-state flag only matches when the claim reports a confirmed boolean;
//! a field the collector never checked (`None`) fails a required-true and a
//! required-false check alike. Absence of evidence is not evidence of
//! compliance.

use std::cmp::Ordering;

use sentinel_core::DevicePosture;

use crate::model::DeviceCondition;

/// Whether a posture claim satisfies a device condition.
///
/// `posture` is `None` when the request carried no claim and no provider
/// lookup succeeded; any populated device condition then fails to match.
pub fn device_matches(condition: &DeviceCondition, posture: Option<&DevicePosture>) -> bool {
    let Some(posture) = posture else {
        return condition.is_vacuous();
    };

    let tri_state = [
        (condition.require_mdm_enrolled, posture.mdm_enrolled),
        (condition.require_mdm_compliant, posture.mdm_compliant),
        (condition.require_disk_encryption, posture.disk_encrypted),
        (condition.require_firewall, posture.firewall_enabled),
    ];
    for (required, reported) in tri_state {
        if let Some(required) = required {
            match reported {
                Some(actual) if actual == required => {}
                _ => return false,
            }
        }
    }

    if !condition.os_types.is_empty()
        && !condition
            .os_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(&posture.os_type))
    {
        return false;
    }

    if let Some(min) = &condition.min_os_version {
        if compare_versions(&posture.os_version, min) == Ordering::Less {
            return false;
        }
    }

    true
}

/// Compare dotted version strings segment-by-segment numerically.
///
/// Missing segments count as zero, so `14.2` equals `14.2.0`. Non-numeric
/// segments compare as zero; policy validation keeps those out of conditions,
/// but posture claims are caller input.
pub fn compare_versions(left: &str, right: &str) -> Ordering {
    let seg = |s: &str, i: usize| -> u64 {
        s.split('.')
            .nth(i)
            .and_then(|p| p.parse::<u64>().ok())
            .unwrap_or(0)
    };
    let len = left.split('.').count().max(right.split('.').count());
    for i in 0..len {
        match seg(left, i).cmp(&seg(right, i)) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sentinel_core::PostureStatus;

    fn posture() -> DevicePosture {
        DevicePosture {
            device_id: "0123456789abcdef0123456789abcdef".into(),
            status: PostureStatus::Compliant,
            disk_encrypted: Some(true),
            firewall_enabled: Some(false),
            mdm_enrolled: None,
            mdm_compliant: Some(true),
            os_type: "macos".into(),
            os_version: "14.2.1".into(),
            collected_at: Utc::now(),
        }
    }

    #[test]
    fn confirmed_flags_match() {
        let condition = DeviceCondition {
            require_disk_encryption: Some(true),
            require_firewall: Some(false),
            ..DeviceCondition::default()
        };
        assert!(device_matches(&condition, Some(&posture())));
    }

    #[test]
    fn unchecked_field_fails_required_flag() {
        // mdm_enrolled is None in the claim: required-true must fail.
        let condition = DeviceCondition {
            require_mdm_enrolled: Some(true),
            ..DeviceCondition::default()
        };
        assert!(!device_matches(&condition, Some(&posture())));

        // And required-false fails too: "not checked" is not "false".
        let condition = DeviceCondition {
            require_mdm_enrolled: Some(false),
            ..DeviceCondition::default()
        };
        assert!(!device_matches(&condition, Some(&posture())));
    }

    #[test]
    fn missing_posture_fails_any_populated_condition() {
        let condition = DeviceCondition {
            require_disk_encryption: Some(true),
            ..DeviceCondition::default()
        };
        assert!(!device_matches(&condition, None));
    }

    #[test]
    fn os_type_allowlist() {
        let condition = DeviceCondition {
            os_types: vec!["macos".into(), "linux".into()],
            ..DeviceCondition::default()
        };
        assert!(device_matches(&condition, Some(&posture())));

        let condition = DeviceCondition {
            os_types: vec!["windows".into()],
            ..DeviceCondition::default()
        };
        assert!(!device_matches(&condition, Some(&posture())));
    }

    #[test]
    fn minimum_version_is_numeric_not_lexicographic() {
        let mut p = posture();
        p.os_version = "14.10".into();
        let condition = DeviceCondition {
            min_os_version: Some("14.9".into()),
            ..DeviceCondition::default()
        };
        // Lexicographic comparison would put "14.10" below "14.9".
        assert!(device_matches(&condition, Some(&p)));

        let condition = DeviceCondition {
            min_os_version: Some("15.0".into()),
            ..DeviceCondition::default()
        };
        assert!(!device_matches(&condition, Some(&p)));
    }

    #[test]
    fn version_compare_handles_uneven_lengths() {
        assert_eq!(compare_versions("14.2", "14.2.0"), Ordering::Equal);
        assert_eq!(compare_versions("14.2.1", "14.2"), Ordering::Greater);
        assert_eq!(compare_versions("13", "14.0.1"), Ordering::Less);
    }
}
