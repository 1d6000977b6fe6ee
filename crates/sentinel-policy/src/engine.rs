//! First-match policy evaluation.
//!
//! `evaluate` is a pure function of (policy, request, now): it performs no
//! I/O, consults no ambient clock, and holds no state. Rules are scanned
//! top-down; the first whose condition matches decides. No match is a deny.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sentinel_core::DevicePosture;

use crate::device::device_matches;
use crate::model::{Condition, Effect, Policy};
use crate::window::window_matches;

/// Inputs the engine evaluates a policy against.
#[derive(Debug, Clone, Copy)]
pub struct EvalRequest<'a> {
    /// Requested profile name (already validated).
    pub profile: &'a str,
    /// Sanitized caller username.
    pub user: &'a str,
    /// Evaluation instant.
    pub now: DateTime<Utc>,
    /// Posture claim accompanying the request, if any.
    pub posture: Option<&'a DevicePosture>,
}

/// Outcome of evaluating one request against one policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// The decided effect.
    pub effect: Effect,
    /// Name of the rule that fired, absent on default-deny.
    pub matched_rule: Option<String>,
    /// Duration cap imposed by the matching rule.
    pub max_server_duration: Option<Duration>,
    /// Human-readable reason. Rule names are display-safe by validation.
    pub reason: String,
}

impl Decision {
    fn default_deny() -> Self {
        Self {
            effect: Effect::Deny,
            matched_rule: None,
            max_server_duration: None,
            reason: "default-deny: no matching rule".to_string(),
        }
    }
}

/// Evaluate `request` against `policy`, first match wins.
pub fn evaluate(policy: &Policy, request: &EvalRequest<'_>) -> Decision {
    for rule in &policy.rules {
        if !condition_matches(&rule.condition, request) {
            continue;
        }
        let reason = match rule.effect {
            Effect::Allow => format!("rule-allow: {}", rule.name),
            Effect::Deny => format!("rule-deny: {}", rule.name),
            Effect::RequireApproval => format!("approval-required: {}", rule.name),
        };
        return Decision {
            effect: rule.effect,
            matched_rule: Some(rule.name.clone()),
            max_server_duration: rule.duration_cap_secs().map(Duration::from_secs),
            reason,
        };
    }
    Decision::default_deny()
}

/// Whether every populated sub-predicate of `condition` matches.
fn condition_matches(condition: &Condition, request: &EvalRequest<'_>) -> bool {
    if !condition.profiles.is_empty()
        && !condition.profiles.iter().any(|p| p == request.profile)
    {
        return false;
    }
    if !condition.users.is_empty() && !condition.users.iter().any(|u| u == request.user) {
        return false;
    }
    if let Some(window) = &condition.time {
        if !window_matches(window, request.now) {
            return false;
        }
    }
    if let Some(device) = &condition.device {
        if !device_matches(device, request.posture) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeviceCondition, HourRange, Rule, TimeWindow, Weekday};
    use chrono::TimeZone;

    fn rule(name: &str, effect: Effect, condition: Condition) -> Rule {
        Rule {
            name: name.into(),
            effect,
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

    fn request<'a>(profile: &'a str, user: &'a str) -> EvalRequest<'a> {
        EvalRequest {
            profile,
            user,
            now: Utc.with_ymd_and_hms(2026, 1, 27, 19, 0, 0).unwrap(),
            posture: None,
        }
    }

    fn users(names: &[&str]) -> Condition {
        Condition {
            users: names.iter().map(|n| n.to_string()).collect(),
            ..Condition::default()
        }
    }

    #[test]
    fn empty_policy_is_default_deny() {
        let decision = evaluate(&policy(vec![]), &request("prod", "bob"));
        assert_eq!(decision.effect, Effect::Deny);
        assert_eq!(decision.matched_rule, None);
        assert_eq!(decision.reason, "default-deny: no matching rule");
    }

    #[test]
    fn no_matching_rule_is_default_deny() {
        let p = policy(vec![rule("only-alice", Effect::Allow, users(&["alice"]))]);
        let decision = evaluate(&p, &request("prod", "bob"));
        assert_eq!(decision.effect, Effect::Deny);
        assert_eq!(decision.matched_rule, None);
    }

    #[test]
    fn first_match_wins_over_later_rules() {
        let p = policy(vec![
            rule("deny-first", Effect::Deny, users(&["alice"])),
            rule("allow-later", Effect::Allow, users(&["alice"])),
        ]);
        let decision = evaluate(&p, &request("prod", "alice"));
        assert_eq!(decision.effect, Effect::Deny);
        assert_eq!(decision.matched_rule.as_deref(), Some("deny-first"));
        assert_eq!(decision.reason, "rule-deny: deny-first");
    }

    #[test]
    fn scenario_allow_within_weekday_window() {
        // Rule dev-hours: alice on staging, Mon–Fri 09:00–18:00 New York.
        let condition = Condition {
            users: vec!["alice".into()],
            profiles: vec!["staging".into()],
            time: Some(TimeWindow {
                weekdays: vec![
                    Weekday::Mon,
                    Weekday::Tue,
                    Weekday::Wed,
                    Weekday::Thu,
                    Weekday::Fri,
                ],
                hours: Some(HourRange {
                    start: "09:00".into(),
                    end: "18:00".into(),
                }),
                timezone: "America/New_York".into(),
            }),
            ..Condition::default()
        };
        let mut allow = rule("dev-hours", Effect::Allow, condition);
        allow.max_server_duration = Some(900);
        let p = policy(vec![allow]);

        // 2026-01-27T14:00:00-05:00.
        let now = Utc.with_ymd_and_hms(2026, 1, 27, 19, 0, 0).unwrap();
        let req = EvalRequest {
            profile: "staging",
            user: "alice",
            now,
            posture: None,
        };
        let decision = evaluate(&p, &req);
        assert_eq!(decision.effect, Effect::Allow);
        assert_eq!(decision.matched_rule.as_deref(), Some("dev-hours"));
        assert_eq!(
            decision.max_server_duration,
            Some(Duration::from_secs(900))
        );

        // Same request outside the window: default deny.
        let late = Utc.with_ymd_and_hms(2026, 1, 28, 2, 0, 0).unwrap();
        let decision = evaluate(
            &p,
            &EvalRequest {
                now: late,
                ..req
            },
        );
        assert_eq!(decision.effect, Effect::Deny);
        assert_eq!(decision.matched_rule, None);
    }

    #[test]
    fn require_approval_is_surfaced_not_allowed() {
        let p = policy(vec![rule(
            "gated-prod",
            Effect::RequireApproval,
            Condition {
                profiles: vec!["prod".into()],
                ..Condition::default()
            },
        )]);
        let decision = evaluate(&p, &request("prod", "carol"));
        assert_eq!(decision.effect, Effect::RequireApproval);
        assert_eq!(decision.matched_rule.as_deref(), Some("gated-prod"));
    }

    #[test]
    fn device_rule_without_posture_falls_through() {
        let device_rule = rule(
            "encrypted-only",
            Effect::Allow,
            Condition {
                device: Some(DeviceCondition {
                    require_disk_encryption: Some(true),
                    ..DeviceCondition::default()
                }),
                ..Condition::default()
            },
        );
        let catch_all = rule("deny-rest", Effect::Deny, users(&["alice"]));
        let p = policy(vec![device_rule, catch_all]);

        // No posture: the device rule does not match, the next rule fires.
        let decision = evaluate(&p, &request("prod", "alice"));
        assert_eq!(decision.effect, Effect::Deny);
        assert_eq!(decision.matched_rule.as_deref(), Some("deny-rest"));
    }

    #[test]
    fn evaluation_is_deterministic() {
        let p = policy(vec![rule("r", Effect::Allow, users(&["alice"]))]);
        let req = request("prod", "alice");
        let first = evaluate(&p, &req);
        for _ in 0..10 {
            assert_eq!(evaluate(&p, &req), first);
        }
    }
}
