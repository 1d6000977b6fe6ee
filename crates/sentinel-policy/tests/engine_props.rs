//! Property tests for the evaluation engine's core invariants.

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use sentinel_policy::{evaluate, Condition, Effect, EvalRequest, Policy, Rule};

fn arb_effect() -> impl Strategy<Value = Effect> {
    prop_oneof![
        Just(Effect::Allow),
        Just(Effect::Deny),
        Just(Effect::RequireApproval),
    ]
}

fn arb_rule() -> impl Strategy<Value = Rule> {
    (
        "[a-z][a-z0-9-]{0,12}",
        arb_effect(),
        proptest::collection::vec("[a-z]{1,8}", 0..3),
        proptest::collection::vec("[a-z]{1,8}", 0..3),
        proptest::option::of(0u64..7200),
    )
        .prop_map(|(name, effect, users, profiles, max)| Rule {
            name,
            effect,
            description: None,
            condition: Condition {
                users,
                profiles,
                time: None,
                device: None,
            },
            max_server_duration: max,
        })
}

fn arb_policy() -> impl Strategy<Value = Policy> {
    proptest::collection::vec(arb_rule(), 0..8).prop_map(|mut rules| {
        // Unique names so lookups by matched_rule are unambiguous.
        for (i, rule) in rules.iter_mut().enumerate() {
            rule.name = format!("{}-{i}", rule.name);
        }
        Policy {
            version: "1".into(),
            rules,
        }
    })
}

proptest! {
    /// The engine never allows without naming the allow rule that fired.
    #[test]
    fn allow_always_names_a_rule(
        policy in arb_policy(),
        user in "[a-z]{1,8}",
        profile in "[a-z]{1,8}",
    ) {
        let request = EvalRequest {
            profile: &profile,
            user: &user,
            now: Utc.with_ymd_and_hms(2026, 1, 27, 12, 0, 0).unwrap(),
            posture: None,
        };
        let decision = evaluate(&policy, &request);
        if decision.effect == Effect::Allow {
            let name = decision.matched_rule.expect("allow without matched rule");
            let rule = policy
                .rules
                .iter()
                .find(|r| r.name == name)
                .expect("matched rule not in policy");
            prop_assert_eq!(rule.effect, Effect::Allow);
        }
    }

    /// Evaluation is a pure function: same inputs, same decision.
    #[test]
    fn evaluation_is_pure(
        policy in arb_policy(),
        user in "[a-z]{1,8}",
        profile in "[a-z]{1,8}",
    ) {
        let request = EvalRequest {
            profile: &profile,
            user: &user,
            now: Utc.with_ymd_and_hms(2026, 1, 27, 12, 0, 0).unwrap(),
            posture: None,
        };
        let first = evaluate(&policy, &request);
        prop_assert_eq!(evaluate(&policy, &request), first);
    }

    /// The decided rule is the first whose condition matches: every earlier
    /// rule fails to match the request.
    #[test]
    fn no_earlier_rule_matches(
        policy in arb_policy(),
        user in "[a-z]{1,8}",
        profile in "[a-z]{1,8}",
    ) {
        let request = EvalRequest {
            profile: &profile,
            user: &user,
            now: Utc.with_ymd_and_hms(2026, 1, 27, 12, 0, 0).unwrap(),
            posture: None,
        };
        let decision = evaluate(&policy, &request);
        if let Some(name) = &decision.matched_rule {
            for rule in &policy.rules {
                if &rule.name == name {
                    break;
                }
                let user_ok = rule.condition.users.is_empty()
                    || rule.condition.users.iter().any(|u| u == &user);
                let profile_ok = rule.condition.profiles.is_empty()
                    || rule.condition.profiles.iter().any(|p| p == &profile);
                prop_assert!(!(user_ok && profile_ok));
            }
        }
    }
}
