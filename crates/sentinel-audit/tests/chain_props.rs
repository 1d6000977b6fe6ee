//! Property tests for the audit chain: any single-field tamper anywhere in
//! the stream must break verification.

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use sentinel_audit::{verify_stream, AuditDraft, AuditEffect, AuditSink, MemoryAuditLog};

const KEY: &[u8] = b"prop-test-audit-key-32-bytes!!!!";

fn build_stream(callers: Vec<String>) -> Vec<sentinel_audit::AuditRecord> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime");
    rt.block_on(async move {
        let log = MemoryAuditLog::new(KEY.to_vec());
        for (i, caller) in callers.iter().enumerate() {
            log.append(AuditDraft {
                timestamp: Utc.with_ymd_and_hms(2026, 1, 27, 12, 0, 0).unwrap(),
                caller: caller.clone(),
                profile: "prod".into(),
                effect: if i % 2 == 0 {
                    AuditEffect::Allow
                } else {
                    AuditEffect::Deny
                },
                matched_rule: None,
                approval_id: None,
                breakglass_id: None,
                session_id: None,
                request_id: format!("req{i:012}"),
                reason: "default-deny".into(),
            })
            .await
            .expect("append");
        }
        log.records().await
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// An untouched stream always verifies.
    #[test]
    fn intact_streams_verify(callers in proptest::collection::vec("[a-z]{1,10}", 1..12)) {
        let records = build_stream(callers);
        prop_assert!(verify_stream(KEY, &records).is_ok());
    }

    /// Tampering with any record's caller, reason, or effect breaks the chain.
    #[test]
    fn any_tamper_is_detected(
        callers in proptest::collection::vec("[a-z]{1,10}", 1..12),
        victim in 0usize..12,
        field in 0u8..3,
    ) {
        let mut records = build_stream(callers);
        let victim = victim % records.len();
        match field {
            0 => records[victim].caller.push('x'),
            1 => records[victim].reason = "rule-allow: forged".into(),
            _ => {
                records[victim].effect = match records[victim].effect {
                    AuditEffect::Allow => AuditEffect::Deny,
                    AuditEffect::Deny => AuditEffect::Allow,
                };
            }
        }
        prop_assert!(verify_stream(KEY, &records).is_err());
    }
}
