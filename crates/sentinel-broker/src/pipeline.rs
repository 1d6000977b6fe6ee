//! The per-request decision pipeline.
//!
//! Order of operations (all denies flow through the same exit):
//! admission → identity → policy load → evaluation → approval override →
//! break-glass override → final deny gate → session handling → duration
//! capping → role assumption → session touch → audit → credentials.
//!
//! Every path that returns emits exactly one audit record and one response.
//! Credentials are never returned before their allow record is durable.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use sentinel_audit::{AuditDraft, AuditEffect};
use sentinel_core::{
    escape_for_log, validate_profile_name, ApprovalId, BreakGlassId, CallerIdentity, DenyReason,
    RequestId, SentinelError, SentinelResult, ServerSessionId,
};
use sentinel_policy::{evaluate, Effect, EvalRequest};
use sentinel_store::BreakGlassEvent;

use crate::assume::{AssumeRoleErrorCode, AssumeRoleOutput, AssumeRoleRequest};
use crate::broker::Broker;
use crate::request::{BrokerRequest, IssuedCredentials};
use crate::source_identity;

/// Budget for a policy load, including a possible retry.
const POLICY_LOAD_TIMEOUT: Duration = Duration::from_secs(5);
/// Budget for any single durable-store operation.
const STORE_TIMEOUT: Duration = Duration::from_secs(3);
/// Budget for the role-assumption call.
const ASSUMER_TIMEOUT: Duration = Duration::from_secs(10);

/// What the decision phase resolved to, before audit and response.
struct AllowOutcome {
    credentials: AssumeRoleOutput,
    source_identity: String,
    session_id: Option<ServerSessionId>,
    matched_rule: Option<String>,
    approval_id: Option<ApprovalId>,
    breakglass_id: Option<BreakGlassId>,
    granted: Duration,
    reason: String,
}

struct DenyOutcome {
    /// Reason string recorded in the audit stream.
    reason: String,
    /// Error returned to the caller.
    error: SentinelError,
    matched_rule: Option<String>,
    session_id: Option<ServerSessionId>,
}

impl DenyOutcome {
    fn denied(reason: DenyReason) -> Self {
        Self {
            reason: reason.as_str(),
            error: SentinelError::denied(reason),
            matched_rule: None,
            session_id: None,
        }
    }

    fn with_rule(mut self, rule: Option<String>) -> Self {
        self.matched_rule = rule;
        self
    }
}

impl Broker {
    /// Handle one credential request end to end.
    pub async fn handle(&self, request: BrokerRequest) -> SentinelResult<IssuedCredentials> {
        let now = self.clock.now();

        // 1. Admission. The limiter key is the presented ARN: pre-identity,
        // so abusive unparseable callers are shed here too.
        let admission = self.limiter.allow(&request.caller_arn, now).await;
        if !admission.allowed {
            return self.deny_rate_limited(&request, now, admission.retry_after).await;
        }

        // 2. Identity and input validation. Failures here are rejections of
        // malformed input, not decisions; no decision record exists yet.
        validate_profile_name(&request.profile)?;
        let caller = CallerIdentity::parse(&request.caller_arn)?;
        if let Some(posture) = &request.device_posture {
            posture.validate()?;
        }
        if let Some(device_id) = &request.device_id {
            sentinel_core::validate_device_id(device_id)?;
        }
        let request_id = RequestId::generate();

        debug!(
            request_id = %request_id,
            caller = %caller.sanitized_username,
            profile = %escape_for_log(&request.profile),
            "request admitted"
        );

        // 3–12. Decide.
        let outcome = self.decide(&request, &caller, &request_id, now).await;

        // 13. Exactly one audit record per request, on every path.
        match outcome {
            Ok(allow) => {
                let draft = AuditDraft {
                    timestamp: now,
                    caller: caller.sanitized_username.clone(),
                    profile: request.profile.clone(),
                    effect: AuditEffect::Allow,
                    matched_rule: allow.matched_rule.clone(),
                    approval_id: allow.approval_id.as_ref().map(|id| id.to_string()),
                    breakglass_id: allow.breakglass_id.as_ref().map(|id| id.to_string()),
                    session_id: allow.session_id.as_ref().map(|id| id.to_string()),
                    request_id: request_id.to_string(),
                    reason: allow.reason.clone(),
                };
                // Issuing without a durable allow record is forbidden.
                if let Err(e) = self.audit.append(draft).await {
                    error!(error = %e, "audit append failed; withholding credentials");
                    return Err(SentinelError::integrity(format!(
                        "audit append failed: {e}"
                    )));
                }
                info!(
                    request_id = %request_id,
                    caller = %caller.sanitized_username,
                    granted_secs = allow.granted.as_secs(),
                    "credentials issued"
                );
                Ok(IssuedCredentials {
                    access_key_id: allow.credentials.access_key_id,
                    secret_access_key: allow.credentials.secret_access_key,
                    session_token: allow.credentials.session_token,
                    expires_at: allow.credentials.expires_at,
                    source_identity: allow.source_identity,
                    request_id,
                    session_id: allow.session_id,
                    granted_duration: allow.granted,
                    matched_rule: allow.matched_rule,
                })
            }
            Err(deny) => {
                let draft = AuditDraft {
                    timestamp: now,
                    caller: caller.sanitized_username.clone(),
                    profile: request.profile.clone(),
                    effect: AuditEffect::Deny,
                    matched_rule: deny.matched_rule.clone(),
                    approval_id: request.approval_id.as_ref().map(|id| id.to_string()),
                    breakglass_id: None,
                    session_id: deny.session_id.as_ref().map(|id| id.to_string()),
                    request_id: request_id.to_string(),
                    reason: deny.reason.clone(),
                };
                if let Err(e) = self.audit.append(draft).await {
                    // The deny stands either way; the gap is operator-visible.
                    error!(error = %e, "audit append failed on deny path");
                }
                info!(
                    request_id = %request_id,
                    caller = %caller.sanitized_username,
                    reason = %deny.reason,
                    "request denied"
                );
                Err(deny.error)
            }
        }
    }

    async fn deny_rate_limited(
        &self,
        request: &BrokerRequest,
        now: DateTime<Utc>,
        retry_after: Duration,
    ) -> SentinelResult<IssuedCredentials> {
        // Best-effort attribution: the ARN may not even parse.
        let caller = CallerIdentity::parse(&request.caller_arn)
            .map(|c| c.sanitized_username)
            .unwrap_or_else(|_| escape_for_log(&request.caller_arn));
        let draft = AuditDraft {
            timestamp: now,
            caller,
            // Unvalidated at this point in the pipeline, so escaped.
            profile: escape_for_log(&request.profile),
            effect: AuditEffect::Deny,
            matched_rule: None,
            approval_id: None,
            breakglass_id: None,
            session_id: None,
            request_id: RequestId::generate().to_string(),
            reason: DenyReason::RateLimited.as_str(),
        };
        if let Err(e) = self.audit.append(draft).await {
            error!(error = %e, "audit append failed on rate-limit path");
        }
        Err(SentinelError::rate_limited(retry_after))
    }

    /// Steps 3–12: everything between admission and audit. Returns the
    /// decision without emitting records; `handle` owns the audit exit.
    async fn decide(
        &self,
        request: &BrokerRequest,
        caller: &CallerIdentity,
        request_id: &RequestId,
        now: DateTime<Utc>,
    ) -> Result<AllowOutcome, DenyOutcome> {
        let user = caller.sanitized_username.as_str();

        // 3. Policy load, fail-closed.
        let policy = match tokio::time::timeout(
            POLICY_LOAD_TIMEOUT,
            self.loader.load(&request.profile),
        )
        .await
        {
            Ok(Ok(policy)) => policy,
            Ok(Err(e)) => {
                warn!(error = %e, "policy load failed; denying");
                return Err(DenyOutcome {
                    reason: "policy-error".to_string(),
                    error: match e {
                        SentinelError::Integrity { .. } => e,
                        _ => SentinelError::policy("policy unavailable"),
                    },
                    matched_rule: None,
                    session_id: None,
                });
            }
            Err(_) => {
                warn!("policy load timed out; denying");
                return Err(DenyOutcome {
                    reason: "policy-error".to_string(),
                    error: SentinelError::policy("policy unavailable"),
                    matched_rule: None,
                    session_id: None,
                });
            }
        };

        // Posture: the request's claim, else a provider lookup when policy
        // has device conditions at all. Lookup failure leaves the claim
        // absent; required-truthy predicates then fail per rule.
        let looked_up = self.lookup_posture_if_needed(request, &policy).await;
        let posture = request.device_posture.as_ref().or(looked_up.as_ref());

        // 4. Evaluate.
        let decision = evaluate(
            &policy,
            &EvalRequest {
                profile: &request.profile,
                user,
                now,
                posture,
            },
        );
        debug!(
            effect = %decision.effect,
            rule = decision.matched_rule.as_deref().unwrap_or("<none>"),
            "policy evaluated"
        );

        let baseline_effect = decision.effect;
        let mut effect = decision.effect;
        let mut reason = decision.reason.clone();
        let policy_cap = decision.max_server_duration;
        let mut approval_used: Option<ApprovalId> = None;
        let mut approval_remaining: Option<Duration> = None;
        let mut breakglass_used: Option<BreakGlassId> = None;
        let mut breakglass_remaining: Option<Duration> = None;
        let mut breakglass_mfa_rejected = false;

        // 5. Approval override.
        if effect != Effect::Allow {
            if let Some(approval_id) = &request.approval_id {
                match tokio::time::timeout(
                    STORE_TIMEOUT,
                    self.approvals
                        .consume_if_approved(approval_id, user, &request.profile, now),
                )
                .await
                {
                    Ok(Ok(ticket)) => {
                        info!(approval_id = %approval_id, "approval consumed; deny lifted");
                        effect = Effect::Allow;
                        reason = "approval-consumed".to_string();
                        approval_remaining = Some(ticket.remaining(now));
                        approval_used = Some(approval_id.clone());
                    }
                    Ok(Err(e)) => {
                        debug!(approval_id = %approval_id, error = %e, "approval not applied");
                    }
                    Err(_) => {
                        warn!(approval_id = %approval_id, "approval store timed out");
                    }
                }
            }
        }

        // 6. Break-glass override.
        if effect != Effect::Allow {
            match tokio::time::timeout(
                STORE_TIMEOUT,
                self.breakglass.find_active(user, &request.profile, now),
            )
            .await
            {
                Ok(Ok(Some(event))) => {
                    if self.breakglass_mfa_ok(&event) {
                        info!(breakglass_id = %event.id, "break-glass active; deny lifted");
                        effect = Effect::Allow;
                        reason = "breakglass-active".to_string();
                        breakglass_remaining = Some(event.remaining_duration(now));
                        breakglass_used = Some(event.id.clone());
                    } else {
                        warn!(breakglass_id = %event.id, "break-glass event fails MFA policy");
                        breakglass_mfa_rejected = true;
                    }
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    // Override channel error: the baseline decision stands.
                    warn!(error = %e, "break-glass store failed; baseline stands");
                }
                Err(_) => {
                    warn!("break-glass store timed out; baseline stands");
                }
            }
        }

        // 7. Final deny gate.
        if effect != Effect::Allow {
            let deny_reason = if baseline_effect == Effect::RequireApproval
                || request.approval_id.is_some()
            {
                DenyReason::ApprovalNotFound
            } else if breakglass_mfa_rejected {
                DenyReason::BreakGlassNotValid
            } else if let Some(rule) = &decision.matched_rule {
                DenyReason::RuleDeny { rule: rule.clone() }
            } else {
                DenyReason::DefaultDeny
            };
            return Err(DenyOutcome::denied(deny_reason).with_rule(decision.matched_rule));
        }

        // 10 (moved before session creation, which needs the final figure).
        // Duration capping: the minimum across everything with an opinion.
        let mut granted = self.config.default_session_duration;
        for cap in [
            request.session_duration,
            policy_cap,
            approval_remaining,
            breakglass_remaining,
        ]
        .into_iter()
        .flatten()
        {
            granted = granted.min(cap);
        }
        if granted.is_zero() {
            return Err(
                DenyOutcome::denied(DenyReason::DurationZero).with_rule(decision.matched_rule)
            );
        }

        // 8–9. Session handling and revocation, server mode only.
        let (source_identity, session_id) = match self
            .resolve_session(request, caller, request_id, now, granted)
            .await
        {
            Ok(pair) => pair,
            Err(deny) => return Err(*deny),
        };

        // 11. Assume the role.
        let role_arn = match self.resolver.role_arn(&request.profile).await {
            Some(arn) => arn,
            None => {
                error!(
                    profile = %escape_for_log(&request.profile),
                    "no role mapping for allowed profile"
                );
                return Err(DenyOutcome {
                    reason: "config-error".to_string(),
                    error: SentinelError::configuration("profile has no role mapping"),
                    matched_rule: decision.matched_rule,
                    session_id,
                });
            }
        };

        let mut session_tags = BTreeMap::new();
        if let Some(id) = &session_id {
            session_tags.insert("sentinel:session_id".to_string(), id.to_string());
        }
        if let Some(posture) = posture {
            session_tags.insert("sentinel:device_id".to_string(), posture.device_id.clone());
        }

        let assume_request = AssumeRoleRequest {
            role_arn,
            session_name: source_identity.clone(),
            duration: granted,
            session_tags,
            mfa: request.mfa.clone(),
        };
        let credentials =
            match tokio::time::timeout(ASSUMER_TIMEOUT, self.assumer.assume_role(assume_request))
                .await
            {
                Ok(Ok(credentials)) => credentials,
                Ok(Err(e)) => {
                    warn!(code = ?e.code, "role assumption failed");
                    let error = match e.code {
                        AssumeRoleErrorCode::Throttled | AssumeRoleErrorCode::Transient => {
                            SentinelError::transient(format!("role assumption failed: {e}"))
                        }
                        AssumeRoleErrorCode::AccessDenied
                        | AssumeRoleErrorCode::InvalidDuration
                        | AssumeRoleErrorCode::Other => {
                            SentinelError::policy(format!("role assumption refused ({:?})", e.code))
                        }
                    };
                    return Err(DenyOutcome {
                        reason: "assume-role-failed".to_string(),
                        error,
                        matched_rule: decision.matched_rule,
                        session_id,
                    });
                }
                Err(_) => {
                    return Err(DenyOutcome {
                        reason: "assume-role-failed".to_string(),
                        error: SentinelError::transient("role assumption timed out"),
                        matched_rule: decision.matched_rule,
                        session_id,
                    });
                }
            };

        // 12. Touch the session; bookkeeping only, the grant already stands.
        if let (Some(sessions), Some(id)) = (&self.sessions, &session_id) {
            match tokio::time::timeout(STORE_TIMEOUT, sessions.touch(id, now)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(session_id = %id, error = %e, "session touch failed"),
                Err(_) => warn!(session_id = %id, "session touch timed out"),
            }
        }

        Ok(AllowOutcome {
            credentials,
            source_identity,
            session_id,
            matched_rule: decision.matched_rule,
            approval_id: approval_used,
            breakglass_id: breakglass_used,
            granted,
            reason,
        })
    }

    /// Server-mode session resolution: reuse (with a revocation check) or
    /// create. Returns the source identity to stamp and the session id.
    async fn resolve_session(
        &self,
        request: &BrokerRequest,
        caller: &CallerIdentity,
        request_id: &RequestId,
        now: DateTime<Utc>,
        granted: Duration,
    ) -> Result<(String, Option<ServerSessionId>), Box<DenyOutcome>> {
        let user = caller.sanitized_username.as_str();
        let Some(sessions) = &self.sessions else {
            // CLI mode: stamp and go, nothing to track.
            let identity = source_identity::stamp(user, request_id).map_err(|e| {
                Box::new(DenyOutcome {
                    reason: "config-error".to_string(),
                    error: e,
                    matched_rule: None,
                    session_id: None,
                })
            })?;
            return Ok((identity, None));
        };

        if let Some(session_id) = &request.session_id {
            // Reuse: revocation is fail-closed on a revoked record,
            // fail-open on store trouble.
            match tokio::time::timeout(STORE_TIMEOUT, sessions.check_revocation(session_id)).await
            {
                Ok(Ok(true)) => {
                    info!(session_id = %session_id, "revoked session refused");
                    let mut deny = DenyOutcome::denied(DenyReason::Revoked);
                    deny.session_id = Some(session_id.clone());
                    return Err(Box::new(deny));
                }
                Ok(Ok(false)) => {}
                Ok(Err(e)) => {
                    warn!(session_id = %session_id, error = %e, "revocation check failed; failing open");
                }
                Err(_) => {
                    warn!(session_id = %session_id, "revocation check timed out; failing open");
                }
            }
            // Keep the session's original stamp when we can read it.
            let identity = match tokio::time::timeout(STORE_TIMEOUT, sessions.get(session_id)).await
            {
                Ok(Ok(session)) => session.source_identity,
                _ => source_identity::stamp(user, request_id).map_err(|e| {
                    Box::new(DenyOutcome {
                        reason: "config-error".to_string(),
                        error: e,
                        matched_rule: None,
                        session_id: Some(session_id.clone()),
                    })
                })?,
            };
            return Ok((identity, Some(session_id.clone())));
        }

        // New session. Creation failure is fail-closed: in server mode an
        // untracked credential would be irrevocable.
        let identity = source_identity::stamp(user, request_id).map_err(|e| {
            Box::new(DenyOutcome {
                reason: "config-error".to_string(),
                error: e,
                matched_rule: None,
                session_id: None,
            })
        })?;
        let new_session = sentinel_store::NewSession {
            user: user.to_string(),
            profile: request.profile.clone(),
            source_identity: identity.clone(),
            device_id: request
                .device_posture
                .as_ref()
                .map(|p| p.device_id.clone())
                .or_else(|| request.device_id.clone()),
            duration: granted,
        };
        match tokio::time::timeout(STORE_TIMEOUT, sessions.create(new_session)).await {
            Ok(Ok(session)) => Ok((identity, Some(session.id))),
            Ok(Err(e)) => {
                warn!(error = %e, "session create failed; denying");
                Err(Box::new(DenyOutcome {
                    reason: "session-error".to_string(),
                    error: SentinelError::transient("session store unavailable"),
                    matched_rule: None,
                    session_id: None,
                }))
            }
            Err(_) => Err(Box::new(DenyOutcome {
                reason: "session-error".to_string(),
                error: SentinelError::transient("session store timed out"),
                matched_rule: None,
                session_id: None,
            })),
        }
    }

    /// Whether a break-glass event satisfies the MFA policy at use time.
    fn breakglass_mfa_ok(&self, event: &BreakGlassEvent) -> bool {
        if !self.config.breakglass.require_mfa {
            return true;
        }
        if !event.mfa_verified {
            return false;
        }
        match &event.mfa_method {
            Some(method) => self
                .config
                .breakglass
                .allowed_mfa_methods
                .iter()
                .any(|m| m.eq_ignore_ascii_case(method)),
            None => false,
        }
    }

    /// Provider posture lookup, only when the request carries no claim and
    /// some rule actually references device conditions.
    async fn lookup_posture_if_needed(
        &self,
        request: &BrokerRequest,
        policy: &sentinel_policy::Policy,
    ) -> Option<sentinel_core::DevicePosture> {
        if request.device_posture.is_some() {
            return None;
        }
        let references_device = policy.rules.iter().any(|r| r.condition.device.is_some());
        if !references_device {
            return None;
        }
        let provider = self.posture.as_ref()?;
        let device_id = request.device_id.as_ref()?;
        match tokio::time::timeout(STORE_TIMEOUT, provider.get_posture(device_id)).await {
            Ok(Ok(posture)) => Some(posture),
            Ok(Err(e)) => {
                warn!(error = %e, "posture lookup failed; treating as uncollected");
                None
            }
            Err(_) => {
                warn!("posture lookup timed out; treating as uncollected");
                None
            }
        }
    }
}
