//! Broker construction.
//!
//! Every external dependency is a capability handed over here, once, at
//! startup; request handlers share the broker by reference and there is no
//! other process-wide state. Construction validates configuration and
//! refuses to produce a broker that could fail open later.

use std::sync::Arc;

use sentinel_audit::AuditSink;
use sentinel_core::{BrokerConfig, Clock, SentinelError, SentinelResult, SystemClock};
use sentinel_limiter::RateLimiter;
use sentinel_policy::PolicyLoader;
use sentinel_store::{ApprovalStore, BreakGlassStore, SessionStore};

use crate::assume::{ProfileResolver, RoleAssumer};
use crate::posture::PostureProvider;

/// The credential broker.
///
/// Cheap to share: handlers take `&Broker` (or clone an `Arc<Broker>`) and
/// call [`handle`](Broker::handle) concurrently.
pub struct Broker {
    pub(crate) config: BrokerConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) limiter: Arc<dyn RateLimiter>,
    pub(crate) loader: Arc<PolicyLoader>,
    pub(crate) approvals: Arc<dyn ApprovalStore>,
    pub(crate) breakglass: Arc<dyn BreakGlassStore>,
    pub(crate) sessions: Option<Arc<dyn SessionStore>>,
    pub(crate) assumer: Arc<dyn RoleAssumer>,
    pub(crate) resolver: Arc<dyn ProfileResolver>,
    pub(crate) posture: Option<Arc<dyn PostureProvider>>,
    pub(crate) audit: Arc<dyn AuditSink>,
}

impl Broker {
    /// Start assembling a broker.
    pub fn builder(config: BrokerConfig) -> BrokerBuilder {
        BrokerBuilder {
            config,
            clock: None,
            limiter: None,
            loader: None,
            approvals: None,
            breakglass: None,
            sessions: None,
            assumer: None,
            resolver: None,
            posture: None,
            audit: None,
        }
    }

    /// The configuration the broker runs with.
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }
}

/// Assembles a [`Broker`], validating the result.
pub struct BrokerBuilder {
    config: BrokerConfig,
    clock: Option<Arc<dyn Clock>>,
    limiter: Option<Arc<dyn RateLimiter>>,
    loader: Option<Arc<PolicyLoader>>,
    approvals: Option<Arc<dyn ApprovalStore>>,
    breakglass: Option<Arc<dyn BreakGlassStore>>,
    sessions: Option<Arc<dyn SessionStore>>,
    assumer: Option<Arc<dyn RoleAssumer>>,
    resolver: Option<Arc<dyn ProfileResolver>>,
    posture: Option<Arc<dyn PostureProvider>>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl BrokerBuilder {
    /// Clock capability; wall clock by default.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Admission rate limiter.
    pub fn limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Signed-policy loader.
    pub fn loader(mut self, loader: Arc<PolicyLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Approval store.
    pub fn approvals(mut self, approvals: Arc<dyn ApprovalStore>) -> Self {
        self.approvals = Some(approvals);
        self
    }

    /// Break-glass store.
    pub fn breakglass(mut self, breakglass: Arc<dyn BreakGlassStore>) -> Self {
        self.breakglass = Some(breakglass);
        self
    }

    /// Session store; required in server mode.
    pub fn sessions(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Role assumer.
    pub fn assumer(mut self, assumer: Arc<dyn RoleAssumer>) -> Self {
        self.assumer = Some(assumer);
        self
    }

    /// Profile → role resolution.
    pub fn resolver(mut self, resolver: Arc<dyn ProfileResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Optional posture provider for device-condition lookups.
    pub fn posture(mut self, posture: Arc<dyn PostureProvider>) -> Self {
        self.posture = Some(posture);
        self
    }

    /// Audit sink.
    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Validate configuration and wiring, producing the broker.
    pub fn build(self) -> SentinelResult<Broker> {
        self.config.validate()?;

        let require = |name: &str| SentinelError::configuration(format!("{name} is required"));
        let limiter = self.limiter.ok_or_else(|| require("rate limiter"))?;
        let loader = self.loader.ok_or_else(|| require("policy loader"))?;
        let approvals = self.approvals.ok_or_else(|| require("approval store"))?;
        let breakglass = self.breakglass.ok_or_else(|| require("break-glass store"))?;
        let assumer = self.assumer.ok_or_else(|| require("role assumer"))?;
        let resolver = self.resolver.ok_or_else(|| require("profile resolver"))?;
        let audit = self.audit.ok_or_else(|| require("audit sink"))?;

        if self.config.server_mode() && self.sessions.is_none() {
            return Err(SentinelError::configuration(
                "server mode requires a session store",
            ));
        }

        Ok(Broker {
            config: self.config,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            limiter,
            loader,
            approvals,
            breakglass,
            sessions: self.sessions,
            assumer,
            resolver,
            posture: self.posture,
            audit,
        })
    }
}
