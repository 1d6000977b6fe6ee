//! # Sentinel Store
//!
//! Durable state machines backing the broker's three override/augmentation
//! channels: approval tickets, break-glass events, and server-mode sessions.
//!
//! Each channel is a capability trait plus an in-memory implementation. The
//! memory backends mirror the conditional-write discipline of a remote
//! tabular store (read, transition, version-checked commit), so invariants
//! like at-most-once consumption and single-active-event hold under the same
//! contention a production backend sees.

pub mod approval;
pub mod breakglass;
pub mod session;
pub mod sweeper;

pub use approval::{
    ApprovalError, ApprovalRequest, ApprovalStatus, ApprovalStore, MemoryApprovalStore,
    NewApproval,
};
pub use breakglass::{
    BreakGlassError, BreakGlassEvent, BreakGlassInvocation, BreakGlassStatus, BreakGlassStore,
    MemoryBreakGlassStore,
};
pub use session::{
    MemorySessionStore, NewSession, ServerSession, SessionError, SessionStatus, SessionStore,
};
pub use sweeper::ExpirySweeper;
