//! # Sentinel Audit
//!
//! Tamper-evident decision logging. Every broker decision becomes one
//! [`AuditRecord`] in an HMAC-SHA256 chain: each record's MAC covers the
//! previous record's MAC, so any alteration, insertion, deletion, or
//! reordering is detectable by replaying the stream. The audit key is a
//! symmetric secret held only by the broker instance; rotating it starts a
//! new stream.

pub mod chain;
pub mod record;
pub mod sink;

pub use chain::{compute_hmac, verify_stream, verify_tail, ChainError, GENESIS_PREV_HMAC};
pub use record::{AuditDraft, AuditEffect, AuditRecord};
pub use sink::{AuditError, AuditSink, MemoryAuditLog};
