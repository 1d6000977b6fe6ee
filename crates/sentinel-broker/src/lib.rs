//! # Sentinel Broker
//!
//! The coordination core of Sentinel: a policy-enforced credential broker.
//! Each request is admitted through a rate limiter, attributed to a parsed
//! caller identity, decided against a signed policy, optionally lifted by an
//! approval ticket or break-glass event, capped in duration, executed
//! through the role assumer, and recorded in the HMAC-chained audit stream.
//! Exactly one audit record and one response per request.
//!
//! All external dependencies (policy store, signature verifier, durable
//! stores, role assumer, posture provider, audit sink) are capabilities
//! handed to [`Broker::builder`] at startup. The broker itself holds no
//! globals and performs no hidden I/O.

pub mod assume;
pub mod broker;
pub mod pipeline;
pub mod posture;
pub mod request;
pub mod source_identity;

pub use assume::{
    AssumeRoleError, AssumeRoleErrorCode, AssumeRoleOutput, AssumeRoleRequest, MapProfileResolver,
    ProfileResolver, RoleAssumer,
};
pub use broker::{Broker, BrokerBuilder};
pub use posture::{PostureError, PostureProvider};
pub use request::{BrokerRequest, IssuedCredentials};
pub use source_identity::{stamp, validate as validate_source_identity, MAX_SOURCE_IDENTITY_LEN};
