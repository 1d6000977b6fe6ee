//! # Sentinel Policy
//!
//! The declarative policy layer of the Sentinel credential broker: schema
//! types and YAML parsing, total validation, the pure first-match evaluation
//! engine, and the signed-policy loader with its TTL cache.
//!
//! Evaluation is deliberately free of I/O; everything that touches the
//! network (fetching, signature verification) lives behind the capability
//! traits in [`loader`].

pub mod device;
pub mod engine;
pub mod loader;
pub mod model;
pub mod parse;
pub mod validate;
pub mod window;

pub use device::{compare_versions, device_matches};
pub use engine::{evaluate, Decision, EvalRequest};
pub use loader::{
    CacheStats, Ed25519Verifier, FetchError, LoaderConfig, PolicyLoader, PolicySource,
    SignatureVerifier, VerifyError,
};
pub use model::{
    Condition, DeviceCondition, Effect, HourRange, Policy, Rule, TimeWindow, Weekday,
};
pub use parse::{parse, parse_and_validate, to_yaml};
pub use validate::{validate, PolicyValidationError};
pub use window::window_matches;
