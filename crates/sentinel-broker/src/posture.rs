//! Device-posture provider capability.

use async_trait::async_trait;

use sentinel_core::DevicePosture;

/// Posture lookup failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("posture provider: {0}")]
pub struct PostureError(pub String);

/// MDM/EDR posture lookup capability.
///
/// Consulted when policy references device conditions and the request did
/// not include a collected posture. Lookup failure leaves the posture
/// absent, which fails any required-truthy device predicate; it never fails
/// the whole request.
#[async_trait]
pub trait PostureProvider: Send + Sync {
    /// Fetch the current posture for `device_id`.
    async fn get_posture(&self, device_id: &str) -> Result<DevicePosture, PostureError>;
}
