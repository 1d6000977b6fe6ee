//! Device posture claims.
//!
//! A posture is evidence collected off-box (MDM/EDR adapters) and presented
//! with a request. The broker validates the claim against policy conditions;
//! it never treats the claim as ground truth. Tri-state fields are kept as
//! `Option<bool>` deliberately: `None` means "not checked", which fails any
//! required check. Absence of evidence is not evidence of compliance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SentinelError, SentinelResult};

/// Overall compliance verdict reported by the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostureStatus {
    /// Collector reports the device compliant.
    Compliant,
    /// Collector reports the device out of compliance.
    NonCompliant,
    /// Collector could not determine compliance.
    Unknown,
}

/// Point-in-time posture claim for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicePosture {
    /// 32-char lowercase hex device identifier (128 bits).
    pub device_id: String,
    /// Collector's overall verdict.
    pub status: PostureStatus,
    /// Whether the system volume is encrypted, if checked.
    pub disk_encrypted: Option<bool>,
    /// Whether the host firewall is enabled, if checked.
    pub firewall_enabled: Option<bool>,
    /// Whether the device is MDM-enrolled, if checked.
    pub mdm_enrolled: Option<bool>,
    /// Whether MDM reports the device compliant, if checked.
    pub mdm_compliant: Option<bool>,
    /// Operating system identifier, e.g. `macos`, `windows`.
    pub os_type: String,
    /// Dotted version string, e.g. `14.2.1`.
    pub os_version: String,
    /// When the collector produced this claim.
    pub collected_at: DateTime<Utc>,
}

impl DevicePosture {
    /// Structural validation of a posture claim.
    pub fn validate(&self) -> SentinelResult<()> {
        validate_device_id(&self.device_id)
    }
}

/// Validate a device id: exactly 32 lowercase hex characters.
pub fn validate_device_id(id: &str) -> SentinelResult<()> {
    if id.len() != 32 || !id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return Err(SentinelError::input(
            "device id must be 32 lowercase hex characters",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn posture(device_id: &str) -> DevicePosture {
        DevicePosture {
            device_id: device_id.to_string(),
            status: PostureStatus::Compliant,
            disk_encrypted: Some(true),
            firewall_enabled: None,
            mdm_enrolled: Some(true),
            mdm_compliant: None,
            os_type: "macos".to_string(),
            os_version: "14.2.1".to_string(),
            collected_at: Utc::now(),
        }
    }

    #[test]
    fn device_id_format_is_enforced() {
        assert!(posture("0123456789abcdef0123456789abcdef").validate().is_ok());
        assert!(posture("0123456789ABCDEF0123456789ABCDEF").validate().is_err());
        assert!(posture("0123").validate().is_err());
    }
}
