//! Policy schema types.
//!
//! A policy is an ordered list of rules; order is significant because
//! evaluation is first-match-wins. The serde shapes here are the YAML
//! document format, kept round-trip stable: parse, serialize, parse again
//! yields the same policy.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A complete policy document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Schema version string, e.g. `"1"`. Required.
    #[serde(default)]
    pub version: String,
    /// Ordered rules; the first match decides.
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// A single policy rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Rule name; echoed in decisions, so it must be display-safe.
    #[serde(default)]
    pub name: String,
    /// What a match means.
    pub effect: Effect,
    /// Free-form operator note, never surfaced to callers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// When this rule applies.
    #[serde(default)]
    pub condition: Condition,
    /// Cap on granted session duration in seconds. `0` means no cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_server_duration: Option<u64>,
}

impl Rule {
    /// The duration cap this rule imposes, if any. A stored `0` means
    /// "no cap" and reads back as `None`.
    pub fn duration_cap_secs(&self) -> Option<u64> {
        match self.max_server_duration {
            None | Some(0) => None,
            Some(secs) => Some(secs),
        }
    }
}

/// Effect of a matching rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    /// Permit the request, subject to duration caps.
    Allow,
    /// Refuse the request; final for the engine.
    Deny,
    /// Refuse at engine level; the broker may promote with a consumed
    /// approval ticket.
    RequireApproval,
}

impl Effect {
    /// Wire representation of the effect.
    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::Allow => "allow",
            Effect::Deny => "deny",
            Effect::RequireApproval => "require_approval",
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rule condition. Populated sub-predicates are AND-ed; a condition with no
/// populated sub-predicate is rejected at validation time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    /// Exact-match profile set; empty means any profile.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub profiles: Vec<String>,
    /// Exact-match (sanitized) username set; empty means any user.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<String>,
    /// Time-of-week window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<TimeWindow>,
    /// Device posture requirements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceCondition>,
}

impl Condition {
    /// Whether no sub-predicate is populated.
    pub fn is_vacuous(&self) -> bool {
        self.profiles.is_empty()
            && self.users.is_empty()
            && self.time.is_none()
            && self.device.as_ref().map_or(true, DeviceCondition::is_vacuous)
    }
}

/// Day-of-week names accepted in time windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    /// Monday.
    #[serde(alias = "monday")]
    Mon,
    /// Tuesday.
    #[serde(alias = "tuesday")]
    Tue,
    /// Wednesday.
    #[serde(alias = "wednesday")]
    Wed,
    /// Thursday.
    #[serde(alias = "thursday")]
    Thu,
    /// Friday.
    #[serde(alias = "friday")]
    Fri,
    /// Saturday.
    #[serde(alias = "saturday")]
    Sat,
    /// Sunday.
    #[serde(alias = "sunday")]
    Sun,
}

impl From<chrono::Weekday> for Weekday {
    fn from(day: chrono::Weekday) -> Self {
        match day {
            chrono::Weekday::Mon => Weekday::Mon,
            chrono::Weekday::Tue => Weekday::Tue,
            chrono::Weekday::Wed => Weekday::Wed,
            chrono::Weekday::Thu => Weekday::Thu,
            chrono::Weekday::Fri => Weekday::Fri,
            chrono::Weekday::Sat => Weekday::Sat,
            chrono::Weekday::Sun => Weekday::Sun,
        }
    }
}

/// Inclusive-start, exclusive-end clock range in `HH:MM` form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourRange {
    /// Start of the range, `HH:MM`, 24-hour.
    pub start: String,
    /// End of the range, `HH:MM`, 24-hour. A value below `start` wraps the
    /// range through midnight.
    pub end: String,
}

/// Time-of-week window evaluated in a named IANA zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Days on which the window is open; empty means every day.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub weekdays: Vec<Weekday>,
    /// Clock range within each open day; absent means the whole day.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours: Option<HourRange>,
    /// IANA zone the window is expressed in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Device posture requirements. Each boolean check is tri-state: absent
/// (don't care), required-true, or required-false. A required check against
/// a posture field that was never collected fails the match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCondition {
    /// Require (or forbid) MDM enrollment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_mdm_enrolled: Option<bool>,
    /// Require (or forbid) MDM compliance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_mdm_compliant: Option<bool>,
    /// Require (or forbid) disk encryption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_disk_encryption: Option<bool>,
    /// Require (or forbid) the host firewall.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_firewall: Option<bool>,
    /// Allow-list of OS identifiers; empty means any OS.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub os_types: Vec<String>,
    /// Minimum OS version, compared segment-by-segment numerically.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_os_version: Option<String>,
}

impl DeviceCondition {
    /// Whether no check is populated.
    pub fn is_vacuous(&self) -> bool {
        self.require_mdm_enrolled.is_none()
            && self.require_mdm_compliant.is_none()
            && self.require_disk_encryption.is_none()
            && self.require_firewall.is_none()
            && self.os_types.is_empty()
            && self.min_os_version.is_none()
    }
}
