//! # PlatformEngine Status
//!
//! Status types for the aggregated health of the managing resource.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of the PlatformEngine resource
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlatformEngineStatus {
    /// Coarse lifecycle summary
    #[serde(default)]
    pub phase: Option<Phase>,
    /// Health of every tracked component
    #[serde(default)]
    pub components: Vec<ComponentCondition>,
    /// Top-level conditions, one per type
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Version that is fully rolled out
    #[serde(default)]
    pub current_version: Option<String>,
    /// Version the controller is driving toward
    #[serde(default)]
    pub desired_version: Option<String>,
}

/// Lifecycle phase of the managing resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum Phase {
    Progressing,
    Available,
    Error,
    Uninstalling,
    Updating,
    Paused,
    Unimplemented,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Progressing => "Progressing",
            Phase::Available => "Available",
            Phase::Error => "Error",
            Phase::Uninstalling => "Uninstalling",
            Phase::Updating => "Updating",
            Phase::Paused => "Paused",
            Phase::Unimplemented => "Unimplemented",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tri-state condition status
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema,
)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl ConditionStatus {
    pub fn from_bool(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }

    /// Parse the string form used by native Kubernetes conditions
    pub fn parse(value: &str) -> Self {
        match value {
            "True" => ConditionStatus::True,
            "False" => ConditionStatus::False,
            _ => ConditionStatus::Unknown,
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Canonical health record of a single component
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentCondition {
    /// Name of the backing resource
    pub name: String,
    /// Logical kind of the backing resource
    pub kind: String,
    /// Condition type (Available, Present, NotPresent, ...)
    pub r#type: String,
    pub status: ConditionStatus,
    /// Set on every recomputation (RFC3339)
    #[serde(default)]
    pub last_update_time: Option<String>,
    /// Set only when `status` changes for the same name and type (RFC3339)
    #[serde(default)]
    pub last_transition_time: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    /// Summary flag used for phase aggregation
    #[serde(default)]
    pub available: bool,
}

/// Top-level condition of the managing resource
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,
    /// Last time the condition was written (RFC3339)
    #[serde(default)]
    pub last_update_time: Option<String>,
    /// Last time the status changed (RFC3339)
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Machine-readable reason
    #[serde(default)]
    pub reason: Option<String>,
    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
}

/// Top-level condition types
pub mod condition_type {
    pub const AVAILABLE: &str = "Available";
    pub const PROGRESSING: &str = "Progressing";
    pub const COMPONENT_FAILURE: &str = "ComponentFailure";
    pub const FAILURE: &str = "Failure";
    pub const DEPRECATED: &str = "Deprecated";
}

/// Reasons shared by top-level and component conditions
pub mod reason {
    pub const FAILED_APPLYING_COMPONENT: &str = "FailedApplyingComponent";
    pub const COMPONENTS_AVAILABLE: &str = "ComponentsAvailable";
    pub const COMPONENTS_UNAVAILABLE: &str = "ComponentsUnavailable";
    pub const FAILED_DEPLOYING_COMPONENT: &str = "FailedDeployingComponent";
    pub const COMPONENTS_DEPLOYED: &str = "ComponentsDeployed";
    pub const REQUIREMENTS_NOT_MET: &str = "RequirementsNotMet";
    pub const DELETION_TIMESTAMP_PRESENT: &str = "DeletionTimestampPresent";
    pub const WAITING_FOR_RESOURCE: &str = "WaitingForResource";
    pub const PAUSED: &str = "Paused";
    pub const SPEC_DEFAULTED: &str = "SpecDefaulted";
    pub const MANAGED_CLUSTER_TERMINATING: &str = "ManagedClusterTerminating";
    pub const NAMESPACE_TERMINATING: &str = "NamespaceTerminating";
    pub const COMPONENT_DISABLED: &str = "ComponentDisabled";
    pub const RESOURCES_PRESENT: &str = "ResourcesPresent";
    pub const RESOURCE_DELETING: &str = "ResourceDeleting";
    pub const OLD_COMPONENT_REMOVED: &str = "OldComponentRemoved";
    pub const OLD_COMPONENT_NOT_REMOVED: &str = "OldComponentNotRemoved";
    pub const ALL_OLD_COMPONENTS_REMOVED: &str = "AllOldComponentsRemoved";
    pub const UNKNOWN: &str = "Error checking status";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_status_serializes_as_string() {
        let json = serde_json::to_string(&ConditionStatus::True).unwrap();
        assert_eq!(json, "\"True\"");
        let parsed: ConditionStatus = serde_json::from_str("\"Unknown\"").unwrap();
        assert_eq!(parsed, ConditionStatus::Unknown);
    }

    #[test]
    fn test_condition_status_parse_native_values() {
        assert_eq!(ConditionStatus::parse("True"), ConditionStatus::True);
        assert_eq!(ConditionStatus::parse("False"), ConditionStatus::False);
        assert_eq!(ConditionStatus::parse("bogus"), ConditionStatus::Unknown);
    }

    #[test]
    fn test_status_uses_camel_case_fields() {
        let status = PlatformEngineStatus {
            phase: Some(Phase::Available),
            current_version: Some("1.0.0".to_string()),
            ..Default::default()
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["phase"], "Available");
        assert_eq!(value["currentVersion"], "1.0.0");
    }
}
