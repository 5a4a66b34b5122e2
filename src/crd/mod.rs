//! # Custom Resource Definitions
//!
//! CRD types for the Platform Engine Controller.
//!
//! `PlatformEngine` is the managing resource: its spec declares which optional
//! components are installed, and its status carries the aggregated health of
//! every component the controller tracks.

mod status;

pub use status::*;

use crate::constants;
use kube::CustomResource;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// PlatformEngine Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: platform.microscaler.io/v1
/// kind: PlatformEngine
/// metadata:
///   name: engine
/// spec:
///   targetNamespace: platform-engine
///   availabilityConfig: High
///   overrides:
///     components:
///       - name: console
///         enabled: true
///       - name: hypershift
///         enabled: false
/// ```
#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "PlatformEngine",
    group = "platform.microscaler.io",
    version = "v1",
    status = "PlatformEngineStatus",
    shortname = "pe",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}, {"name":"Desired", "type":"string", "jsonPath":".status.desiredVersion"}, {"name":"Current", "type":"string", "jsonPath":".status.currentVersion"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PlatformEngineSpec {
    /// Replica profile for installed workloads
    /// Values: Basic (single replica), High (multiple replicas)
    #[serde(default)]
    pub availability_config: Option<AvailabilityType>,
    /// Node selector applied to every installed workload
    #[serde(default)]
    pub node_selector: Option<BTreeMap<String, String>>,
    /// Tolerations applied to every installed workload
    #[serde(default)]
    pub tolerations: Option<Vec<serde_json::Value>>,
    /// Pull secret referenced by every installed workload
    #[serde(default)]
    pub image_pull_secret: Option<String>,
    /// Namespace the components are installed into
    #[serde(default)]
    pub target_namespace: Option<String>,
    /// Component toggles and other overrides
    #[serde(default)]
    pub overrides: Option<Overrides>,
}

/// Replica profile for installed workloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum AvailabilityType {
    Basic,
    High,
}

/// Overrides applied on top of the defaults
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Overrides {
    /// Pull policy for every installed image
    #[serde(default)]
    pub image_pull_policy: Option<String>,
    /// Per-component enablement
    #[serde(default)]
    pub components: Vec<ComponentConfig>,
}

/// Enablement of a single component
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub struct ComponentConfig {
    /// Component name, one of the catalog entries
    pub name: String,
    /// Whether the component is installed
    pub enabled: bool,
}

impl PlatformEngine {
    /// Whether the named component is enabled in the spec
    pub fn enabled(&self, name: &str) -> bool {
        self.spec
            .overrides
            .as_ref()
            .and_then(|o| o.components.iter().find(|c| c.name == name))
            .is_some_and(|c| c.enabled)
    }

    /// Whether the named component has an entry in the spec at all
    pub fn component_present(&self, name: &str) -> bool {
        self.spec
            .overrides
            .as_ref()
            .is_some_and(|o| o.components.iter().any(|c| c.name == name))
    }

    /// Enable the named component, adding an entry if needed
    pub fn enable(&mut self, name: &str) {
        self.set_enabled(name, true);
    }

    /// Disable the named component, adding an entry if needed
    pub fn disable(&mut self, name: &str) {
        self.set_enabled(name, false);
    }

    fn set_enabled(&mut self, name: &str, enabled: bool) {
        let overrides = self.spec.overrides.get_or_insert_with(Overrides::default);
        match overrides.components.iter_mut().find(|c| c.name == name) {
            Some(existing) => existing.enabled = enabled,
            None => overrides.components.push(ComponentConfig {
                name: name.to_string(),
                enabled,
            }),
        }
    }

    /// Namespace the components are installed into
    pub fn target_namespace<'a>(&'a self, default: &'a str) -> &'a str {
        self.spec
            .target_namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(default)
    }

    /// Reconciliation is paused via annotation
    pub fn is_paused(&self) -> bool {
        self.annotations()
            .get(constants::PAUSE_ANNOTATION)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    /// Components run on a remote hosted cluster instead of locally
    pub fn is_hosted(&self) -> bool {
        self.annotations()
            .get(constants::DEPLOYMENT_MODE_ANNOTATION)
            .is_some_and(|v| v == constants::HOSTED_MODE)
    }

    /// Deletion has been requested
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// How long ago deletion was requested, if it has been
    pub fn deleting_for(&self) -> Option<std::time::Duration> {
        let requested = serde_json::to_value(self.metadata.deletion_timestamp.as_ref()?).ok()?;
        let requested = chrono::DateTime::parse_from_rfc3339(requested.as_str()?).ok()?;
        (chrono::Utc::now() - requested.with_timezone(&chrono::Utc))
            .to_std()
            .ok()
    }

    /// The controller finalizer is present
    pub fn has_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == constants::FINALIZER)
    }
}
