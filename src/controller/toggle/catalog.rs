//! # Component Catalog
//!
//! The optional components this controller knows how to install, and what
//! each one needs: where its manifests live, which workload signals health,
//! and any extra gates around enablement.

use crate::client::ObjectKey;

/// Custom resource owned by a component's operator
#[derive(Debug, Clone, Copy)]
pub struct OperatorResource {
    pub api_version: &'static str,
    pub kind: &'static str,
    pub name: &'static str,
    /// Condition type that signals success
    pub success_type: &'static str,
    /// Namespace the operator creates and removes on its own
    pub managed_namespace: Option<&'static str>,
}

impl OperatorResource {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::cluster_scoped(self.api_version, self.kind, self.name)
    }
}

/// Resource that must exist before a component is installed
#[derive(Debug, Clone, Copy)]
pub struct Dependency {
    pub api_version: &'static str,
    pub kind: &'static str,
    /// `None` for cluster-scoped resources
    pub namespace: Option<&'static str>,
    pub name: &'static str,
}

impl Dependency {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.api_version, self.kind, self.namespace, self.name)
    }
}

/// Step run once the primary workload is available
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Register the console plugin with the cluster console
    ConsolePlugin,
}

#[derive(Debug, Clone, Copy)]
pub struct Component {
    pub name: &'static str,
    /// Manifest directory, relative to the templates root
    pub chart: &'static str,
    /// CRD directory, relative to the templates root
    pub crds: Option<&'static str>,
    /// Deployment whose rollout reports the component's health
    pub deployment: Option<&'static str>,
    /// `ClusterManagementAddOn` registered by the component
    pub addon: Option<&'static str>,
    pub operator: Option<OperatorResource>,
    pub dependency: Option<Dependency>,
    pub activation: Option<Activation>,
    /// Installed only when the cluster console operator is present
    pub requires_console: bool,
    /// Registers the hub as its own managed cluster instead of applying a chart
    pub local_cluster: bool,
    pub default_enabled: bool,
}

impl Component {
    const fn new(name: &'static str, chart: &'static str) -> Self {
        Self {
            name,
            chart,
            crds: None,
            deployment: None,
            addon: None,
            operator: None,
            dependency: None,
            activation: None,
            requires_console: false,
            local_cluster: false,
            default_enabled: true,
        }
    }

    pub fn addon_key(&self) -> Option<ObjectKey> {
        self.addon.map(|name| {
            ObjectKey::cluster_scoped(
                "addon.open-cluster-management.io/v1alpha1",
                "ClusterManagementAddOn",
                name,
            )
        })
    }
}

pub const CLUSTER_MANAGER: &str = "cluster-manager";
pub const SERVER_FOUNDATION: &str = "server-foundation";
pub const CLUSTER_LIFECYCLE: &str = "cluster-lifecycle";
pub const DISCOVERY: &str = "discovery";
pub const HIVE: &str = "hive";
pub const ASSISTED_SERVICE: &str = "assisted-service";
pub const CONSOLE: &str = "console";
pub const MANAGED_SERVICE_ACCOUNT: &str = "managed-serviceaccount";
pub const HYPERSHIFT: &str = "hypershift";
pub const CLUSTER_PROXY_ADDON: &str = "cluster-proxy-addon";
pub const IMAGE_BASED_INSTALL: &str = "image-based-install-operator";
pub const LOCAL_CLUSTER: &str = "local-cluster";

const HUB_NAMESPACE_DEPENDENCY: Dependency = Dependency {
    api_version: "v1",
    kind: "Namespace",
    namespace: None,
    name: crate::constants::HUB_NAMESPACE,
};

/// Every component, in installation order
pub static CATALOG: &[Component] = &[
    Component {
        deployment: Some("cluster-manager"),
        operator: Some(OperatorResource {
            api_version: "operator.open-cluster-management.io/v1",
            kind: "ClusterManager",
            name: "cluster-manager",
            success_type: "Applied",
            managed_namespace: Some(crate::constants::HUB_NAMESPACE),
        }),
        ..Component::new(CLUSTER_MANAGER, "charts/toggle/cluster-manager")
    },
    Component {
        deployment: Some("ocm-controller"),
        ..Component::new(SERVER_FOUNDATION, "charts/toggle/server-foundation")
    },
    Component {
        deployment: Some("cluster-curator-controller"),
        ..Component::new(CLUSTER_LIFECYCLE, "charts/toggle/cluster-lifecycle")
    },
    Component {
        deployment: Some("discovery-operator"),
        crds: Some("crds/discovery"),
        ..Component::new(DISCOVERY, "charts/toggle/discovery")
    },
    Component {
        deployment: Some("hive-operator"),
        crds: Some("crds/hive"),
        ..Component::new(HIVE, "charts/toggle/hive")
    },
    Component {
        deployment: Some("infrastructure-operator"),
        ..Component::new(ASSISTED_SERVICE, "charts/toggle/assisted-service")
    },
    Component {
        deployment: Some("console-mce-console"),
        activation: Some(Activation::ConsolePlugin),
        requires_console: true,
        ..Component::new(CONSOLE, "charts/toggle/console")
    },
    Component {
        addon: Some("managed-serviceaccount"),
        crds: Some("crds/managed-serviceaccount"),
        ..Component::new(MANAGED_SERVICE_ACCOUNT, "charts/toggle/managed-serviceaccount")
    },
    Component {
        deployment: Some("hypershift-addon-manager"),
        addon: Some("hypershift-addon"),
        ..Component::new(HYPERSHIFT, "charts/toggle/hypershift")
    },
    Component {
        deployment: Some("cluster-proxy-addon-manager"),
        addon: Some("cluster-proxy"),
        dependency: Some(HUB_NAMESPACE_DEPENDENCY),
        ..Component::new(CLUSTER_PROXY_ADDON, "charts/toggle/cluster-proxy-addon")
    },
    Component {
        deployment: Some("image-based-install-operator"),
        default_enabled: false,
        ..Component::new(IMAGE_BASED_INSTALL, "charts/toggle/image-based-install-operator")
    },
    // Needs the ManagedCluster CRD from cluster-manager, so it comes last
    Component {
        local_cluster: true,
        ..Component::new(LOCAL_CLUSTER, "")
    },
];

pub fn find(name: &str) -> Option<&'static Component> {
    CATALOG.iter().find(|c| c.name == name)
}

pub fn is_known(name: &str) -> bool {
    find(name).is_some()
}
