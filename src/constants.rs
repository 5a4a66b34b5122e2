//! # Constants
//!
//! Default values and well-known names shared across the controller.

/// Default HTTP port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Address the probe server binds to
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";

/// Server startup timeout (seconds)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Server readiness poll interval (milliseconds)
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Fixed delay before the next pass when a pass asks to be requeued (seconds)
pub const DEFAULT_REQUEUE_PERIOD_SECS: u64 = 15;

/// Delay between teardown passes while owned resources are still present (seconds)
pub const DEFAULT_FINALIZER_REQUEUE_SECS: u64 = 5;

/// Directory holding the per-component manifest sets
pub const DEFAULT_TEMPLATES_DIR: &str = "/usr/local/templates";

/// Namespace the operator itself runs in
pub const DEFAULT_OPERATOR_NAMESPACE: &str = "platform-engine";

/// Namespace sub-components are installed into when the spec leaves it empty
pub const DEFAULT_TARGET_NAMESPACE: &str = "platform-engine";

/// Name of the console plugin registered by the console component
pub const DEFAULT_CONSOLE_PLUGIN: &str = "platform-engine";

/// Version reported when `OPERATOR_VERSION` is not set
pub const DEFAULT_OPERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Field manager used for every write made by the controller
pub const FIELD_MANAGER: &str = "platform-engine-controller";

/// Finalizer placed on the managing resource
pub const FINALIZER: &str = "finalizer.platform.microscaler.io";

/// Label carrying the name of the managing resource on every installed resource
pub const INSTALLER_NAME_LABEL: &str = "installer.name";

/// Label carrying the namespace of the managing resource on every installed resource
pub const INSTALLER_NAMESPACE_LABEL: &str = "installer.namespace";

/// Annotation holding the content hash of the last applied desired state
pub const LAST_APPLIED_ANNOTATION: &str =
    "installer.platform.microscaler.io/last-applied-configuration";

/// Annotation stamped on every applied resource with the operator version
pub const RELEASE_VERSION_ANNOTATION: &str = "installer.platform.microscaler.io/release-version";

/// Annotation that pauses reconciliation of the managing resource
pub const PAUSE_ANNOTATION: &str = "installer.platform.microscaler.io/pause";

/// Annotation naming the secret that holds the hosted cluster kubeconfig
pub const KUBECONFIG_ANNOTATION: &str = "installer.platform.microscaler.io/kubeconfig";

/// Annotation naming the ConfigMap that carries image overrides
pub const IMAGE_OVERRIDES_ANNOTATION: &str =
    "installer.platform.microscaler.io/image-overrides-configmap";

/// Annotation selecting the deployment mode
pub const DEPLOYMENT_MODE_ANNOTATION: &str = "deploymentmode";

/// Deployment mode value for hosted installs
pub const HOSTED_MODE: &str = "Hosted";

/// Secret data key holding the kubeconfig of the hosted cluster
pub const KUBECONFIG_SECRET_KEY: &str = "kubeconfig";

/// Namespace created by the cluster manager operator for its hub components
pub const HUB_NAMESPACE: &str = "open-cluster-management-hub";
