//! # Finalization
//!
//! Ordered teardown of everything installed for a managing resource, found by
//! the installer label. Kinds are visited in dependency order:
//!
//! 1. API registration (APIServices and admission webhooks) so nothing keeps
//!    routing to workloads that are about to disappear
//! 2. Custom resources owned by component operators
//! 3. Namespaces
//! 4. Plain workloads, configuration, identities and RBAC
//!
//! CustomResourceDefinitions are left in place: removing one deletes every
//! custom resource of that kind on the cluster, not only ours.
//!
//! Hosted resources install nothing locally, so [`hosted_teardown`] only
//! unregisters the console plugin and removes the cluster manager.
//!
//! The finalizer may only be removed once a pass finds nothing left.

use crate::client::{
    get_optional, installer_selector, is_terminating, ClientError, ClusterClient, ObjectKey,
};
use crate::constants::HUB_NAMESPACE;
use crate::controller::status::condition::new_condition;
use crate::controller::toggle::console;
use crate::crd::{condition_type, reason, Condition, ConditionStatus};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// How long a namespace may take to terminate before the wait is reported as stuck
pub const NAMESPACE_TERMINATION_GRACE: Duration = Duration::from_secs(5 * 60);

/// Name of the cluster manager resource created by the hub component
pub const CLUSTER_MANAGER_NAME: &str = "cluster-manager";

#[derive(Debug, Error)]
pub enum TeardownError {
    #[error("failed to list {kind}: {source}")]
    List {
        kind: String,
        #[source]
        source: ClientError,
    },

    #[error("failed to delete {key}: {source}")]
    Delete {
        key: String,
        #[source]
        source: ClientError,
    },

    #[error("failed to unregister console plugin: {0}")]
    Console(#[source] ClientError),
}

/// (apiVersion, kind) in teardown order
pub const TEARDOWN_ORDER: &[(&str, &str)] = &[
    ("apiregistration.k8s.io/v1", "APIService"),
    ("admissionregistration.k8s.io/v1", "ValidatingWebhookConfiguration"),
    ("admissionregistration.k8s.io/v1", "MutatingWebhookConfiguration"),
    ("operator.open-cluster-management.io/v1", "ClusterManager"),
    ("addon.open-cluster-management.io/v1alpha1", "ClusterManagementAddOn"),
    ("hive.openshift.io/v1", "HiveConfig"),
    ("v1", "Namespace"),
    ("v1", "Service"),
    ("apps/v1", "Deployment"),
    ("v1", "ConfigMap"),
    ("v1", "Secret"),
    ("v1", "ServiceAccount"),
    ("rbac.authorization.k8s.io/v1", "Role"),
    ("rbac.authorization.k8s.io/v1", "RoleBinding"),
    ("rbac.authorization.k8s.io/v1", "ClusterRole"),
    ("rbac.authorization.k8s.io/v1", "ClusterRoleBinding"),
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Deletions issued during this pass
    pub deleted: usize,
    /// Resources observed that are not confirmed gone
    pub remaining: usize,
    /// Namespace whose termination stopped the pass early
    pub waiting_for: Option<String>,
}

impl TeardownReport {
    pub fn complete(&self) -> bool {
        self.remaining == 0 && self.waiting_for.is_none()
    }

    fn wait_for(mut self, namespace: &str) -> Self {
        info!(namespace, "Waiting for namespace to terminate");
        self.waiting_for = Some(namespace.to_string());
        self
    }
}

/// Run one teardown pass for resources labelled with `installer_name`
pub async fn teardown(
    client: &dyn ClusterClient,
    installer_name: &str,
) -> Result<TeardownReport, TeardownError> {
    let selector = installer_selector(installer_name);
    let mut report = TeardownReport::default();

    for (api_version, kind) in TEARDOWN_ORDER {
        let objects = match client.list(api_version, kind, &selector).await {
            Ok(objects) => objects,
            Err(e) if e.is_schema_unavailable() => {
                debug!(kind, "Kind not served, nothing to tear down");
                continue;
            }
            Err(source) => {
                return Err(TeardownError::List {
                    kind: kind.to_string(),
                    source,
                })
            }
        };

        for obj in objects {
            let key = match ObjectKey::of(&obj) {
                Ok(key) => key,
                Err(e) => {
                    warn!(kind, error = %e, "Skipping unidentifiable object");
                    continue;
                }
            };

            if is_terminating(&obj) {
                if *kind == "Namespace" {
                    return Ok(report.wait_for(&key.name));
                }
                debug!(resource = %key, "Resource already terminating");
                report.remaining += 1;
                continue;
            }

            match client.delete(&key).await {
                Ok(()) => {
                    info!(resource = %key, "Deleted resource");
                    report.deleted += 1;
                    // Deletion may be asynchronous
                    if !confirmed_gone(client, &key).await? {
                        report.remaining += 1;
                    }
                }
                Err(e) if e.is_absent() => {}
                Err(source) => {
                    return Err(TeardownError::Delete {
                        key: key.to_string(),
                        source,
                    })
                }
            }
        }

        if *kind == "ClusterManager"
            && hub_namespace(client)
                .await?
                .is_some_and(|ns| is_terminating(&ns))
        {
            return Ok(report.wait_for(HUB_NAMESPACE));
        }
    }

    info!(
        deleted = report.deleted,
        remaining = report.remaining,
        "Teardown pass finished"
    );
    Ok(report)
}

async fn confirmed_gone(client: &dyn ClusterClient, key: &ObjectKey) -> Result<bool, TeardownError> {
    match client.get(key).await {
        Ok(_) => Ok(false),
        Err(e) if e.is_absent() => Ok(true),
        Err(source) => Err(TeardownError::Delete {
            key: key.to_string(),
            source,
        }),
    }
}

async fn hub_namespace(
    client: &dyn ClusterClient,
) -> Result<Option<kube::api::DynamicObject>, TeardownError> {
    let key = ObjectKey::cluster_scoped("v1", "Namespace", HUB_NAMESPACE);
    get_optional(client, &key)
        .await
        .map_err(|source| TeardownError::List {
            kind: "Namespace".to_string(),
            source,
        })
}

/// Teardown pass for a hosted resource.
///
/// The hub namespace belongs to the cluster-manager operator, so the pass
/// waits for it to be gone entirely rather than only terminating.
pub async fn hosted_teardown(
    client: &dyn ClusterClient,
    console_plugin: &str,
) -> Result<TeardownReport, TeardownError> {
    let mut report = TeardownReport::default();

    console::remove_plugin(client, console_plugin)
        .await
        .map_err(TeardownError::Console)?;

    let key = ObjectKey::cluster_scoped(
        "operator.open-cluster-management.io/v1",
        "ClusterManager",
        CLUSTER_MANAGER_NAME,
    );
    match client.get(&key).await {
        Ok(obj) if is_terminating(&obj) => report.remaining += 1,
        Ok(_) => match client.delete(&key).await {
            Ok(()) => {
                info!(resource = %key, "Deleted resource");
                report.deleted += 1;
                if !confirmed_gone(client, &key).await? {
                    report.remaining += 1;
                }
            }
            Err(e) if e.is_absent() => {}
            Err(source) => {
                return Err(TeardownError::Delete {
                    key: key.to_string(),
                    source,
                })
            }
        },
        Err(e) if e.is_absent() => {}
        Err(source) => {
            return Err(TeardownError::List {
                kind: key.kind,
                source,
            })
        }
    }

    if hub_namespace(client).await?.is_some() {
        return Ok(report.wait_for(HUB_NAMESPACE));
    }
    Ok(report)
}

/// Progressing condition for a finalizer blocked on `namespace`.
///
/// Turns `False` once the resource has been deleting for longer than
/// [`NAMESPACE_TERMINATION_GRACE`], since uninstall may then be stuck.
pub fn namespace_wait_condition(namespace: &str, deleting_for: Option<Duration>) -> Condition {
    if deleting_for.is_some_and(|age| age >= NAMESPACE_TERMINATION_GRACE) {
        new_condition(
            condition_type::PROGRESSING,
            ConditionStatus::False,
            reason::WAITING_FOR_RESOURCE,
            format!("Namespace {namespace} still exists."),
        )
    } else {
        new_condition(
            condition_type::PROGRESSING,
            ConditionStatus::True,
            reason::WAITING_FOR_RESOURCE,
            format!("Waiting for namespace {namespace} to terminate."),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{set_installer_labels, InMemoryCluster, Verb};

    fn seed(cluster: &InMemoryCluster, api_version: &str, kind: &str, ns: Option<&str>, name: &str) -> ObjectKey {
        let mut obj = ObjectKey::new(api_version, kind, ns, name).to_object();
        set_installer_labels(&mut obj, "engine", "");
        cluster.insert(obj).unwrap()
    }

    #[tokio::test]
    async fn test_empty_cluster_is_complete() {
        let cluster = InMemoryCluster::new();
        let report = teardown(&cluster, "engine").await.unwrap();
        assert!(report.complete());
        assert_eq!(report.deleted, 0);
    }

    #[tokio::test]
    async fn test_deletes_only_labelled_resources() {
        let cluster = InMemoryCluster::new();
        let ours = seed(&cluster, "v1", "Service", Some("ns"), "ours");
        let theirs = cluster
            .insert(ObjectKey::new("v1", "Service", Some("ns"), "theirs").to_object())
            .unwrap();

        let report = teardown(&cluster, "engine").await.unwrap();
        assert!(report.complete());
        assert_eq!(report.deleted, 1);
        assert!(!cluster.contains(&ours));
        assert!(cluster.contains(&theirs));
    }

    #[tokio::test]
    async fn test_lingering_resource_blocks_completion() {
        let cluster = InMemoryCluster::new();
        let key = seed(&cluster, "apps/v1", "Deployment", Some("ns"), "worker");
        cluster.hold_deletion(&key);

        let report = teardown(&cluster, "engine").await.unwrap();
        assert_eq!(report.remaining, 1);
        assert!(!report.complete());

        let report = teardown(&cluster, "engine").await.unwrap();
        assert_eq!(report.remaining, 1);

        cluster.release_deletion(&key);
        let report = teardown(&cluster, "engine").await.unwrap();
        assert!(report.complete());
    }

    #[tokio::test]
    async fn test_terminating_namespace_stops_pass_and_waits() {
        let cluster = InMemoryCluster::new();
        let ns = seed(&cluster, "v1", "Namespace", None, "workloads");
        cluster.hold_deletion(&ns);

        let report = teardown(&cluster, "engine").await.unwrap();
        assert_eq!(report.remaining, 1);

        let sa = seed(&cluster, "v1", "ServiceAccount", Some("ns"), "sa");

        let report = teardown(&cluster, "engine").await.unwrap();
        assert_eq!(report.waiting_for.as_deref(), Some("workloads"));
        assert!(!report.complete());
        // Later kinds are left alone until the namespace is gone
        assert!(cluster.contains(&sa));

        cluster.release_deletion(&ns);
        let report = teardown(&cluster, "engine").await.unwrap();
        assert!(report.complete());
        assert!(!cluster.contains(&sa));
    }

    #[tokio::test]
    async fn test_terminating_hub_namespace_waits_after_cluster_manager() {
        let cluster = InMemoryCluster::new();
        seed(
            &cluster,
            "operator.open-cluster-management.io/v1",
            "ClusterManager",
            None,
            CLUSTER_MANAGER_NAME,
        );
        let hub = cluster
            .insert(ObjectKey::cluster_scoped("v1", "Namespace", HUB_NAMESPACE).to_object())
            .unwrap();
        cluster.hold_deletion(&hub);
        cluster.delete(&hub).await.unwrap();

        let report = teardown(&cluster, "engine").await.unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(report.waiting_for.as_deref(), Some(HUB_NAMESPACE));
    }

    #[tokio::test]
    async fn test_labelled_configuration_is_deleted() {
        let cluster = InMemoryCluster::new();
        let config = seed(&cluster, "v1", "ConfigMap", Some("ns"), "settings");
        let secret = seed(&cluster, "v1", "Secret", Some("ns"), "credentials");
        let crd = seed(
            &cluster,
            "apiextensions.k8s.io/v1",
            "CustomResourceDefinition",
            None,
            "widgets.example.io",
        );

        let report = teardown(&cluster, "engine").await.unwrap();
        assert!(report.complete());
        assert!(!cluster.contains(&config));
        assert!(!cluster.contains(&secret));
        assert!(cluster.contains(&crd));
    }

    #[tokio::test]
    async fn test_hosted_teardown_removes_plugin_and_cluster_manager() {
        let cluster = InMemoryCluster::new();
        cluster
            .insert(
                serde_json::from_value(serde_json::json!({
                    "apiVersion": "operator.openshift.io/v1",
                    "kind": "Console",
                    "metadata": {"name": "cluster"},
                    "spec": {"plugins": ["platform-engine", "other"]},
                }))
                .unwrap(),
            )
            .unwrap();
        let manager = cluster
            .insert(
                ObjectKey::cluster_scoped(
                    "operator.open-cluster-management.io/v1",
                    "ClusterManager",
                    CLUSTER_MANAGER_NAME,
                )
                .to_object(),
            )
            .unwrap();
        let hub = cluster
            .insert(ObjectKey::cluster_scoped("v1", "Namespace", HUB_NAMESPACE).to_object())
            .unwrap();

        let report = hosted_teardown(&cluster, "platform-engine").await.unwrap();
        assert_eq!(report.deleted, 1);
        assert!(!cluster.contains(&manager));
        assert_eq!(report.waiting_for.as_deref(), Some(HUB_NAMESPACE));
        let console = cluster.object(&console::console_key()).unwrap();
        assert_eq!(console.data["spec"]["plugins"], serde_json::json!(["other"]));

        cluster.remove(&hub);
        let report = hosted_teardown(&cluster, "platform-engine").await.unwrap();
        assert!(report.complete());
    }

    #[tokio::test]
    async fn test_hosted_teardown_without_console_or_ocm() {
        let cluster = InMemoryCluster::new();
        cluster.unregister_kind("Console");
        cluster.unregister_kind("ClusterManager");
        let report = hosted_teardown(&cluster, "platform-engine").await.unwrap();
        assert!(report.complete());
    }

    #[test]
    fn test_namespace_wait_turns_false_after_grace() {
        let waiting = namespace_wait_condition(HUB_NAMESPACE, Some(Duration::from_secs(30)));
        assert_eq!(waiting.status, ConditionStatus::True);
        assert_eq!(waiting.reason.as_deref(), Some(reason::WAITING_FOR_RESOURCE));

        let stuck = namespace_wait_condition(HUB_NAMESPACE, Some(NAMESPACE_TERMINATION_GRACE));
        assert_eq!(stuck.status, ConditionStatus::False);
        assert_eq!(
            stuck.message.as_deref(),
            Some("Namespace open-cluster-management-hub still exists.")
        );
    }

    #[tokio::test]
    async fn test_unserved_kinds_are_skipped() {
        let cluster = InMemoryCluster::new();
        cluster.unregister_kind("ClusterManager");
        cluster.unregister_kind("HiveConfig");
        seed(&cluster, "v1", "ServiceAccount", Some("ns"), "sa");
        let report = teardown(&cluster, "engine").await.unwrap();
        assert!(report.complete());
        assert_eq!(report.deleted, 1);
    }

    #[tokio::test]
    async fn test_delete_failure_aborts_pass() {
        let cluster = InMemoryCluster::new();
        seed(&cluster, "v1", "Service", Some("ns"), "svc");
        cluster.inject_failure(Verb::Delete, "Service", 500, "boom");
        let err = teardown(&cluster, "engine").await.unwrap_err();
        assert!(matches!(err, TeardownError::Delete { .. }));
    }
}
