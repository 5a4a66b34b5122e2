//! # Local Cluster
//!
//! Registers the hub as a `ManagedCluster` of itself. Removal goes in two
//! steps: the `ManagedCluster` is deleted and waited out, then its namespace.
//! Registration never starts while a namespace from an earlier registration
//! is still around.

use super::{delete_tolerant, ToggleContext, ToggleError, ToggleOutcome, ToggleState};
use crate::client::{is_terminating, set_installer_labels, ClientError, ObjectKey};
use crate::controller::status::condition::new_condition;
use crate::controller::status::{LocalClusterStatus, StaticStatus, StatusTracker};
use crate::crd::{condition_type, reason, ConditionStatus};
use kube::api::DynamicObject;
use kube::ResourceExt;
use serde_json::json;
use tracing::info;

pub const LOCAL_CLUSTER_NAME: &str = "local-cluster";

const MANAGED_CLUSTER_KIND: &str = "ManagedCluster";

pub fn managed_cluster_key() -> ObjectKey {
    ObjectKey::cluster_scoped(
        "cluster.open-cluster-management.io/v1",
        MANAGED_CLUSTER_KIND,
        LOCAL_CLUSTER_NAME,
    )
}

pub fn namespace_key() -> ObjectKey {
    ObjectKey::cluster_scoped("v1", "Namespace", LOCAL_CLUSTER_NAME)
}

fn managed_cluster(ctx: &ToggleContext<'_>) -> DynamicObject {
    let mut obj = managed_cluster_key().to_object();
    obj.data = json!({ "spec": { "hubAcceptsClient": true } });
    let labels = obj.labels_mut();
    for (k, v) in [
        ("local-cluster", "true"),
        ("cloud", "auto-detect"),
        ("vendor", "auto-detect"),
        ("velero.io/exclude-from-backup", "true"),
    ] {
        labels.insert(k.to_string(), v.to_string());
    }
    set_installer_labels(
        &mut obj,
        &ctx.engine.name_any(),
        &ctx.engine.namespace().unwrap_or_default(),
    );
    obj
}

fn read_error(key: &ObjectKey, source: ClientError) -> ToggleError {
    ToggleError::Probe {
        key: key.to_string(),
        source,
    }
}

fn wait_on(tracker: &mut StatusTracker, name: &str, namespace: &str, message: &str) {
    tracker.remove_key(name, namespace);
    tracker.add_component(StaticStatus::waiting_for(
        name,
        namespace,
        MANAGED_CLUSTER_KIND,
        message,
    ));
}

/// Make sure the local `ManagedCluster` exists
pub async fn enable(
    ctx: &ToggleContext<'_>,
    name: &str,
    tracker: &mut StatusTracker,
) -> Result<ToggleOutcome, ToggleError> {
    let ns = ctx.target_namespace;
    let key = managed_cluster_key();
    tracker.remove_key(name, ns);
    tracker.add_component(LocalClusterStatus::enabled(name, ns, key.clone()));

    match ctx.client.get(&key).await {
        Ok(_) => return Ok(ToggleOutcome::settled(ToggleState::Available)),
        Err(e) if e.is_schema_unavailable() => {
            wait_on(tracker, name, ns, "Waiting for ManagedCluster CRD to be available");
            return Ok(ToggleOutcome::retry(ToggleState::WaitingForDependency));
        }
        Err(e) if e.is_not_found() => {}
        Err(source) => return Err(read_error(&key, source)),
    }

    let ns_key = namespace_key();
    match ctx.client.get(&ns_key).await {
        Ok(_) => {
            info!(namespace = LOCAL_CLUSTER_NAME, "Waiting on local cluster namespace to be removed");
            return Ok(ToggleOutcome::retry(ToggleState::WaitingForDependency));
        }
        Err(e) if e.is_not_found() => {}
        Err(source) => return Err(read_error(&ns_key, source)),
    }

    match ctx.client.create(&managed_cluster(ctx)).await {
        Ok(_) => {
            info!(resource = %key, "Created local managed cluster");
            Ok(ToggleOutcome::settled(ToggleState::Available))
        }
        Err(e) if e.is_already_exists() => Ok(ToggleOutcome::settled(ToggleState::Available)),
        // The admission webhook is served by cluster-manager and may not be up yet
        Err(ClientError::Api { code: 500, .. }) => {
            wait_on(tracker, name, ns, "Waiting for ManagedCluster webhook");
            Ok(ToggleOutcome::retry(ToggleState::Applying))
        }
        Err(e) if e.is_absent() => {
            wait_on(tracker, name, ns, "Waiting for ManagedCluster CRD to be available");
            Ok(ToggleOutcome::retry(ToggleState::WaitingForDependency))
        }
        Err(source) => Err(ToggleError::Create {
            key: key.to_string(),
            source,
        }),
    }
}

/// Remove the local `ManagedCluster`, then its namespace
pub async fn disable(
    ctx: &ToggleContext<'_>,
    name: &str,
    tracker: &mut StatusTracker,
) -> Result<ToggleOutcome, ToggleError> {
    let ns = ctx.target_namespace;
    let key = managed_cluster_key();
    tracker.remove_key(name, ns);
    tracker.add_component(LocalClusterStatus::disabled(name, ns, key.clone()));

    match ctx.client.get(&key).await {
        Ok(mc) => {
            if !is_terminating(&mc) {
                delete_tolerant(ctx.client, &key).await?;
                info!(resource = %key, "Deleted local managed cluster");
            }
            tracker.add_condition(new_condition(
                condition_type::PROGRESSING,
                ConditionStatus::True,
                reason::MANAGED_CLUSTER_TERMINATING,
                "Waiting for local managed cluster to terminate.",
            ));
            return Ok(ToggleOutcome::retry(ToggleState::Deleting));
        }
        Err(e) if e.is_absent() => {}
        Err(source) => return Err(read_error(&key, source)),
    }

    let ns_key = namespace_key();
    match ctx.client.get(&ns_key).await {
        Ok(namespace) => {
            if !is_terminating(&namespace) {
                delete_tolerant(ctx.client, &ns_key).await?;
                info!(namespace = LOCAL_CLUSTER_NAME, "Deleted local cluster namespace");
            }
            tracker.add_condition(new_condition(
                condition_type::PROGRESSING,
                ConditionStatus::True,
                reason::NAMESPACE_TERMINATING,
                "Waiting for local managed cluster namespace to terminate.",
            ));
            Ok(ToggleOutcome::retry(ToggleState::ResourcesPresent))
        }
        Err(e) if e.is_not_found() => Ok(ToggleOutcome::settled(ToggleState::NotPresent)),
        Err(source) => Err(read_error(&ns_key, source)),
    }
}

/// Whether this pass is waiting on the local cluster to go away
pub fn removal_pending(tracker: &StatusTracker) -> bool {
    tracker.conditions().iter().any(|c| {
        c.r#type == condition_type::PROGRESSING
            && matches!(
                c.reason.as_deref(),
                Some(reason::MANAGED_CLUSTER_TERMINATING | reason::NAMESPACE_TERMINATING)
            )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClusterClient, InMemoryCluster};
    use crate::controller::apply::Applier;
    use crate::controller::toggle::{self, catalog};
    use crate::crd::{PlatformEngine, PlatformEngineSpec};
    use crate::images::ImageMap;
    use crate::render::StaticRenderer;

    const NS: &str = "platform-engine";

    struct Fixture {
        cluster: InMemoryCluster,
        renderer: StaticRenderer,
        applier: Applier,
        engine: PlatformEngine,
        images: ImageMap,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                cluster: InMemoryCluster::new(),
                renderer: StaticRenderer::new(),
                applier: Applier::default(),
                engine: PlatformEngine::new("engine", PlatformEngineSpec::default()),
                images: ImageMap::new(),
            }
        }

        fn ctx(&self) -> ToggleContext<'_> {
            ToggleContext {
                client: &self.cluster,
                renderer: &self.renderer,
                applier: &self.applier,
                engine: &self.engine,
                images: &self.images,
                target_namespace: NS,
                version: "1.0.0",
                console_plugin: "platform-engine",
            }
        }

        async fn enable(&self, tracker: &mut StatusTracker) -> ToggleOutcome {
            let component = catalog::find(catalog::LOCAL_CLUSTER).unwrap();
            toggle::enable(&self.ctx(), component, tracker).await.unwrap()
        }

        async fn disable(&self, tracker: &mut StatusTracker) -> ToggleOutcome {
            let component = catalog::find(catalog::LOCAL_CLUSTER).unwrap();
            toggle::disable(&self.ctx(), component, tracker).await.unwrap()
        }
    }

    fn progressing_reason(tracker: &StatusTracker) -> Option<String> {
        tracker
            .conditions()
            .iter()
            .find(|c| c.r#type == condition_type::PROGRESSING)
            .and_then(|c| c.reason.clone())
    }

    #[tokio::test]
    async fn test_enable_creates_labelled_managed_cluster() {
        let f = Fixture::new();
        let mut tracker = StatusTracker::new();

        let outcome = f.enable(&mut tracker).await;
        assert_eq!(outcome, ToggleOutcome::settled(ToggleState::Available));
        let mc = f.cluster.object(&managed_cluster_key()).unwrap();
        assert_eq!(mc.labels()["local-cluster"], "true");
        assert_eq!(mc.labels()["installer.name"], "engine");
        assert_eq!(mc.data["spec"]["hubAcceptsClient"], true);
        assert!(tracker.is_tracked(catalog::LOCAL_CLUSTER, NS));

        // Existing registration is left alone
        let writes = f.cluster.write_count();
        f.enable(&mut tracker).await;
        assert_eq!(f.cluster.write_count(), writes);
    }

    #[tokio::test]
    async fn test_enable_waits_for_previous_namespace() {
        let f = Fixture::new();
        let ns = f.cluster.insert(namespace_key().to_object()).unwrap();
        let mut tracker = StatusTracker::new();

        let outcome = f.enable(&mut tracker).await;
        assert_eq!(outcome, ToggleOutcome::retry(ToggleState::WaitingForDependency));
        assert!(!f.cluster.contains(&managed_cluster_key()));

        f.cluster.remove(&ns);
        let outcome = f.enable(&mut tracker).await;
        assert_eq!(outcome.state, ToggleState::Available);
        assert!(f.cluster.contains(&managed_cluster_key()));
    }

    #[tokio::test]
    async fn test_enable_without_crd_or_webhook_waits() {
        let f = Fixture::new();
        f.cluster.unregister_kind(MANAGED_CLUSTER_KIND);
        let mut tracker = StatusTracker::new();
        let outcome = f.enable(&mut tracker).await;
        assert_eq!(outcome, ToggleOutcome::retry(ToggleState::WaitingForDependency));

        f.cluster.register_kind(MANAGED_CLUSTER_KIND);
        f.cluster
            .inject_failure(crate::client::Verb::Create, MANAGED_CLUSTER_KIND, 500, "webhook down");
        let outcome = f.enable(&mut tracker).await;
        assert_eq!(outcome, ToggleOutcome::retry(ToggleState::Applying));

        let engine = PlatformEngine::new("engine", PlatformEngineSpec::default());
        let status = tracker.report_status(&f.cluster, &engine, "1.0.0").await;
        let local = status
            .components
            .iter()
            .find(|c| c.name == catalog::LOCAL_CLUSTER)
            .unwrap();
        assert_eq!(local.message.as_deref(), Some("Waiting for ManagedCluster webhook"));
        assert!(!local.available);
    }

    #[tokio::test]
    async fn test_disable_waits_for_cluster_then_namespace() {
        let f = Fixture::new();
        let mut tracker = StatusTracker::new();
        f.enable(&mut tracker).await;
        let ns = f.cluster.insert(namespace_key().to_object()).unwrap();
        f.cluster.hold_deletion(&ns);

        let mut tracker = StatusTracker::new();
        let outcome = f.disable(&mut tracker).await;
        assert_eq!(outcome, ToggleOutcome::retry(ToggleState::Deleting));
        assert!(!f.cluster.contains(&managed_cluster_key()));
        assert_eq!(
            progressing_reason(&tracker).as_deref(),
            Some(reason::MANAGED_CLUSTER_TERMINATING)
        );
        assert!(removal_pending(&tracker));

        // Namespace is deleted but keeps terminating
        for _ in 0..2 {
            let mut tracker = StatusTracker::new();
            let outcome = f.disable(&mut tracker).await;
            assert_eq!(outcome, ToggleOutcome::retry(ToggleState::ResourcesPresent));
            assert_eq!(
                progressing_reason(&tracker).as_deref(),
                Some(reason::NAMESPACE_TERMINATING)
            );
            assert!(is_terminating(&f.cluster.get(&ns).await.unwrap()));
        }

        f.cluster.release_deletion(&ns);
        let mut tracker = StatusTracker::new();
        let outcome = f.disable(&mut tracker).await;
        assert_eq!(outcome, ToggleOutcome::settled(ToggleState::NotPresent));
        assert!(!removal_pending(&tracker));
        let status = tracker.report_status(&f.cluster, &f.engine, "1.0.0").await;
        assert!(status.components[0].available);
    }
}
