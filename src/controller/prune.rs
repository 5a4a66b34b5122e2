//! # Legacy Resource Pruning
//!
//! Removes resources installed by older releases that no current component
//! renders. Progress is tracked through a [`DisabledStatus`] over the whole
//! list, so the aggregate status names anything that lingers.

use crate::client::{ClientError, ClusterClient, ObjectKey};
use crate::controller::status::condition::{get_condition, new_condition};
use crate::controller::status::{DisabledStatus, StatusTracker};
use crate::crd::{condition_type, reason, ConditionStatus};
use thiserror::Error;
use tracing::{debug, info};

const REPORTER_NAME: &str = "legacy-removals";

#[derive(Debug, Error)]
pub enum PruneError {
    #[error("failed to remove obsolete resource {key}: {source}")]
    Remove {
        key: String,
        #[source]
        source: ClientError,
    },
}

/// Resources from previous releases, in removal order
pub fn obsolete_resources(target_namespace: &str) -> Vec<ObjectKey> {
    let ns = Some(target_namespace);
    let role = "platform-engine:hypershift-preview:leader-election";
    let cluster_role = "platform-engine:hypershift-preview:deployment-controller";
    vec![
        ObjectKey::new("v1", "ServiceAccount", ns, "hypershift-deployment"),
        ObjectKey::new("apps/v1", "Deployment", ns, "hypershift-deployment-controller"),
        ObjectKey::new("rbac.authorization.k8s.io/v1", "Role", ns, role),
        ObjectKey::new("rbac.authorization.k8s.io/v1", "RoleBinding", ns, role),
        ObjectKey::cluster_scoped(
            "apiextensions.k8s.io/v1",
            "CustomResourceDefinition",
            "hypershiftdeployments.cluster.open-cluster-management.io",
        ),
        ObjectKey::cluster_scoped("rbac.authorization.k8s.io/v1", "ClusterRole", cluster_role),
        ObjectKey::cluster_scoped("rbac.authorization.k8s.io/v1", "ClusterRoleBinding", cluster_role),
    ]
}

/// Remove one resource; `true` once it is confirmed gone
async fn remove(
    client: &dyn ClusterClient,
    key: &ObjectKey,
    tracker: &mut StatusTracker,
) -> Result<bool, PruneError> {
    let obj = match client.get(key).await {
        Ok(obj) => obj,
        Err(e) if e.is_absent() => return Ok(true),
        Err(source) => {
            return Err(PruneError::Remove {
                key: key.to_string(),
                source,
            })
        }
    };

    if obj.metadata.deletion_timestamp.is_some() {
        tracker.add_condition(new_condition(
            condition_type::PROGRESSING,
            ConditionStatus::Unknown,
            reason::OLD_COMPONENT_NOT_REMOVED,
            format!("Resource {}/{} finalizing", key.kind, key.name),
        ));
        return Ok(false);
    }

    if let Err(source) = client.delete(key).await {
        if source.is_absent() {
            return Ok(true);
        }
        tracker.add_condition(new_condition(
            condition_type::PROGRESSING,
            ConditionStatus::Unknown,
            reason::OLD_COMPONENT_NOT_REMOVED,
            format!("Failed to remove resource {}/{}", key.kind, key.name),
        ));
        return Err(PruneError::Remove {
            key: key.to_string(),
            source,
        });
    }

    info!(resource = %key, "Removed obsolete resource");
    tracker.add_condition(new_condition(
        condition_type::PROGRESSING,
        ConditionStatus::Unknown,
        reason::OLD_COMPONENT_REMOVED,
        "Removed old resource",
    ));
    Ok(false)
}

/// Remove every obsolete resource; returns whether all are gone
pub async fn prune_obsolete(
    client: &dyn ClusterClient,
    target_namespace: &str,
    tracker: &mut StatusTracker,
) -> Result<bool, PruneError> {
    let removals = obsolete_resources(target_namespace);
    tracker.add_component(DisabledStatus::new(
        REPORTER_NAME,
        target_namespace,
        "Resources from a previous release are being removed",
        removals.clone(),
    ));

    let mut all_gone = true;
    for key in &removals {
        if !remove(client, key, tracker).await? {
            all_gone = false;
        }
    }

    if !all_gone {
        debug!("Obsolete resources remain");
        return Ok(false);
    }

    let pruning_reported = get_condition(tracker.conditions(), condition_type::PROGRESSING)
        .and_then(|c| c.reason.as_deref())
        .is_some_and(|r| r == reason::OLD_COMPONENT_REMOVED || r == reason::OLD_COMPONENT_NOT_REMOVED);
    if pruning_reported {
        tracker.add_condition(new_condition(
            condition_type::PROGRESSING,
            ConditionStatus::True,
            reason::ALL_OLD_COMPONENTS_REMOVED,
            "All old resources pruned",
        ));
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InMemoryCluster;

    const NS: &str = "platform-engine";

    #[tokio::test]
    async fn test_nothing_to_prune() {
        let cluster = InMemoryCluster::new();
        let mut tracker = StatusTracker::new();
        assert!(prune_obsolete(&cluster, NS, &mut tracker).await.unwrap());
        assert!(tracker.is_tracked(REPORTER_NAME, NS));
        assert!(tracker.conditions().is_empty());
    }

    #[tokio::test]
    async fn test_removes_then_reports_completion() {
        let cluster = InMemoryCluster::new();
        let key = obsolete_resources(NS)[0].clone();
        cluster.insert(key.to_object()).unwrap();

        let mut tracker = StatusTracker::new();
        assert!(!prune_obsolete(&cluster, NS, &mut tracker).await.unwrap());
        assert!(!cluster.contains(&key));
        let progressing = get_condition(tracker.conditions(), condition_type::PROGRESSING).unwrap();
        assert_eq!(progressing.reason.as_deref(), Some(reason::OLD_COMPONENT_REMOVED));

        assert!(prune_obsolete(&cluster, NS, &mut tracker).await.unwrap());
        let progressing = get_condition(tracker.conditions(), condition_type::PROGRESSING).unwrap();
        assert_eq!(progressing.reason.as_deref(), Some(reason::ALL_OLD_COMPONENTS_REMOVED));
    }

    #[tokio::test]
    async fn test_finalizing_resource_keeps_waiting() {
        let cluster = InMemoryCluster::new();
        let key = obsolete_resources(NS)[1].clone();
        cluster.insert(key.to_object()).unwrap();
        cluster.hold_deletion(&key);

        let mut tracker = StatusTracker::new();
        assert!(!prune_obsolete(&cluster, NS, &mut tracker).await.unwrap());
        assert!(!prune_obsolete(&cluster, NS, &mut tracker).await.unwrap());
        let progressing = get_condition(tracker.conditions(), condition_type::PROGRESSING).unwrap();
        assert_eq!(progressing.reason.as_deref(), Some(reason::OLD_COMPONENT_NOT_REMOVED));
    }
}
