//! Probe for operator-managed custom resources that publish their own
//! `status.conditions` list with a distinguished success type.

use super::condition::{probe_error_status, unknown_status};
use super::StatusReporter;
use crate::client::{ClusterClient, ObjectKey};
use crate::crd::{ComponentCondition, ConditionStatus};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

/// Reports a custom resource as available when its success condition is `True`
#[derive(Debug, Clone)]
pub struct OperatorResourceStatus {
    key: ObjectKey,
    namespace: String,
    success_type: String,
}

impl OperatorResourceStatus {
    pub fn new(key: ObjectKey, success_type: &str) -> Self {
        let namespace = key.namespace.clone().unwrap_or_default();
        Self {
            key,
            namespace,
            success_type: success_type.to_string(),
        }
    }

    /// `ClusterManager` reports success through `Applied`
    pub fn cluster_manager(name: &str) -> Self {
        Self::new(
            ObjectKey::cluster_scoped("operator.open-cluster-management.io/v1", "ClusterManager", name),
            "Applied",
        )
    }

    /// `ManagedClusterAddOn` reports success through `Available`
    pub fn managed_cluster_addon(name: &str, namespace: &str) -> Self {
        Self::new(
            ObjectKey::new(
                "addon.open-cluster-management.io/v1alpha1",
                "ManagedClusterAddOn",
                Some(namespace),
                name,
            ),
            "Available",
        )
    }

    fn map(&self, data: &Value) -> ComponentCondition {
        let Some(conditions) = data.pointer("/status/conditions").and_then(Value::as_array) else {
            return unknown_status(&self.key.name, &self.key.kind);
        };

        let mut last = None;
        for raw in conditions {
            let Some(condition) = self.parse(raw) else {
                return unknown_status(&self.key.name, &self.key.kind);
            };
            if condition.r#type == self.success_type && condition.status == ConditionStatus::True {
                return ComponentCondition {
                    available: true,
                    ..condition
                };
            }
            last = Some(condition);
        }
        last.unwrap_or_else(|| unknown_status(&self.key.name, &self.key.kind))
    }

    fn parse(&self, raw: &Value) -> Option<ComponentCondition> {
        let field = |name: &str| raw.get(name).and_then(Value::as_str).map(str::to_string);
        Some(ComponentCondition {
            name: self.key.name.clone(),
            kind: self.key.kind.clone(),
            r#type: field("type")?,
            status: ConditionStatus::parse(&field("status")?),
            last_update_time: field("lastUpdateTime"),
            last_transition_time: field("lastTransitionTime"),
            reason: field("reason"),
            message: field("message"),
            available: false,
        })
    }
}

#[async_trait]
impl StatusReporter for OperatorResourceStatus {
    fn name(&self) -> &str {
        &self.key.name
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn kind(&self) -> &str {
        &self.key.kind
    }

    async fn status(&self, client: &dyn ClusterClient) -> ComponentCondition {
        match client.get(&self.key).await {
            Ok(obj) => self.map(&obj.data),
            Err(e) if e.is_absent() => unknown_status(&self.key.name, &self.key.kind),
            Err(e) => {
                debug!(resource = %self.key, error = %e, "Failed to read operator resource");
                probe_error_status(&self.key.name, &self.key.kind)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InMemoryCluster;
    use serde_json::json;

    fn cluster_manager(conditions: Value) -> kube::api::DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "operator.open-cluster-management.io/v1",
            "kind": "ClusterManager",
            "metadata": {"name": "cluster-manager"},
            "status": {"conditions": conditions}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_success_type_true_is_available() {
        let cluster = InMemoryCluster::new();
        cluster
            .insert(cluster_manager(json!([
                {"type": "HubRegistrationDegraded", "status": "False"},
                {"type": "Applied", "status": "True", "reason": "ClusterManagerApplied"}
            ])))
            .unwrap();
        let condition = OperatorResourceStatus::cluster_manager("cluster-manager")
            .status(&cluster)
            .await;
        assert!(condition.available);
        assert_eq!(condition.r#type, "Applied");
        assert_eq!(condition.kind, "ClusterManager");
    }

    #[tokio::test]
    async fn test_without_success_returns_last_condition() {
        let cluster = InMemoryCluster::new();
        cluster
            .insert(cluster_manager(json!([
                {"type": "Applied", "status": "False"},
                {"type": "HubRegistrationDegraded", "status": "True", "reason": "Degraded"}
            ])))
            .unwrap();
        let condition = OperatorResourceStatus::cluster_manager("cluster-manager")
            .status(&cluster)
            .await;
        assert!(!condition.available);
        assert_eq!(condition.r#type, "HubRegistrationDegraded");
        assert_eq!(condition.reason.as_deref(), Some("Degraded"));
    }

    #[tokio::test]
    async fn test_empty_or_malformed_list_is_unknown() {
        let cluster = InMemoryCluster::new();
        cluster.insert(cluster_manager(json!([]))).unwrap();
        let reporter = OperatorResourceStatus::cluster_manager("cluster-manager");
        assert_eq!(reporter.status(&cluster).await.r#type, "Unknown");

        let malformed = InMemoryCluster::new();
        malformed
            .insert(cluster_manager(json!([{"status": "True"}])))
            .unwrap();
        assert_eq!(reporter.status(&malformed).await.r#type, "Unknown");

        let not_a_list = InMemoryCluster::new();
        not_a_list
            .insert(cluster_manager(json!("oops")))
            .unwrap();
        assert_eq!(reporter.status(&not_a_list).await.r#type, "Unknown");
    }
}
