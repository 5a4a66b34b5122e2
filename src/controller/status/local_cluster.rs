//! Registration status of the hub's own `ManagedCluster`.
//!
//! Enabled, the cluster is ready once it has been accepted, has joined and
//! reports itself available. Disabled, it is done once the resource is gone.

use super::condition::{probe_error_status, unknown_status};
use super::StatusReporter;
use crate::client::{ClusterClient, ObjectKey};
use crate::crd::{ComponentCondition, ConditionStatus};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

const KIND: &str = "local-cluster";

const ACCEPTED: &str = "HubAcceptedManagedCluster";
const JOINED: &str = "ManagedClusterJoined";
const AVAILABLE: &str = "ManagedClusterConditionAvailable";

/// Reports registration of the local `ManagedCluster`
#[derive(Debug, Clone)]
pub struct LocalClusterStatus {
    name: String,
    namespace: String,
    managed_cluster: ObjectKey,
    enabled: bool,
}

impl LocalClusterStatus {
    pub fn enabled(name: &str, namespace: &str, managed_cluster: ObjectKey) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            managed_cluster,
            enabled: true,
        }
    }

    pub fn disabled(name: &str, namespace: &str, managed_cluster: ObjectKey) -> Self {
        Self {
            enabled: false,
            ..Self::enabled(name, namespace, managed_cluster)
        }
    }

    fn condition(&self, r#type: &str, status: ConditionStatus) -> ComponentCondition {
        ComponentCondition {
            name: self.name.clone(),
            kind: KIND.to_string(),
            r#type: r#type.to_string(),
            status,
            ..Default::default()
        }
    }

    fn enabled_status(&self, conditions: &[Value]) -> ComponentCondition {
        let Some(latest) = conditions.last() else {
            return unknown_status(&self.name, KIND);
        };
        let has = |t: &str| conditions.iter().any(|c| c["type"] == t);

        if has(ACCEPTED) && has(JOINED) && has(AVAILABLE) {
            return ComponentCondition {
                reason: Some("ManagedClusterImported".to_string()),
                message: Some("ManagedCluster is accepted, joined, and available".to_string()),
                available: true,
                ..self.condition("ManagedClusterImportSuccess", ConditionStatus::True)
            };
        }

        let field = |k: &str| latest.get(k).and_then(Value::as_str).map(str::to_string);
        ComponentCondition {
            reason: field("reason"),
            message: field("message"),
            last_transition_time: field("lastTransitionTime"),
            ..self.condition(
                &field("type").unwrap_or_default(),
                ConditionStatus::parse(&field("status").unwrap_or_default()),
            )
        }
    }

    fn disabled_status(&self, present: bool) -> ComponentCondition {
        let reason = Some("ManagedClusterDisabled".to_string());
        if present {
            ComponentCondition {
                reason,
                message: Some("ManagedCluster resource is still present".to_string()),
                ..self.condition("NotPresent", ConditionStatus::False)
            }
        } else {
            ComponentCondition {
                reason,
                message: Some("ManagedCluster resource is not present".to_string()),
                available: true,
                ..self.condition("NotPresent", ConditionStatus::True)
            }
        }
    }
}

#[async_trait]
impl StatusReporter for LocalClusterStatus {
    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn kind(&self) -> &str {
        KIND
    }

    async fn status(&self, client: &dyn ClusterClient) -> ComponentCondition {
        let found = match client.get(&self.managed_cluster).await {
            Ok(obj) => Some(obj),
            Err(e) if e.is_absent() => None,
            Err(e) => {
                debug!(resource = %self.managed_cluster, error = %e, "Failed to read managed cluster");
                return probe_error_status(&self.name, KIND);
            }
        };

        if !self.enabled {
            return self.disabled_status(found.is_some());
        }
        let conditions = found
            .as_ref()
            .and_then(|mc| mc.data.pointer("/status/conditions"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        self.enabled_status(conditions)
    }
}
