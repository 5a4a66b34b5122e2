//! Caller-supplied fixed condition, for readiness that cluster state alone
//! cannot express.

use super::StatusReporter;
use crate::client::ClusterClient;
use crate::crd::{ComponentCondition, ConditionStatus};
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct StaticStatus {
    name: String,
    namespace: String,
    kind: String,
    condition: ComponentCondition,
}

impl StaticStatus {
    /// `kind` defaults to `Component` when empty
    pub fn new(name: &str, namespace: &str, kind: &str, condition: ComponentCondition) -> Self {
        let kind = if kind.is_empty() { "Component" } else { kind };
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            kind: kind.to_string(),
            condition,
        }
    }

    /// A component held back until an external resource exists
    pub fn waiting_for(name: &str, namespace: &str, kind: &str, message: &str) -> Self {
        Self::new(
            name,
            namespace,
            kind,
            ComponentCondition {
                r#type: "Available".to_string(),
                status: ConditionStatus::False,
                reason: Some(crate::crd::reason::WAITING_FOR_RESOURCE.to_string()),
                message: Some(message.to_string()),
                available: false,
                ..Default::default()
            },
        )
    }
}

#[async_trait]
impl StatusReporter for StaticStatus {
    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    async fn status(&self, _client: &dyn ClusterClient) -> ComponentCondition {
        ComponentCondition {
            name: self.name.clone(),
            kind: self.kind.clone(),
            ..self.condition.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InMemoryCluster;

    #[tokio::test]
    async fn test_static_returns_condition_with_identity() {
        let reporter = StaticStatus::new(
            "console",
            "",
            "",
            ComponentCondition {
                r#type: "Available".to_string(),
                status: ConditionStatus::False,
                message: Some("requires an external console operator to exist first".to_string()),
                available: true,
                ..Default::default()
            },
        );
        let condition = reporter.status(&InMemoryCluster::new()).await;
        assert_eq!(condition.name, "console");
        assert_eq!(condition.kind, "Component");
        assert!(condition.available);
    }

    #[tokio::test]
    async fn test_waiting_for_is_unavailable() {
        let reporter = StaticStatus::waiting_for("addon", "ns", "CustomResourceDefinition", "waiting");
        let condition = reporter.status(&InMemoryCluster::new()).await;
        assert!(!condition.available);
        assert_eq!(
            condition.reason.as_deref(),
            Some(crate::crd::reason::WAITING_FOR_RESOURCE)
        );
    }
}
