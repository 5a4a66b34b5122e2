//! Existence and absence probes over a fixed list of resources.

use super::condition::probe_error_status;
use super::StatusReporter;
use crate::client::{ClusterClient, ObjectKey};
use crate::crd::{reason, ComponentCondition, ConditionStatus};
use async_trait::async_trait;
use tracing::debug;

const COMPONENT_KIND: &str = "Component";

fn join_keys(keys: &[&ObjectKey]) -> String {
    keys.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Requires every listed resource to exist
#[derive(Debug, Clone)]
pub struct PresentStatus {
    name: String,
    namespace: String,
    kind: String,
    resources: Vec<ObjectKey>,
}

impl PresentStatus {
    pub fn new(name: &str, namespace: &str, resources: Vec<ObjectKey>) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            kind: COMPONENT_KIND.to_string(),
            resources,
        }
    }

    /// Presence of a single resource, identified by that resource
    pub fn single(key: ObjectKey) -> Self {
        Self {
            name: key.name.clone(),
            namespace: key.namespace.clone().unwrap_or_default(),
            kind: key.kind.clone(),
            resources: vec![key],
        }
    }
}

#[async_trait]
impl StatusReporter for PresentStatus {
    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    async fn status(&self, client: &dyn ClusterClient) -> ComponentCondition {
        let mut missing = Vec::new();
        for key in &self.resources {
            match client.get(key).await {
                Ok(_) => {}
                Err(e) if e.is_absent() => missing.push(key),
                Err(e) => {
                    debug!(resource = %key, error = %e, "Presence probe failed");
                    return probe_error_status(&self.name, &self.kind);
                }
            }
        }

        if missing.is_empty() {
            ComponentCondition {
                name: self.name.clone(),
                kind: self.kind.clone(),
                r#type: "Present".to_string(),
                status: ConditionStatus::True,
                reason: Some(reason::COMPONENTS_DEPLOYED.to_string()),
                available: true,
                ..Default::default()
            }
        } else {
            ComponentCondition {
                name: self.name.clone(),
                kind: self.kind.clone(),
                r#type: "Present".to_string(),
                status: ConditionStatus::False,
                reason: Some(reason::FAILED_DEPLOYING_COMPONENT.to_string()),
                message: Some(format!(
                    "The following resource is missing: {}",
                    join_keys(&missing)
                )),
                available: false,
                ..Default::default()
            }
        }
    }
}

/// Requires every listed resource to be absent
#[derive(Debug, Clone)]
pub struct DisabledStatus {
    name: String,
    namespace: String,
    resources: Vec<ObjectKey>,
    explanation: Option<String>,
}

impl DisabledStatus {
    /// A component that must not be installed, with a reason shown while it lingers
    pub fn new(name: &str, namespace: &str, explanation: &str, resources: Vec<ObjectKey>) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            resources,
            explanation: Some(explanation.to_string()),
        }
    }

    /// A component that was switched off by its toggle
    pub fn toggled_off(name: &str, namespace: &str, resources: Vec<ObjectKey>) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            resources,
            explanation: None,
        }
    }

    pub fn resources(&self) -> &[ObjectKey] {
        &self.resources
    }
}

#[async_trait]
impl StatusReporter for DisabledStatus {
    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn kind(&self) -> &str {
        COMPONENT_KIND
    }

    async fn status(&self, client: &dyn ClusterClient) -> ComponentCondition {
        let mut remaining = Vec::new();
        for key in &self.resources {
            match client.get(key).await {
                Ok(_) => remaining.push(key),
                Err(e) if e.is_absent() => {}
                Err(e) => {
                    debug!(resource = %key, error = %e, "Absence probe failed");
                    return probe_error_status(&self.name, COMPONENT_KIND);
                }
            }
        }

        if remaining.is_empty() {
            return ComponentCondition {
                name: self.name.clone(),
                kind: COMPONENT_KIND.to_string(),
                r#type: "NotPresent".to_string(),
                status: ConditionStatus::True,
                reason: Some(reason::COMPONENT_DISABLED.to_string()),
                message: Some("No resources present".to_string()),
                available: true,
                ..Default::default()
            };
        }

        let listing = format!("The following resources remain: {}", join_keys(&remaining));
        let message = match &self.explanation {
            Some(explanation) => format!("{explanation}. {listing}"),
            None => listing,
        };
        ComponentCondition {
            name: self.name.clone(),
            kind: COMPONENT_KIND.to_string(),
            r#type: "NotPresent".to_string(),
            status: ConditionStatus::False,
            reason: Some(reason::RESOURCES_PRESENT.to_string()),
            message: Some(message),
            available: false,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{InMemoryCluster, Verb};

    fn svc(name: &str) -> ObjectKey {
        ObjectKey::new("v1", "Service", Some("ns"), name)
    }

    #[tokio::test]
    async fn test_disabled_all_absent_is_available() {
        let cluster = InMemoryCluster::new();
        let reporter = DisabledStatus::toggled_off("console", "ns", vec![svc("a"), svc("b")]);
        let condition = reporter.status(&cluster).await;
        assert!(condition.available);
        assert_eq!(condition.r#type, "NotPresent");
        assert_eq!(condition.status, ConditionStatus::True);
    }

    #[tokio::test]
    async fn test_disabled_lists_remaining_resources() {
        let cluster = InMemoryCluster::new();
        cluster.insert(svc("b").to_object()).unwrap();
        let reporter = DisabledStatus::toggled_off("console", "ns", vec![svc("a"), svc("b")]);
        let condition = reporter.status(&cluster).await;
        assert!(!condition.available);
        assert_eq!(condition.status, ConditionStatus::False);
        let message = condition.message.unwrap();
        assert!(message.contains("<Service ns/b>"));
        assert!(!message.contains("<Service ns/a>"));
    }

    #[tokio::test]
    async fn test_disabled_explanation_prefixes_message() {
        let cluster = InMemoryCluster::new();
        cluster.insert(svc("old").to_object()).unwrap();
        let reporter = DisabledStatus::new("legacy", "ns", "Old resources must be removed", vec![svc("old")]);
        let message = reporter.status(&cluster).await.message.unwrap();
        assert!(message.starts_with("Old resources must be removed. The following resources remain:"));
    }

    #[tokio::test]
    async fn test_present_reports_missing_resource() {
        let cluster = InMemoryCluster::new();
        cluster.insert(svc("a").to_object()).unwrap();
        let reporter = PresentStatus::new("addon", "ns", vec![svc("a"), svc("b")]);
        let condition = reporter.status(&cluster).await;
        assert!(!condition.available);
        assert_eq!(condition.r#type, "Present");
        assert!(condition.message.unwrap().contains("<Service ns/b>"));
    }

    #[tokio::test]
    async fn test_present_treats_missing_schema_as_missing() {
        let cluster = InMemoryCluster::new();
        cluster.unregister_kind("Service");
        let condition = PresentStatus::single(svc("a")).status(&cluster).await;
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.kind, "Service");
    }

    #[tokio::test]
    async fn test_present_all_exist_is_available() {
        let cluster = InMemoryCluster::new();
        cluster.insert(svc("a").to_object()).unwrap();
        let condition = PresentStatus::single(svc("a")).status(&cluster).await;
        assert!(condition.available);
        assert_eq!(condition.status, ConditionStatus::True);
    }

    #[tokio::test]
    async fn test_probe_errors_become_unknown() {
        let cluster = InMemoryCluster::new();
        cluster.inject_failure(Verb::Get, "Service", 503, "unavailable");
        let condition = DisabledStatus::toggled_off("x", "ns", vec![svc("a")])
            .status(&cluster)
            .await;
        assert_eq!(condition.r#type, "Unknown");
        assert!(!condition.available);
    }
}
