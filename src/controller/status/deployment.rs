//! Workload rollout probe.
//!
//! The Deployment's native `Available=True` is weaker than what we call
//! success: any unavailable replica or `Available=False` condition means the
//! rollout is still in flight. When the native signal is green but we disagree,
//! the `Progressing` condition is shown instead.

use super::condition::{probe_error_status, unknown_status};
use super::StatusReporter;
use crate::client::{ClientError, ClusterClient, ObjectKey};
use crate::crd::{ComponentCondition, ConditionStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

const KIND: &str = "Deployment";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RolloutStatus {
    #[serde(default)]
    conditions: Vec<RolloutCondition>,
    #[serde(default)]
    unavailable_replicas: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RolloutCondition {
    r#type: String,
    status: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    last_update_time: Option<String>,
    #[serde(default)]
    last_transition_time: Option<String>,
}

impl RolloutCondition {
    fn transitioned_at(&self) -> Option<DateTime<Utc>> {
        self.last_transition_time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
    }

    fn to_component(&self, name: &str) -> ComponentCondition {
        ComponentCondition {
            name: name.to_string(),
            kind: KIND.to_string(),
            r#type: self.r#type.clone(),
            status: ConditionStatus::parse(&self.status),
            last_update_time: self.last_update_time.clone(),
            last_transition_time: self.last_transition_time.clone(),
            reason: self.reason.clone(),
            message: self.message.clone(),
            available: false,
        }
    }
}

/// Reports the rollout state of one Deployment
#[derive(Debug, Clone)]
pub struct DeploymentStatus {
    name: String,
    namespace: String,
}

impl DeploymentStatus {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new("apps/v1", KIND, Some(&self.namespace), &self.name)
    }

    /// Whether any native condition reads `Available=True`, however the
    /// rollout as a whole is judged
    pub async fn natively_available(&self, client: &dyn ClusterClient) -> Result<bool, ClientError> {
        match client.get(&self.key()).await {
            Ok(obj) => Ok(obj
                .data
                .pointer("/status/conditions")
                .and_then(serde_json::Value::as_array)
                .is_some_and(|conditions| {
                    conditions
                        .iter()
                        .any(|c| c["type"] == "Available" && c["status"] == "True")
                })),
            Err(e) if e.is_absent() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl StatusReporter for DeploymentStatus {
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
        match client.get(&self.key()).await {
            Ok(obj) => {
                let rollout = obj
                    .data
                    .get("status")
                    .cloned()
                    .map(serde_json::from_value::<RolloutStatus>)
                    .transpose();
                match rollout {
                    Ok(rollout) => map_rollout(&self.name, &rollout.unwrap_or_default()),
                    Err(e) => {
                        debug!(deployment = %self.name, error = %e, "Unreadable deployment status");
                        unknown_status(&self.name, KIND)
                    }
                }
            }
            Err(e) if e.is_absent() => unknown_status(&self.name, KIND),
            Err(e) => {
                debug!(deployment = %self.name, error = %e, "Failed to read deployment");
                probe_error_status(&self.name, KIND)
            }
        }
    }
}

fn latest_condition(conditions: &[RolloutCondition]) -> Option<&RolloutCondition> {
    let mut iter = conditions.iter();
    let mut latest = iter.next()?;
    for c in iter {
        if c.transitioned_at() > latest.transitioned_at() {
            latest = c;
        }
    }
    Some(latest)
}

fn successful_rollout(status: &RolloutStatus) -> bool {
    let available_false = status
        .conditions
        .iter()
        .any(|c| c.r#type == "Available" && c.status == "False");
    !available_false && status.unavailable_replicas.unwrap_or(0) == 0
}

fn map_rollout(name: &str, status: &RolloutStatus) -> ComponentCondition {
    let Some(latest) = latest_condition(&status.conditions) else {
        return unknown_status(name, KIND);
    };

    let mut condition = latest.to_component(name);
    if successful_rollout(status) {
        condition.available = true;
        condition.message = None;
        return condition;
    }

    if latest.r#type == "Available" && latest.status == "True" {
        if let Some(progressing) = status.conditions.iter().find(|c| c.r#type == "Progressing") {
            condition = progressing.to_component(name);
        }
    }
    condition
}
