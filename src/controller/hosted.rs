//! # Hosted Mode
//!
//! When the managing resource is annotated as hosted, components run on a
//! remote cluster. The local pass only resolves credentials for that cluster
//! and makes sure the target namespace exists there.

use crate::client::{ClientError, ClusterClient, ObjectKey, RemoteClientFactory};
use crate::constants::{KUBECONFIG_ANNOTATION, KUBECONFIG_SECRET_KEY};
use crate::controller::status::{StaticStatus, StatusTracker};
use crate::crd::{ComponentCondition, ConditionStatus, PlatformEngine};
use base64::Engine;
use kube::ResourceExt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum HostedError {
    #[error("hosted mode requires the {KUBECONFIG_ANNOTATION} annotation")]
    MissingSecretName,

    #[error("kubeconfig secret {namespace}/{name} could not be read: {source}")]
    SecretUnavailable {
        namespace: String,
        name: String,
        #[source]
        source: ClientError,
    },

    #[error("{name}: bad format")]
    BadFormat { name: String },

    #[error("{name}: kubeconfig is not valid base64: {source}")]
    Decode {
        name: String,
        #[source]
        source: base64::DecodeError,
    },

    #[error("failed to connect to hosted cluster: {0}")]
    Connect(#[source] ClientError),

    #[error("failed to ensure namespace {namespace} on hosted cluster: {source}")]
    Namespace {
        namespace: String,
        #[source]
        source: ClientError,
    },
}

/// Read and decode the kubeconfig named by the managing resource
pub async fn hosted_kubeconfig(
    client: &dyn ClusterClient,
    engine: &PlatformEngine,
    namespace: &str,
) -> Result<Vec<u8>, HostedError> {
    let name = engine
        .annotations()
        .get(KUBECONFIG_ANNOTATION)
        .filter(|n| !n.is_empty())
        .ok_or(HostedError::MissingSecretName)?;

    let key = ObjectKey::new("v1", "Secret", Some(namespace), name);
    let secret = client
        .get(&key)
        .await
        .map_err(|source| HostedError::SecretUnavailable {
            namespace: namespace.to_string(),
            name: name.clone(),
            source,
        })?;

    let encoded = secret
        .data
        .pointer(&format!("/data/{KUBECONFIG_SECRET_KEY}"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| HostedError::BadFormat { name: name.clone() })?;
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|source| HostedError::Decode {
            name: name.clone(),
            source,
        })
}

/// Connect to the hosted cluster and ensure the target namespace exists there
pub async fn reconcile_hosted(
    client: &dyn ClusterClient,
    remote: &dyn RemoteClientFactory,
    engine: &PlatformEngine,
    target_namespace: &str,
    tracker: &mut StatusTracker,
) -> Result<Arc<dyn ClusterClient>, HostedError> {
    let kubeconfig = hosted_kubeconfig(client, engine, target_namespace).await?;
    let hosted = remote
        .connect(&kubeconfig)
        .await
        .map_err(HostedError::Connect)?;

    let namespace = ObjectKey::cluster_scoped("v1", "Namespace", target_namespace).to_object();
    match hosted.create(&namespace).await {
        Ok(_) => info!(namespace = target_namespace, "Created namespace on hosted cluster"),
        Err(e) if e.is_already_exists() => {
            debug!(namespace = target_namespace, "Namespace already present on hosted cluster");
        }
        Err(source) => {
            return Err(HostedError::Namespace {
                namespace: target_namespace.to_string(),
                source,
            })
        }
    }

    tracker.add_component(StaticStatus::new(
        target_namespace,
        "",
        "Namespace",
        ComponentCondition {
            r#type: "Available".to_string(),
            status: ConditionStatus::True,
            reason: Some("NamespaceExists".to_string()),
            message: Some("Target namespace exists on the hosted cluster".to_string()),
            available: true,
            ..Default::default()
        },
    ));
    Ok(hosted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{InMemoryCluster, InMemoryRemoteFactory};
    use crate::crd::PlatformEngineSpec;
    use serde_json::json;

    const NS: &str = "platform-engine";

    fn hosted_engine() -> PlatformEngine {
        let mut engine = PlatformEngine::new("engine", PlatformEngineSpec::default());
        engine
            .annotations_mut()
            .insert(KUBECONFIG_ANNOTATION.to_string(), "remote-kubeconfig".to_string());
        engine
    }

    fn seed_secret(cluster: &InMemoryCluster, data: serde_json::Value) {
        cluster
            .insert(
                serde_json::from_value(json!({
                    "apiVersion": "v1",
                    "kind": "Secret",
                    "metadata": {"name": "remote-kubeconfig", "namespace": NS},
                    "data": data,
                }))
                .unwrap(),
            )
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_annotation() {
        let engine = PlatformEngine::new("engine", PlatformEngineSpec::default());
        let err = hosted_kubeconfig(&InMemoryCluster::new(), &engine, NS)
            .await
            .unwrap_err();
        assert!(matches!(err, HostedError::MissingSecretName));
    }

    #[tokio::test]
    async fn test_secret_without_kubeconfig_key_is_bad_format() {
        let cluster = InMemoryCluster::new();
        seed_secret(&cluster, json!({"other": "eA=="}));
        let err = hosted_kubeconfig(&cluster, &hosted_engine(), NS)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "remote-kubeconfig: bad format");
    }

    #[tokio::test]
    async fn test_creates_namespace_on_remote() {
        let local = InMemoryCluster::new();
        seed_secret(&local, json!({"kubeconfig": "YXBpVmVyc2lvbjogdjE="}));
        let remote = Arc::new(InMemoryCluster::new());
        let factory = InMemoryRemoteFactory::new(remote.clone());
        let mut tracker = StatusTracker::new();

        reconcile_hosted(&local, &factory, &hosted_engine(), NS, &mut tracker)
            .await
            .unwrap();
        assert!(remote.contains(&ObjectKey::cluster_scoped("v1", "Namespace", NS)));
        assert!(!local.contains(&ObjectKey::cluster_scoped("v1", "Namespace", NS)));
        assert!(tracker.is_tracked(NS, ""));

        // Second pass tolerates the existing namespace
        reconcile_hosted(&local, &factory, &hosted_engine(), NS, &mut tracker)
            .await
            .unwrap();
    }
}
