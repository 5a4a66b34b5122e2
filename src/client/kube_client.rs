//! # Kube-backed Cluster Client
//!
//! Resolves kinds by querying the one group version they belong to and caches
//! the answer per process, including the answer that a kind is not served.
//! A kind that discovery cannot find is reported as
//! [`ClientError::SchemaUnavailable`] so callers can skip instead of retrying.

use super::discovery::{gvk_of, is_unserved, resolve_cached, KindCache};
use super::{ClientError, ClusterClient, ObjectKey, RemoteClientFactory};
use async_trait::async_trait;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::{self, ApiCapabilities, Scope};
use kube::Client;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

type Resolved = (ApiResource, ApiCapabilities);

/// [`ClusterClient`] over a live API server
pub struct KubeClusterClient {
    client: Client,
    field_manager: String,
    resolved: RwLock<KindCache<Resolved>>,
}

impl std::fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterClient")
            .field("field_manager", &self.field_manager)
            .finish_non_exhaustive()
    }
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            field_manager: crate::constants::FIELD_MANAGER.to_string(),
            resolved: RwLock::new(KindCache::default()),
        }
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Resolve a kind against its own group version only
    async fn resolve(&self, api_version: &str, kind: &str) -> Result<Resolved, ClientError> {
        let gvk = gvk_of(api_version, kind);
        resolve_cached(&self.resolved, &gvk, || async {
            match discovery::pinned_kind(&self.client, &gvk).await {
                Ok(found) => {
                    info!(api_version, kind, "Resolved kind via API discovery");
                    Ok(Some(found))
                }
                Err(e) if is_unserved(&e) => {
                    debug!(api_version, kind, error = %e, "Kind is not served");
                    Ok(None)
                }
                Err(e) => Err(ClientError::from_kube(e, kind, api_version)),
            }
        })
        .await
    }

    async fn api_for(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
    ) -> Result<Api<DynamicObject>, ClientError> {
        let (ar, caps) = self.resolve(api_version, kind).await?;
        Ok(match (&caps.scope, namespace) {
            (Scope::Namespaced, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        })
    }

    async fn api_for_object(
        &self,
        obj: &DynamicObject,
    ) -> Result<(Api<DynamicObject>, ObjectKey), ClientError> {
        let key = ObjectKey::of(obj)?;
        let api = self
            .api_for(&key.api_version, &key.kind, key.namespace.as_deref())
            .await?;
        Ok((api, key))
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get(&self, key: &ObjectKey) -> Result<DynamicObject, ClientError> {
        let api = self
            .api_for(&key.api_version, &key.kind, key.namespace.as_deref())
            .await?;
        api.get(&key.name)
            .await
            .map_err(|e| ClientError::from_kube(e, &key.kind, &key.name))
    }

    async fn list(
        &self,
        api_version: &str,
        kind: &str,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, ClientError> {
        let api = self.api_for(api_version, kind, None).await?;
        let list = api
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(|e| ClientError::from_kube(e, kind, label_selector))?;
        Ok(list.items)
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, ClientError> {
        let (api, key) = self.api_for_object(obj).await?;
        let params = PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        api.create(&params, obj)
            .await
            .map_err(|e| ClientError::from_kube(e, &key.kind, &key.name))
    }

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject, ClientError> {
        let (api, key) = self.api_for_object(obj).await?;
        let params = PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        api.replace(&key.name, &params, obj)
            .await
            .map_err(|e| ClientError::from_kube(e, &key.kind, &key.name))
    }

    async fn update_status(&self, obj: &DynamicObject) -> Result<DynamicObject, ClientError> {
        let (api, key) = self.api_for_object(obj).await?;
        let params = PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        let body = serde_json::to_vec(obj)?;
        api.replace_status(&key.name, &params, body)
            .await
            .map_err(|e| ClientError::from_kube(e, &key.kind, &key.name))
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), ClientError> {
        let api = self
            .api_for(&key.api_version, &key.kind, key.namespace.as_deref())
            .await?;
        api.delete(&key.name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| ClientError::from_kube(e, &key.kind, &key.name))
    }

    async fn patch_merge(
        &self,
        key: &ObjectKey,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject, ClientError> {
        let api = self
            .api_for(&key.api_version, &key.kind, key.namespace.as_deref())
            .await?;
        api.patch(
            &key.name,
            &PatchParams::apply(&self.field_manager),
            &Patch::Merge(patch),
        )
        .await
        .map_err(|e| ClientError::from_kube(e, &key.kind, &key.name))
    }
}

/// Builds [`KubeClusterClient`]s for hosted clusters
#[derive(Debug, Default)]
pub struct KubeRemoteClientFactory;

#[async_trait]
impl RemoteClientFactory for KubeRemoteClientFactory {
    async fn connect(&self, kubeconfig: &[u8]) -> Result<Arc<dyn ClusterClient>, ClientError> {
        let raw = std::str::from_utf8(kubeconfig)
            .map_err(|e| ClientError::InvalidObject(format!("kubeconfig is not UTF-8: {e}")))?;
        let kubeconfig = Kubeconfig::from_yaml(raw)
            .map_err(|e| ClientError::InvalidObject(format!("invalid kubeconfig: {e}")))?;
        let config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| ClientError::Other(anyhow::Error::new(e)))?;
        let client = Client::try_from(config).map_err(|e| ClientError::from_kube(e, "", ""))?;
        Ok(Arc::new(KubeClusterClient::new(client)))
    }
}
