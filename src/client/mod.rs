//! # Cluster Client
//!
//! The seam between the reconcile engine and the cluster API. Everything the
//! engine reads or writes goes through [`ClusterClient`], keyed by
//! `(apiVersion, kind, namespace, name)` over untyped [`DynamicObject`]s.
//!
//! - `kube_client` - implementation backed by a real `kube::Client`
//! - `discovery` - kind resolution cache used by `kube_client`
//! - `memory` - in-process implementation used by tests and local runs

mod discovery;
mod error;
mod kube_client;
mod memory;

pub use kube_client::{KubeClusterClient, KubeRemoteClientFactory};
pub use discovery::{KindCache, MISSING_KIND_TTL};
pub use error::ClientError;
pub use memory::{InMemoryCluster, InMemoryRemoteFactory, Verb};

use kube::api::{DynamicObject, TypeMeta};
use kube::ResourceExt;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Identity of a single object on the cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(api_version: &str, kind: &str, namespace: Option<&str>, name: &str) -> Self {
        Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            namespace: namespace.filter(|ns| !ns.is_empty()).map(str::to_string),
            name: name.to_string(),
        }
    }

    pub fn cluster_scoped(api_version: &str, kind: &str, name: &str) -> Self {
        Self::new(api_version, kind, None, name)
    }

    /// Key of an existing object, taken from its type and metadata
    pub fn of(obj: &DynamicObject) -> Result<Self, ClientError> {
        let types = obj
            .types
            .as_ref()
            .ok_or_else(|| ClientError::InvalidObject("object has no apiVersion/kind".into()))?;
        let name = obj
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ClientError::InvalidObject(format!("{} has no name", types.kind)))?;
        Ok(Self::new(
            &types.api_version,
            &types.kind,
            obj.metadata.namespace.as_deref(),
            name,
        ))
    }

    /// Empty object carrying only this identity
    pub fn to_object(&self) -> DynamicObject {
        let mut obj = DynamicObject {
            types: Some(TypeMeta {
                api_version: self.api_version.clone(),
                kind: self.kind.clone(),
            }),
            metadata: Default::default(),
            data: serde_json::Value::Object(Default::default()),
        };
        obj.metadata.name = Some(self.name.clone());
        obj.metadata.namespace = self.namespace.clone();
        obj
    }

    /// Split `apiVersion` into group and version
    pub fn group_version(&self) -> (&str, &str) {
        match self.api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", self.api_version.as_str()),
        }
    }
}

impl fmt::Display for ObjectKey {
    /// `<Kind ns/name>` form used in status messages
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "<{} {}/{}>", self.kind, ns, self.name),
            None => write!(f, "<{} {}>", self.kind, self.name),
        }
    }
}

/// Operations the engine needs from the cluster API
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> Result<DynamicObject, ClientError>;

    /// List objects of a kind across all namespaces matching a label selector
    async fn list(
        &self,
        api_version: &str,
        kind: &str,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, ClientError>;

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, ClientError>;

    /// Replace an object; a stale `resourceVersion` yields [`ClientError::Conflict`]
    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject, ClientError>;

    /// Replace the status subresource of an object
    async fn update_status(&self, obj: &DynamicObject) -> Result<DynamicObject, ClientError>;

    async fn delete(&self, key: &ObjectKey) -> Result<(), ClientError>;

    /// JSON merge patch against the main resource
    async fn patch_merge(
        &self,
        key: &ObjectKey,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject, ClientError>;
}

/// Builds clients for remote clusters from kubeconfig contents
#[async_trait]
pub trait RemoteClientFactory: Send + Sync {
    async fn connect(&self, kubeconfig: &[u8]) -> Result<Arc<dyn ClusterClient>, ClientError>;
}

/// Fetch an object, mapping absence to `None`
pub async fn get_optional(
    client: &dyn ClusterClient,
    key: &ObjectKey,
) -> Result<Option<DynamicObject>, ClientError> {
    match client.get(key).await {
        Ok(obj) => Ok(Some(obj)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Convert a typed resource into a dynamic object
pub fn to_dynamic<K>(resource: &K) -> Result<DynamicObject, ClientError>
where
    K: kube::Resource<DynamicType = ()> + Serialize,
{
    let mut obj: DynamicObject = serde_json::from_value(serde_json::to_value(resource)?)?;
    if obj.types.is_none() {
        obj.types = Some(TypeMeta {
            api_version: K::api_version(&()).to_string(),
            kind: K::kind(&()).to_string(),
        });
    }
    Ok(obj)
}

/// Convert a dynamic object into a typed resource
pub fn from_dynamic<K: DeserializeOwned>(obj: &DynamicObject) -> Result<K, ClientError> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

/// Whether an object has been marked for deletion but is not gone yet
pub fn is_terminating(obj: &DynamicObject) -> bool {
    obj.metadata.deletion_timestamp.is_some()
}

/// Label selector matching everything installed for a managing resource
pub fn installer_selector(name: &str) -> String {
    format!("{}={}", crate::constants::INSTALLER_NAME_LABEL, name)
}

/// Stamp installer labels on an object
pub fn set_installer_labels(obj: &mut DynamicObject, name: &str, namespace: &str) {
    let labels = obj.labels_mut();
    labels.insert(
        crate::constants::INSTALLER_NAME_LABEL.to_string(),
        name.to_string(),
    );
    labels.insert(
        crate::constants::INSTALLER_NAMESPACE_LABEL.to_string(),
        namespace.to_string(),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_display() {
        let namespaced = ObjectKey::new("v1", "Service", Some("ns"), "svc");
        assert_eq!(namespaced.to_string(), "<Service ns/svc>");
        let cluster = ObjectKey::cluster_scoped("v1", "Namespace", "ns");
        assert_eq!(cluster.to_string(), "<Namespace ns>");
    }

    #[test]
    fn test_object_key_empty_namespace_is_cluster_scoped() {
        let key = ObjectKey::new("v1", "Namespace", Some(""), "ns");
        assert_eq!(key.namespace, None);
    }

    #[test]
    fn test_object_key_round_trips_through_object() {
        let key = ObjectKey::new("apps/v1", "Deployment", Some("ns"), "web");
        let obj = key.to_object();
        assert_eq!(ObjectKey::of(&obj).unwrap(), key);
        assert_eq!(key.group_version(), ("apps", "v1"));
    }

    #[test]
    fn test_object_key_requires_types() {
        let mut obj = ObjectKey::cluster_scoped("v1", "Namespace", "ns").to_object();
        obj.types = None;
        assert!(ObjectKey::of(&obj).is_err());
    }

    #[test]
    fn test_typed_conversion_sets_type_meta() {
        let engine = crate::PlatformEngine::new("engine", crate::PlatformEngineSpec::default());
        let obj = to_dynamic(&engine).unwrap();
        let types = obj.types.as_ref().unwrap();
        assert_eq!(types.kind, "PlatformEngine");
        assert_eq!(types.api_version, "platform.microscaler.io/v1");
        let back: crate::PlatformEngine = from_dynamic(&obj).unwrap();
        assert_eq!(back.metadata.name.as_deref(), Some("engine"));
    }
}
