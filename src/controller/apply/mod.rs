//! # Resource Applier
//!
//! Idempotent create-or-update of a single desired object against live state.
//!
//! A content hash of the desired object is recorded in an annotation on every
//! write. When the live object carries the same hash nothing is written. When
//! it differs, the per-kind [`StrategyTable`] decides what is written, always
//! carrying the live `resourceVersion` so a concurrent writer causes a conflict
//! instead of a lost update.

mod strategy;

pub use strategy::{merge_for_update, StrategyTable, UpdatePolicy};

use crate::client::{ClientError, ClusterClient, ObjectKey};
use crate::constants::LAST_APPLIED_ANNOTATION;
use crate::observability;
use kube::api::DynamicObject;
use kube::ResourceExt;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

/// What applying one object did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    Unchanged,
    /// The kind is not served by the cluster; nothing was written
    SchemaUnavailable,
}

impl ApplyOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ApplyOutcome::Created => "created",
            ApplyOutcome::Updated => "updated",
            ApplyOutcome::Unchanged => "unchanged",
            ApplyOutcome::SchemaUnavailable => "schema_unavailable",
        }
    }
}

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("failed to apply {key}: {source}")]
    Write {
        key: String,
        #[source]
        source: ClientError,
    },

    #[error("invalid desired object: {0}")]
    Invalid(#[source] ClientError),

    #[error("failed to hash desired object: {0}")]
    Hash(#[from] serde_json::Error),
}

impl ApplyError {
    /// The write lost a race with another writer
    pub fn is_conflict(&self) -> bool {
        matches!(self, ApplyError::Write { source, .. } if source.is_conflict())
    }
}

/// Applies desired objects through a [`ClusterClient`]
#[derive(Debug, Clone, Default)]
pub struct Applier {
    strategies: StrategyTable,
}

impl Applier {
    pub fn new(strategies: StrategyTable) -> Self {
        Self { strategies }
    }

    pub fn strategies(&self) -> &StrategyTable {
        &self.strategies
    }

    /// Ensure the live cluster matches `desired`
    pub async fn apply(
        &self,
        client: &dyn ClusterClient,
        desired: &DynamicObject,
    ) -> Result<ApplyOutcome, ApplyError> {
        let key = ObjectKey::of(desired).map_err(ApplyError::Invalid)?;
        let hash = content_hash(desired)?;

        let outcome = match client.get(&key).await {
            Ok(live) => self.update_if_drifted(client, &key, desired, &live, &hash).await?,
            Err(e) if e.is_not_found() => self.create(client, &key, desired, &hash).await?,
            Err(e) if e.is_schema_unavailable() => {
                warn!(resource = %key, "Skipping resource: kind is not registered on the cluster");
                ApplyOutcome::SchemaUnavailable
            }
            Err(source) => {
                return Err(ApplyError::Write {
                    key: key.to_string(),
                    source,
                })
            }
        };

        observability::metrics::increment_apply_operations(&key.kind, outcome.as_str());
        Ok(outcome)
    }

    async fn create(
        &self,
        client: &dyn ClusterClient,
        key: &ObjectKey,
        desired: &DynamicObject,
        hash: &str,
    ) -> Result<ApplyOutcome, ApplyError> {
        let mut obj = desired.clone();
        obj.metadata.resource_version = None;
        stamp_hash(&mut obj, hash);

        match client.create(&obj).await {
            Ok(_) => {
                info!(resource = %key, "Created resource");
                Ok(ApplyOutcome::Created)
            }
            // Lost a create race; the next pass compares hashes
            Err(e) if e.is_already_exists() => {
                debug!(resource = %key, "Resource appeared concurrently, leaving for next pass");
                Ok(ApplyOutcome::Unchanged)
            }
            Err(e) if e.is_schema_unavailable() => {
                warn!(resource = %key, "Skipping resource: kind is not registered on the cluster");
                Ok(ApplyOutcome::SchemaUnavailable)
            }
            Err(source) => Err(ApplyError::Write {
                key: key.to_string(),
                source,
            }),
        }
    }

    async fn update_if_drifted(
        &self,
        client: &dyn ClusterClient,
        key: &ObjectKey,
        desired: &DynamicObject,
        live: &DynamicObject,
        hash: &str,
    ) -> Result<ApplyOutcome, ApplyError> {
        if recorded_hash(live) == Some(hash) {
            debug!(resource = %key, "Resource unchanged, skipping update");
            return Ok(ApplyOutcome::Unchanged);
        }

        let policy = self.strategies.policy_for(&key.kind);
        let Some(mut obj) = merge_for_update(policy, desired, live) else {
            debug!(resource = %key, ?policy, "Update policy leaves live resource untouched");
            return Ok(ApplyOutcome::Unchanged);
        };
        obj.metadata.resource_version = live.metadata.resource_version.clone();
        stamp_hash(&mut obj, hash);

        match client.update(&obj).await {
            Ok(_) => {
                info!(resource = %key, ?policy, "Updated resource");
                Ok(ApplyOutcome::Updated)
            }
            Err(e) if e.is_not_found() => {
                debug!(resource = %key, "Resource vanished before update, leaving for next pass");
                Ok(ApplyOutcome::Unchanged)
            }
            Err(source) => Err(ApplyError::Write {
                key: key.to_string(),
                source,
            }),
        }
    }
}

fn recorded_hash(obj: &DynamicObject) -> Option<&str> {
    obj.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(LAST_APPLIED_ANNOTATION))
        .map(String::as_str)
}

fn stamp_hash(obj: &mut DynamicObject, hash: &str) {
    obj.annotations_mut()
        .insert(LAST_APPLIED_ANNOTATION.to_string(), hash.to_string());
}

/// SHA-256 over the desired object's meaningful fields
///
/// Server-assigned metadata, status and the hash annotation itself are excluded.
pub fn content_hash(obj: &DynamicObject) -> Result<String, serde_json::Error> {
    let mut value = serde_json::to_value(obj)?;
    if let Some(map) = value.as_object_mut() {
        map.remove("status");
    }
    if let Some(meta) = value.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        for field in [
            "resourceVersion",
            "uid",
            "generation",
            "creationTimestamp",
            "deletionTimestamp",
            "managedFields",
            "selfLink",
        ] {
            meta.remove(field);
        }
        if let Some(annotations) = meta.get_mut("annotations").and_then(|a| a.as_object_mut()) {
            annotations.remove(LAST_APPLIED_ANNOTATION);
        }
    }
    let digest = Sha256::digest(serde_json::to_vec(&value)?);
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{InMemoryCluster, Verb};
    use serde_json::json;

    fn config_map(data: &str) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "settings", "namespace": "ns"},
            "data": {"value": data}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_apply_creates_missing_resource() {
        let cluster = InMemoryCluster::new();
        let applier = Applier::default();
        let outcome = applier.apply(&cluster, &config_map("a")).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Created);

        let key = ObjectKey::new("v1", "ConfigMap", Some("ns"), "settings");
        let live = cluster.object(&key).unwrap();
        assert!(recorded_hash(&live).is_some());
    }

    #[tokio::test]
    async fn test_apply_twice_writes_once() {
        let cluster = InMemoryCluster::new();
        let applier = Applier::default();
        applier.apply(&cluster, &config_map("a")).await.unwrap();
        let writes = cluster.write_count();

        let outcome = applier.apply(&cluster, &config_map("a")).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Unchanged);
        assert_eq!(cluster.write_count(), writes);
    }

    #[tokio::test]
    async fn test_apply_updates_on_drift() {
        let cluster = InMemoryCluster::new();
        let applier = Applier::default();
        applier.apply(&cluster, &config_map("a")).await.unwrap();
        let outcome = applier.apply(&cluster, &config_map("b")).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Updated);

        let key = ObjectKey::new("v1", "ConfigMap", Some("ns"), "settings");
        assert_eq!(cluster.object(&key).unwrap().data["data"]["value"], "b");
    }

    #[tokio::test]
    async fn test_apply_skips_missing_schema() {
        let cluster = InMemoryCluster::new();
        cluster.unregister_kind("ConfigMap");
        let outcome = Applier::default()
            .apply(&cluster, &config_map("a"))
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::SchemaUnavailable);
        assert_eq!(cluster.write_count(), 0);
    }

    #[tokio::test]
    async fn test_apply_surfaces_unexpected_errors() {
        let cluster = InMemoryCluster::new();
        cluster.inject_failure(Verb::Create, "ConfigMap", 500, "boom");
        let err = Applier::default()
            .apply(&cluster, &config_map("a"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApplyError::Write { .. }));
    }

    #[tokio::test]
    async fn test_create_only_kind_is_not_overwritten() {
        let cluster = InMemoryCluster::new();
        let crd = |v: &str| -> DynamicObject {
            serde_json::from_value(json!({
                "apiVersion": "apiextensions.k8s.io/v1",
                "kind": "CustomResourceDefinition",
                "metadata": {"name": "widgets.example.io"},
                "spec": {"group": v}
            }))
            .unwrap()
        };
        let applier = Applier::default();
        applier.apply(&cluster, &crd("a.io")).await.unwrap();
        let outcome = applier.apply(&cluster, &crd("b.io")).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Unchanged);
    }

    #[test]
    fn test_hash_ignores_server_metadata() {
        let a = config_map("a");
        let mut b = config_map("a");
        b.metadata.resource_version = Some("42".to_string());
        b.metadata.uid = Some("uid".to_string());
        stamp_hash(&mut b, "whatever");
        assert_eq!(content_hash(&a).unwrap(), content_hash(&b).unwrap());
        assert_ne!(
            content_hash(&a).unwrap(),
            content_hash(&config_map("b")).unwrap()
        );
    }
}
