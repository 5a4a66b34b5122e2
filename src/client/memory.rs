//! # In-Memory Cluster
//!
//! A [`ClusterClient`] that keeps objects in process memory. It mirrors the API
//! server behaviors the engine depends on: resource-version conflicts, status
//! subresource isolation, finalizer-blocked deletion, unregistered kinds, and
//! label-selector listing.

use super::{ClientError, ClusterClient, ObjectKey, RemoteClientFactory};
use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::ResourceExt;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// API verb, used to target injected failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    List,
    Create,
    Update,
    UpdateStatus,
    Delete,
    Patch,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<ObjectKey, DynamicObject>,
    unregistered: HashSet<String>,
    held: HashSet<ObjectKey>,
    failures: HashMap<(Verb, String), (u16, String)>,
    next_version: u64,
    writes: usize,
}

impl State {
    fn check(&self, verb: Verb, api_version: &str, kind: &str) -> Result<(), ClientError> {
        if self.unregistered.contains(kind) {
            return Err(ClientError::SchemaUnavailable {
                api_version: api_version.to_string(),
                kind: kind.to_string(),
            });
        }
        if let Some((code, message)) = self.failures.get(&(verb, kind.to_string())) {
            if *code == 409 {
                return Err(ClientError::Conflict {
                    kind: kind.to_string(),
                    name: String::new(),
                    message: message.clone(),
                });
            }
            return Err(ClientError::Api {
                code: *code,
                reason: "Injected".to_string(),
                message: message.clone(),
            });
        }
        Ok(())
    }

    fn bump(&mut self, obj: &mut DynamicObject) {
        self.next_version += 1;
        self.writes += 1;
        obj.metadata.resource_version = Some(self.next_version.to_string());
    }

    fn not_found(key: &ObjectKey) -> ClientError {
        ClientError::NotFound {
            kind: key.kind.clone(),
            name: key.name.clone(),
        }
    }

    fn check_version(
        stored: &DynamicObject,
        incoming: &DynamicObject,
        key: &ObjectKey,
    ) -> Result<(), ClientError> {
        match incoming.metadata.resource_version.as_deref() {
            Some(rv) if Some(rv) != stored.metadata.resource_version.as_deref() => {
                Err(ClientError::Conflict {
                    kind: key.kind.clone(),
                    name: key.name.clone(),
                    message: format!(
                        "resource version {rv} is stale, current is {}",
                        stored.metadata.resource_version.as_deref().unwrap_or("")
                    ),
                })
            }
            _ => Ok(()),
        }
    }
}

/// In-process cluster state
#[derive(Debug, Default)]
pub struct InMemoryCluster {
    state: Mutex<State>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock only happens inside a failing test
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Seed an object without counting it as a write
    pub fn insert(&self, mut obj: DynamicObject) -> Result<ObjectKey, ClientError> {
        let key = ObjectKey::of(&obj)?;
        let mut state = self.lock();
        state.next_version += 1;
        obj.metadata.resource_version = Some(state.next_version.to_string());
        state.objects.insert(key.clone(), obj);
        Ok(key)
    }

    pub fn object(&self, key: &ObjectKey) -> Option<DynamicObject> {
        self.lock().objects.get(key).cloned()
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.lock().objects.contains_key(key)
    }

    /// All stored objects of a kind
    pub fn objects_of_kind(&self, kind: &str) -> Vec<DynamicObject> {
        self.lock()
            .objects
            .iter()
            .filter(|(k, _)| k.kind == kind)
            .map(|(_, o)| o.clone())
            .collect()
    }

    /// Make a kind behave as if its CRD is not installed
    pub fn unregister_kind(&self, kind: &str) {
        self.lock().unregistered.insert(kind.to_string());
    }

    pub fn register_kind(&self, kind: &str) {
        self.lock().unregistered.remove(kind);
    }

    /// Deleting this object marks it terminating instead of removing it
    pub fn hold_deletion(&self, key: &ObjectKey) {
        self.lock().held.insert(key.clone());
    }

    /// Finish a held deletion, removing the object if it is terminating
    pub fn release_deletion(&self, key: &ObjectKey) {
        let mut state = self.lock();
        state.held.remove(key);
        let terminating = state
            .objects
            .get(key)
            .is_some_and(|o| o.metadata.deletion_timestamp.is_some());
        if terminating {
            state.objects.remove(key);
        }
    }

    /// Remove an object outright, as an external actor would
    pub fn remove(&self, key: &ObjectKey) {
        self.lock().objects.remove(key);
    }

    /// Fail every call of `verb` against `kind` with an API error
    pub fn inject_failure(&self, verb: Verb, kind: &str, code: u16, message: &str) {
        self.lock()
            .failures
            .insert((verb, kind.to_string()), (code, message.to_string()));
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Number of mutating calls that reached storage
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }
}

/// Equality-based label selector: `a=b,c=d` or bare `key` for existence
fn matches_selector(obj: &DynamicObject, selector: &str) -> bool {
    let labels = obj.labels();
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k.trim()).map(String::as_str) == Some(v.trim()),
            None => labels.contains_key(term),
        })
}

/// RFC 7386 JSON merge patch
fn merge_patch(target: &mut serde_json::Value, patch: &serde_json::Value) {
    match patch {
        serde_json::Value::Object(entries) => {
            if !target.is_object() {
                *target = serde_json::Value::Object(serde_json::Map::new());
            }
            if let serde_json::Value::Object(map) = target {
                for (k, v) in entries {
                    if v.is_null() {
                        map.remove(k);
                    } else {
                        merge_patch(map.entry(k.clone()).or_insert(serde_json::Value::Null), v);
                    }
                }
            }
        }
        other => *target = other.clone(),
    }
}

fn mark_terminating(obj: &DynamicObject) -> Result<DynamicObject, ClientError> {
    let mut value = serde_json::to_value(obj)?;
    if let Some(meta) = value.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        meta.insert(
            "deletionTimestamp".to_string(),
            serde_json::Value::String(
                chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            ),
        );
    }
    Ok(serde_json::from_value(value)?)
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn get(&self, key: &ObjectKey) -> Result<DynamicObject, ClientError> {
        let state = self.lock();
        state.check(Verb::Get, &key.api_version, &key.kind)?;
        state
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| State::not_found(key))
    }

    async fn list(
        &self,
        api_version: &str,
        kind: &str,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, ClientError> {
        let state = self.lock();
        state.check(Verb::List, api_version, kind)?;
        Ok(state
            .objects
            .iter()
            .filter(|(k, o)| k.kind == kind && matches_selector(o, label_selector))
            .map(|(_, o)| o.clone())
            .collect())
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, ClientError> {
        let key = ObjectKey::of(obj)?;
        let mut state = self.lock();
        state.check(Verb::Create, &key.api_version, &key.kind)?;
        if state.objects.contains_key(&key) {
            return Err(ClientError::AlreadyExists {
                kind: key.kind,
                name: key.name,
            });
        }
        let mut stored = obj.clone();
        state.bump(&mut stored);
        state.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject, ClientError> {
        let key = ObjectKey::of(obj)?;
        let mut state = self.lock();
        state.check(Verb::Update, &key.api_version, &key.kind)?;
        let existing = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| State::not_found(&key))?;
        State::check_version(&existing, obj, &key)?;

        let mut stored = obj.clone();
        // The main resource endpoint never writes status
        match existing.data.get("status") {
            Some(status) => {
                if let Some(map) = stored.data.as_object_mut() {
                    map.insert("status".to_string(), status.clone());
                }
            }
            None => {
                if let Some(map) = stored.data.as_object_mut() {
                    map.remove("status");
                }
            }
        }
        stored.metadata.deletion_timestamp = existing.metadata.deletion_timestamp.clone();
        state.bump(&mut stored);

        if stored.metadata.deletion_timestamp.is_some()
            && stored.finalizers().is_empty()
            && !state.held.contains(&key)
        {
            state.objects.remove(&key);
        } else {
            state.objects.insert(key, stored.clone());
        }
        Ok(stored)
    }

    async fn update_status(&self, obj: &DynamicObject) -> Result<DynamicObject, ClientError> {
        let key = ObjectKey::of(obj)?;
        let mut state = self.lock();
        state.check(Verb::UpdateStatus, &key.api_version, &key.kind)?;
        let mut stored = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| State::not_found(&key))?;
        State::check_version(&stored, obj, &key)?;

        if let Some(map) = stored.data.as_object_mut() {
            match obj.data.get("status") {
                Some(status) => map.insert("status".to_string(), status.clone()),
                None => map.remove("status"),
            };
        }
        state.bump(&mut stored);
        state.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), ClientError> {
        let mut state = self.lock();
        state.check(Verb::Delete, &key.api_version, &key.kind)?;
        let existing = state
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| State::not_found(key))?;

        if state.held.contains(key) || !existing.finalizers().is_empty() {
            if existing.metadata.deletion_timestamp.is_none() {
                let mut terminating = mark_terminating(&existing)?;
                state.bump(&mut terminating);
                state.objects.insert(key.clone(), terminating);
            }
            return Ok(());
        }

        state.writes += 1;
        state.objects.remove(key);
        Ok(())
    }

    async fn patch_merge(
        &self,
        key: &ObjectKey,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject, ClientError> {
        let mut state = self.lock();
        state.check(Verb::Patch, &key.api_version, &key.kind)?;
        let existing = state
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| State::not_found(key))?;

        let mut value = serde_json::to_value(&existing)?;
        merge_patch(&mut value, patch);
        let mut patched: DynamicObject = serde_json::from_value(value)?;
        state.bump(&mut patched);
        state.objects.insert(key.clone(), patched.clone());
        Ok(patched)
    }
}

/// Hands out a fixed in-memory cluster for any non-empty kubeconfig
#[derive(Debug)]
pub struct InMemoryRemoteFactory {
    cluster: Arc<InMemoryCluster>,
}

impl InMemoryRemoteFactory {
    pub fn new(cluster: Arc<InMemoryCluster>) -> Self {
        Self { cluster }
    }
}

#[async_trait]
impl RemoteClientFactory for InMemoryRemoteFactory {
    async fn connect(&self, kubeconfig: &[u8]) -> Result<Arc<dyn ClusterClient>, ClientError> {
        if kubeconfig.is_empty() {
            return Err(ClientError::InvalidObject("empty kubeconfig".to_string()));
        }
        let cluster: Arc<dyn ClusterClient> = self.cluster.clone();
        Ok(cluster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service(name: &str, labels: serde_json::Value) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": name, "namespace": "ns", "labels": labels },
            "spec": { "ports": [] }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_get_and_already_exists() {
        let cluster = InMemoryCluster::new();
        let svc = service("a", json!({}));
        cluster.create(&svc).await.unwrap();
        let key = ObjectKey::of(&svc).unwrap();
        assert!(cluster.get(&key).await.is_ok());
        let err = cluster.create(&svc).await.unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(cluster.write_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let cluster = InMemoryCluster::new();
        let created = cluster.create(&service("a", json!({}))).await.unwrap();
        let mut first = created.clone();
        first.labels_mut().insert("x".into(), "1".into());
        cluster.update(&first).await.unwrap();

        let mut stale = created;
        stale.labels_mut().insert("x".into(), "2".into());
        let err = cluster.update(&stale).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_list_filters_by_selector() {
        let cluster = InMemoryCluster::new();
        cluster
            .insert(service("a", json!({"installer.name": "engine"})))
            .unwrap();
        cluster
            .insert(service("b", json!({"installer.name": "other"})))
            .unwrap();
        cluster.insert(service("c", json!({}))).unwrap();
        let found = cluster
            .list("v1", "Service", "installer.name=engine")
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name_any(), "a");
    }

    #[tokio::test]
    async fn test_unregistered_kind_reports_missing_schema() {
        let cluster = InMemoryCluster::new();
        cluster.unregister_kind("Service");
        let err = cluster.create(&service("a", json!({}))).await.unwrap_err();
        assert!(err.is_schema_unavailable());
    }

    #[tokio::test]
    async fn test_held_deletion_marks_terminating() {
        let cluster = InMemoryCluster::new();
        let key = cluster.insert(service("a", json!({}))).unwrap();
        cluster.hold_deletion(&key);
        cluster.delete(&key).await.unwrap();
        let obj = cluster.object(&key).unwrap();
        assert!(obj.metadata.deletion_timestamp.is_some());

        cluster.release_deletion(&key);
        assert!(!cluster.contains(&key));
    }

    #[tokio::test]
    async fn test_update_ignores_status_and_update_status_ignores_spec() {
        let cluster = InMemoryCluster::new();
        let mut svc = service("a", json!({}));
        svc.data["status"] = json!({"phase": "old"});
        let key = cluster.insert(svc).unwrap();

        let mut changed = cluster.object(&key).unwrap();
        changed.data["status"] = json!({"phase": "new"});
        changed.data["spec"] = json!({"ports": [1]});
        cluster.update(&changed).await.unwrap();
        let stored = cluster.object(&key).unwrap();
        assert_eq!(stored.data["status"]["phase"], "old");
        assert_eq!(stored.data["spec"]["ports"][0], 1);

        let mut status_only = stored.clone();
        status_only.data["status"] = json!({"phase": "new"});
        status_only.data["spec"] = json!({"ports": []});
        cluster.update_status(&status_only).await.unwrap();
        let stored = cluster.object(&key).unwrap();
        assert_eq!(stored.data["status"]["phase"], "new");
        assert_eq!(stored.data["spec"]["ports"][0], 1);
    }

    #[test]
    fn test_merge_patch_removes_nulls() {
        let mut target = json!({"a": 1, "b": {"c": 2, "d": 3}});
        merge_patch(&mut target, &json!({"b": {"c": null, "e": 4}}));
        assert_eq!(target, json!({"a": 1, "b": {"d": 3, "e": 4}}));
    }
}
