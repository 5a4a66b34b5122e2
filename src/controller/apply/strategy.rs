//! # Update Strategies
//!
//! Per-kind policy for how a drifted live object is brought back in line with
//! its desired state. The table is data; the applier's control flow never
//! branches on kind names.

use kube::api::DynamicObject;
use serde_json::Value;
use std::collections::HashMap;

/// How an existing object is updated when its content hash differs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePolicy {
    /// Desired object fully replaces the live one
    Replace,
    /// Only `spec` is carried forward onto the live object
    SpecMerge,
    /// Desired rules are applied, live rules absent from the desired set are kept
    RuleMerge,
    /// Desired object replaces the live one, keeping injected CA bundles
    PreserveCaBundle,
    /// Created when missing, never overwritten afterwards
    CreateOnly,
}

/// Kind to policy lookup, defaulting to [`UpdatePolicy::Replace`]
#[derive(Debug, Clone)]
pub struct StrategyTable {
    policies: HashMap<String, UpdatePolicy>,
    default: UpdatePolicy,
}

impl Default for StrategyTable {
    fn default() -> Self {
        Self::empty()
            .with("CustomResourceDefinition", UpdatePolicy::CreateOnly)
            .with("HiveConfig", UpdatePolicy::CreateOnly)
            .with("ClusterManager", UpdatePolicy::SpecMerge)
            .with("ClusterRole", UpdatePolicy::RuleMerge)
            .with("ValidatingWebhookConfiguration", UpdatePolicy::PreserveCaBundle)
            .with("MutatingWebhookConfiguration", UpdatePolicy::PreserveCaBundle)
            .with("APIService", UpdatePolicy::PreserveCaBundle)
    }
}

impl StrategyTable {
    /// Table with no overrides: every kind is replaced
    pub fn empty() -> Self {
        Self {
            policies: HashMap::new(),
            default: UpdatePolicy::Replace,
        }
    }

    #[must_use]
    pub fn with(mut self, kind: &str, policy: UpdatePolicy) -> Self {
        self.policies.insert(kind.to_string(), policy);
        self
    }

    pub fn policy_for(&self, kind: &str) -> UpdatePolicy {
        self.policies.get(kind).copied().unwrap_or(self.default)
    }
}

/// Build the object to write for `policy`, or `None` when nothing should be written
pub fn merge_for_update(
    policy: UpdatePolicy,
    desired: &DynamicObject,
    live: &DynamicObject,
) -> Option<DynamicObject> {
    match policy {
        UpdatePolicy::CreateOnly => None,
        UpdatePolicy::Replace => Some(desired.clone()),
        UpdatePolicy::SpecMerge => {
            let mut merged = live.clone();
            match desired.data.get("spec") {
                Some(spec) => set_field(&mut merged.data, "spec", spec.clone()),
                None => return None,
            }
            merged.metadata.labels = desired.metadata.labels.clone();
            Some(merged)
        }
        UpdatePolicy::RuleMerge => {
            let mut merged = desired.clone();
            let mut rules = array_at(&desired.data, "rules");
            for rule in array_at(&live.data, "rules") {
                if !rules.contains(&rule) {
                    rules.push(rule);
                }
            }
            set_field(&mut merged.data, "rules", Value::Array(rules));
            Some(merged)
        }
        UpdatePolicy::PreserveCaBundle => {
            let mut merged = desired.clone();
            preserve_webhook_bundles(&mut merged.data, &live.data);
            preserve_api_service_bundle(&mut merged.data, &live.data);
            Some(merged)
        }
    }
}

fn array_at(data: &Value, field: &str) -> Vec<Value> {
    data.get(field)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn set_field(data: &mut Value, field: &str, value: Value) {
    if let Some(map) = data.as_object_mut() {
        map.insert(field.to_string(), value);
    }
}

fn preserve_webhook_bundles(desired: &mut Value, live: &Value) {
    let live_hooks = array_at(live, "webhooks");
    let Some(hooks) = desired.get_mut("webhooks").and_then(Value::as_array_mut) else {
        return;
    };
    for hook in hooks {
        let has_bundle = hook.pointer("/clientConfig/caBundle").is_some();
        if has_bundle {
            continue;
        }
        let name = hook.get("name").cloned();
        let bundle = live_hooks
            .iter()
            .find(|h| h.get("name") == name.as_ref())
            .and_then(|h| h.pointer("/clientConfig/caBundle"))
            .cloned();
        if let (Some(bundle), Some(config)) = (
            bundle,
            hook.get_mut("clientConfig").and_then(Value::as_object_mut),
        ) {
            config.insert("caBundle".to_string(), bundle);
        }
    }
}

fn preserve_api_service_bundle(desired: &mut Value, live: &Value) {
    if desired.pointer("/spec/caBundle").is_some() {
        return;
    }
    let Some(bundle) = live.pointer("/spec/caBundle").cloned() else {
        return;
    };
    if let Some(spec) = desired.get_mut("spec").and_then(Value::as_object_mut) {
        spec.insert("caBundle".to_string(), bundle);
    }
}
