//! Console plugin registration against the cluster `Console` resource.

use crate::client::{get_optional, ClientError, ClusterClient, ObjectKey};
use serde_json::{json, Value};
use tracing::info;

pub fn console_key() -> ObjectKey {
    ObjectKey::cluster_scoped("operator.openshift.io/v1", "Console", "cluster")
}

/// Whether the external console operator is installed
pub async fn console_present(client: &dyn ClusterClient) -> Result<bool, ClientError> {
    match get_optional(client, &console_key()).await {
        Ok(found) => Ok(found.is_some()),
        Err(e) if e.is_schema_unavailable() => Ok(false),
        Err(e) => Err(e),
    }
}

fn plugins(console: &kube::api::DynamicObject) -> Vec<String> {
    console
        .data
        .pointer("/spec/plugins")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|p| p.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Write `plugins` back, guarded by the resourceVersion that was read
async fn write_plugins(
    client: &dyn ClusterClient,
    console: &kube::api::DynamicObject,
    plugins: Vec<String>,
) -> Result<(), ClientError> {
    let patch = json!({
        "metadata": { "resourceVersion": console.metadata.resource_version },
        "spec": { "plugins": plugins },
    });
    client.patch_merge(&console_key(), &patch).await?;
    Ok(())
}

/// Add `plugin` to the console; returns whether a write happened
pub async fn add_plugin(client: &dyn ClusterClient, plugin: &str) -> Result<bool, ClientError> {
    let Some(console) = get_optional(client, &console_key()).await? else {
        return Ok(false);
    };
    let mut current = plugins(&console);
    if current.iter().any(|p| p == plugin) {
        return Ok(false);
    }
    current.push(plugin.to_string());
    write_plugins(client, &console, current).await?;
    info!(plugin, "Registered console plugin");
    Ok(true)
}

/// Remove `plugin` from the console; a missing console is fine
pub async fn remove_plugin(client: &dyn ClusterClient, plugin: &str) -> Result<bool, ClientError> {
    let console = match get_optional(client, &console_key()).await {
        Ok(Some(console)) => console,
        Ok(None) => return Ok(false),
        Err(e) if e.is_schema_unavailable() => return Ok(false),
        Err(e) => return Err(e),
    };
    let current = plugins(&console);
    if !current.iter().any(|p| p == plugin) {
        return Ok(false);
    }
    let remaining = current.into_iter().filter(|p| p != plugin).collect();
    write_plugins(client, &console, remaining).await?;
    info!(plugin, "Removed console plugin");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InMemoryCluster;

    fn seed_console(cluster: &InMemoryCluster, plugins: &[&str]) {
        cluster
            .insert(
                serde_json::from_value(json!({
                    "apiVersion": "operator.openshift.io/v1",
                    "kind": "Console",
                    "metadata": {"name": "cluster"},
                    "spec": {"plugins": plugins},
                }))
                .unwrap(),
            )
            .unwrap();
    }

    #[tokio::test]
    async fn test_add_plugin_once() {
        let cluster = InMemoryCluster::new();
        seed_console(&cluster, &["other"]);
        assert!(add_plugin(&cluster, "platform-engine").await.unwrap());
        assert!(!add_plugin(&cluster, "platform-engine").await.unwrap());
        let console = cluster.object(&console_key()).unwrap();
        assert_eq!(plugins(&console), vec!["other", "platform-engine"]);
    }

    #[tokio::test]
    async fn test_remove_plugin_keeps_others() {
        let cluster = InMemoryCluster::new();
        seed_console(&cluster, &["other", "platform-engine"]);
        assert!(remove_plugin(&cluster, "platform-engine").await.unwrap());
        let console = cluster.object(&console_key()).unwrap();
        assert_eq!(plugins(&console), vec!["other"]);
    }

    #[tokio::test]
    async fn test_missing_console() {
        let cluster = InMemoryCluster::new();
        assert!(!console_present(&cluster).await.unwrap());
        assert!(!add_plugin(&cluster, "x").await.unwrap());
        assert!(!remove_plugin(&cluster, "x").await.unwrap());
    }
}
