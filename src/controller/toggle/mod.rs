//! # Toggle Controller
//!
//! Enable and disable workflows for optional components.
//!
//! ```text
//! enable:  Disabled -> Rendering -> Applying -> [WaitingForDependency] -> Available
//! disable: Available -> Rendering -> Deleting -> [ResourcesPresent] -> NotPresent
//! ```
//!
//! Each call runs the workflow as far as current cluster state allows and
//! reports the state it stopped in, along with whether another pass is needed.
//! Status is registered on the pass's [`StatusTracker`] so that the aggregate
//! report reflects what actually happened.

pub mod catalog;
pub mod console;
pub mod local_cluster;

use crate::client::{set_installer_labels, ClientError, ClusterClient, ObjectKey};
use crate::constants::RELEASE_VERSION_ANNOTATION;
use crate::controller::apply::{ApplyError, ApplyOutcome, Applier};
use crate::controller::status::{
    DeploymentStatus, DisabledStatus, OperatorResourceStatus, PresentStatus, StaticStatus,
    StatusReporter, StatusTracker,
};
use crate::crd::{ComponentCondition, ConditionStatus, PlatformEngine};
use crate::images::ImageMap;
use crate::render::{RenderError, Renderer};
use catalog::{Activation, Component};
use kube::api::DynamicObject;
use kube::ResourceExt;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleState {
    Disabled,
    Rendering,
    Applying,
    WaitingForDependency,
    Available,
    Deleting,
    /// Deleted, but some members still exist
    ResourcesPresent,
    NotPresent,
}

impl fmt::Display for ToggleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ToggleState::Disabled => "Disabled",
            ToggleState::Rendering => "Rendering",
            ToggleState::Applying => "Applying",
            ToggleState::WaitingForDependency => "WaitingForDependency",
            ToggleState::Available => "Available",
            ToggleState::Deleting => "Deleting",
            ToggleState::ResourcesPresent => "ResourcesPresent",
            ToggleState::NotPresent => "NotPresent",
        };
        f.write_str(s)
    }
}

/// Where a toggle stopped and whether it wants another pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleOutcome {
    pub state: ToggleState,
    pub requeue: bool,
}

impl ToggleOutcome {
    fn settled(state: ToggleState) -> Self {
        Self {
            state,
            requeue: false,
        }
    }

    fn retry(state: ToggleState) -> Self {
        Self {
            state,
            requeue: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum ToggleError {
    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error("failed to delete {key}: {source}")]
    Delete {
        key: String,
        #[source]
        source: ClientError,
    },

    #[error("failed to create {key}: {source}")]
    Create {
        key: String,
        #[source]
        source: ClientError,
    },

    #[error("failed to check {key}: {source}")]
    Probe {
        key: String,
        #[source]
        source: ClientError,
    },

    #[error("failed to update console plugins: {0}")]
    Console(#[source] ClientError),

    #[error("waiting for {namespace} namespace to be terminated")]
    WaitingForTermination { namespace: String },
}

impl ToggleError {
    pub fn is_conflict(&self) -> bool {
        match self {
            ToggleError::Apply(e) => e.is_conflict(),
            ToggleError::Console(e) => e.is_conflict(),
            _ => false,
        }
    }
}

/// Everything a toggle needs for one pass
pub struct ToggleContext<'a> {
    pub client: &'a dyn ClusterClient,
    pub renderer: &'a dyn Renderer,
    pub applier: &'a Applier,
    pub engine: &'a PlatformEngine,
    pub images: &'a ImageMap,
    pub target_namespace: &'a str,
    /// Stamped on every applied resource
    pub version: &'a str,
    pub console_plugin: &'a str,
}

impl ToggleContext<'_> {
    fn log_render_errors(&self, component: &Component, errors: &[RenderError]) {
        for e in errors {
            warn!(component = component.name, error = %e, "Render error");
        }
    }

    /// Stamp ownership labels and the release annotation
    fn stamp(&self, obj: &mut DynamicObject) {
        set_installer_labels(
            obj,
            &self.engine.name_any(),
            &self.engine.namespace().unwrap_or_default(),
        );
        obj.annotations_mut().insert(
            RELEASE_VERSION_ANNOTATION.to_string(),
            self.version.to_string(),
        );
    }

    /// Apply every object, registering a waiting reporter per unregistered kind
    async fn apply_all(
        &self,
        component: &Component,
        objects: Vec<DynamicObject>,
        tracker: &mut StatusTracker,
    ) -> Result<bool, ToggleError> {
        let mut blocked = false;
        for mut obj in objects {
            self.stamp(&mut obj);
            if self.applier.apply(self.client, &obj).await? == ApplyOutcome::SchemaUnavailable {
                let kind = obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or("resource");
                tracker.add_component(StaticStatus::waiting_for(
                    &format!("{}-{}", component.name, kind.to_lowercase()),
                    self.target_namespace,
                    "CustomResourceDefinition",
                    &format!("Waiting for {kind} CRD to be available"),
                ));
                blocked = true;
            }
        }
        Ok(blocked)
    }

    fn register_enabled(&self, component: &Component, tracker: &mut StatusTracker) {
        tracker.remove_key(component.name, self.target_namespace);
        if let Some(deployment) = component.deployment {
            tracker.add_component(DeploymentStatus::new(deployment, self.target_namespace));
        }
        if let Some(addon) = component.addon_key() {
            tracker.add_component(PresentStatus::single(addon));
        }
        if let Some(operator) = component.operator {
            tracker.add_component(OperatorResourceStatus::new(operator.key(), operator.success_type));
        }
    }

    fn unregister_enabled(&self, component: &Component, tracker: &mut StatusTracker) {
        if let Some(deployment) = component.deployment {
            tracker.remove_key(deployment, self.target_namespace);
        }
        if let Some(addon) = component.addon_key() {
            tracker.remove_key(&addon.name, "");
        }
        if let Some(operator) = component.operator {
            tracker.remove_key(operator.name, "");
        }
    }
}

/// Drive `component` toward installed
pub async fn enable(
    ctx: &ToggleContext<'_>,
    component: &Component,
    tracker: &mut StatusTracker,
) -> Result<ToggleOutcome, ToggleError> {
    let ns = ctx.target_namespace;

    if component.local_cluster {
        return local_cluster::enable(ctx, component.name, tracker).await;
    }

    if component.requires_console {
        let present = console::console_present(ctx.client)
            .await
            .map_err(ToggleError::Console)?;
        if !present {
            info!(component = component.name, "Console operator not installed, skipping component");
            tracker.remove_key(component.name, ns);
            tracker.add_component(console_unavailable(component.name, ns));
            return Ok(ToggleOutcome::settled(ToggleState::Disabled));
        }
    }

    ctx.register_enabled(component, tracker);

    if let Some(dependency) = component.dependency {
        let key = dependency.key();
        match ctx.client.get(&key).await {
            Ok(_) => {}
            Err(e) if e.is_absent() => {
                info!(component = component.name, dependency = %key, "Waiting for dependency");
                tracker.add_component(StaticStatus::waiting_for(
                    component.name,
                    ns,
                    dependency.kind,
                    &format!("Waiting for {key} to exist"),
                ));
                return Ok(ToggleOutcome::retry(ToggleState::WaitingForDependency));
            }
            Err(source) => {
                return Err(ToggleError::Probe {
                    key: key.to_string(),
                    source,
                })
            }
        }
    }

    debug!(component = component.name, state = %ToggleState::Rendering, "Rendering component");
    let (crds, mut errors) = match component.crds {
        Some(path) => ctx.renderer.render_crds(path),
        None => (Vec::new(), Vec::new()),
    };
    let (objects, chart_errors) = ctx
        .renderer
        .render_chart(component.chart, ctx.engine, ctx.images);
    errors.extend(chart_errors);
    if !errors.is_empty() {
        ctx.log_render_errors(component, &errors);
        return Ok(ToggleOutcome::retry(ToggleState::Rendering));
    }

    debug!(
        component = component.name,
        state = %ToggleState::Applying,
        count = crds.len() + objects.len(),
        "Applying component resources"
    );
    let mut blocked = ctx.apply_all(component, crds, tracker).await?;
    blocked |= ctx.apply_all(component, objects, tracker).await?;
    if blocked {
        return Ok(ToggleOutcome::retry(ToggleState::Applying));
    }

    if component.activation == Some(Activation::ConsolePlugin) {
        let Some(deployment) = component.deployment else {
            return Ok(ToggleOutcome::settled(ToggleState::Available));
        };
        let primary = DeploymentStatus::new(deployment, ns);
        let available = primary
            .natively_available(ctx.client)
            .await
            .map_err(|source| ToggleError::Probe {
                key: primary.key().to_string(),
                source,
            })?;
        if !available {
            debug!(component = component.name, "Deferring plugin registration until deployment is available");
            return Ok(ToggleOutcome::retry(ToggleState::Applying));
        }
        console::add_plugin(ctx.client, ctx.console_plugin)
            .await
            .map_err(ToggleError::Console)?;
    }

    Ok(ToggleOutcome::settled(ToggleState::Available))
}

/// Drive `component` toward fully removed
pub async fn disable(
    ctx: &ToggleContext<'_>,
    component: &Component,
    tracker: &mut StatusTracker,
) -> Result<ToggleOutcome, ToggleError> {
    let ns = ctx.target_namespace;

    if component.local_cluster {
        return local_cluster::disable(ctx, component.name, tracker).await;
    }

    debug!(component = component.name, state = %ToggleState::Rendering, "Rendering component for removal");
    let (objects, errors) = ctx
        .renderer
        .render_chart(component.chart, ctx.engine, ctx.images);
    if !errors.is_empty() {
        ctx.log_render_errors(component, &errors);
        return Ok(ToggleOutcome::retry(ToggleState::Rendering));
    }

    let mut keys = Vec::with_capacity(objects.len());
    for obj in &objects {
        keys.push(ObjectKey::of(obj).map_err(|e| ToggleError::Apply(ApplyError::Invalid(e)))?);
    }

    ctx.unregister_enabled(component, tracker);
    let reporter = DisabledStatus::toggled_off(component.name, ns, keys);

    if component.activation == Some(Activation::ConsolePlugin) {
        console::remove_plugin(ctx.client, ctx.console_plugin)
            .await
            .map_err(ToggleError::Console)?;
    }

    if let Some(operator) = component.operator {
        let key = operator.key();
        delete_tolerant(ctx.client, &key).await?;
        if let Some(namespace) = operator.managed_namespace {
            let ns_key = ObjectKey::cluster_scoped("v1", "Namespace", namespace);
            match ctx.client.get(&ns_key).await {
                Ok(_) => {
                    tracker.add_component(reporter);
                    return Err(ToggleError::WaitingForTermination {
                        namespace: namespace.to_string(),
                    });
                }
                Err(e) if e.is_absent() => {}
                Err(source) => {
                    return Err(ToggleError::Probe {
                        key: ns_key.to_string(),
                        source,
                    })
                }
            }
        }
    }

    debug!(component = component.name, state = %ToggleState::Deleting, "Deleting component resources");
    for key in reporter.resources() {
        delete_tolerant(ctx.client, key).await?;
    }

    let condition = reporter.status(ctx.client).await;
    tracker.add_component(reporter);
    if condition.available {
        Ok(ToggleOutcome::settled(ToggleState::NotPresent))
    } else {
        info!(component = component.name, "Component resources still present");
        Ok(ToggleOutcome::retry(ToggleState::ResourcesPresent))
    }
}

/// Delete, treating an already absent object as done
pub(crate) async fn delete_tolerant(
    client: &dyn ClusterClient,
    key: &ObjectKey,
) -> Result<(), ToggleError> {
    match client.delete(key).await {
        Ok(()) => {
            debug!(resource = %key, "Deleted resource");
            Ok(())
        }
        Err(e) if e.is_absent() => Ok(()),
        Err(source) => Err(ToggleError::Delete {
            key: key.to_string(),
            source,
        }),
    }
}

fn console_unavailable(name: &str, namespace: &str) -> StaticStatus {
    StaticStatus::new(
        name,
        namespace,
        "",
        ComponentCondition {
            r#type: "Available".to_string(),
            status: ConditionStatus::False,
            reason: Some("ConsoleUnavailable".to_string()),
            message: Some("requires an external console operator to exist first".to_string()),
            available: true,
            ..Default::default()
        },
    )
}
