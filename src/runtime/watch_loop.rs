//! # Watch Loop
//!
//! Drives reconciliation from PlatformEngine events. Deployments carrying the
//! installer label also trigger the PlatformEngine named on them, so rollout
//! progress is reflected in the aggregate status without waiting for a requeue.
//!
//! The controller runtime never runs two passes for the same resource at once.

use crate::constants::INSTALLER_NAME_LABEL;
use crate::controller::reconciler::{reconcile, Reconciler};
use crate::controller::server::ServerState;
use crate::crd::PlatformEngine;
use crate::runtime::error_policy::handle_reconciliation_error;
use anyhow::Result;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube_runtime::reflector::ObjectRef;
use kube_runtime::watcher;
use kube::{api::Api, Client, ResourceExt};
use kube_runtime::Controller;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The PlatformEngine that installed `deployment`, if any
pub fn owning_engine(deployment: &Deployment) -> Option<ObjectRef<PlatformEngine>> {
    deployment
        .labels()
        .get(INSTALLER_NAME_LABEL)
        .filter(|name| !name.is_empty())
        .map(|name| ObjectRef::new(name.as_str()))
}

/// Run the controller until a shutdown signal arrives
pub async fn run_watch_loop(
    client: Client,
    engines: Api<PlatformEngine>,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
) -> Result<()> {
    let deployments: Api<Deployment> = Api::all(client);
    let deployment_watch = watcher::Config::default().labels(INSTALLER_NAME_LABEL);

    Controller::new(engines, watcher::Config::default())
        .watches(deployments, deployment_watch, |deployment| {
            owning_engine(&deployment)
        })
        .shutdown_on_signal()
        .run(reconcile, handle_reconciliation_error, reconciler)
        .for_each(|res| async move {
            match res {
                Ok((obj, _action)) => debug!(resource = %obj.name, "Reconciled"),
                Err(e) => warn!("Controller stream error: {}", e),
            }
        })
        .await;

    info!("Watch loop stopped, shutting down");
    server_state.is_ready.store(false, Ordering::Relaxed);
    Ok(())
}
