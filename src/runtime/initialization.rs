//! # Initialization
//!
//! Controller start-up: crypto provider, tracing, metrics, the probe server,
//! Kubernetes clients and the reconciler context.

use crate::client::{KubeClusterClient, KubeRemoteClientFactory};
use crate::config::{load_config, ServerConfig};
use crate::controller::reconciler::{reconcile, Reconciler};
use crate::controller::server::{start_server, ServerState};
use crate::crd::PlatformEngine;
use crate::images::images_from_env;
use crate::observability;
use crate::render::ManifestDirRenderer;
use anyhow::{Context, Result};
use kube::{api::Api, api::ListParams, Client, ResourceExt};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Everything the watch loop needs
pub struct InitializationResult {
    /// Kubernetes client
    pub client: Client,
    /// API for the PlatformEngine CRD
    pub engines: Api<PlatformEngine>,
    /// Reconciler context
    pub reconciler: Arc<Reconciler>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
}

/// Initialize the controller runtime
pub async fn initialize() -> Result<InitializationResult> {
    // Must happen before any TLS client is built. An error only means a
    // provider is already installed.
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "platform_engine_controller=info".into()),
        )
        .init();

    let (controller_config, server_config) = load_config();
    info!(
        "Starting Platform Engine Controller v{}",
        controller_config.operator_version
    );

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::new());
    let server_state_clone = server_state.clone();
    let server_addr = server_config.socket_addr();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_addr, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });
    wait_for_server_ready(&server_state, &server_handle, &server_config).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let engines: Api<PlatformEngine> = Api::all(client.clone());

    let base_images = images_from_env();
    if base_images.is_empty() {
        warn!("No OPERAND_IMAGE_ or RELATED_IMAGE_ variables set; components cannot be deployed");
    } else {
        info!("Loaded {} image references from the environment", base_images.len());
    }

    let renderer = ManifestDirRenderer::new(
        &controller_config.templates_dir,
        &controller_config.default_target_namespace,
    );
    let reconciler = Arc::new(Reconciler::new(
        Arc::new(KubeClusterClient::new(client.clone())),
        Arc::new(renderer),
        Arc::new(KubeRemoteClientFactory),
        controller_config,
        base_images,
    ));

    reconcile_existing_resources(&engines, &reconciler).await?;
    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        engines,
        reconciler,
        server_state,
    })
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
    config: &ServerConfig,
) -> Result<()> {
    let startup_timeout = config.startup_timeout();
    let poll_interval = config.poll_interval();
    let start_time = std::time::Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        if server_state
            .is_ready
            .load(std::sync::atomic::Ordering::Relaxed)
        {
            info!("HTTP server is ready and accepting connections");
            break;
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }

    Ok(())
}

/// Reconcile PlatformEngines that existed before the controller started
async fn reconcile_existing_resources(
    engines: &Api<PlatformEngine>,
    reconciler: &Arc<Reconciler>,
) -> Result<()> {
    let span = tracing::span!(
        tracing::Level::INFO,
        "controller.startup.reconcile_existing",
        operation = "reconcile_existing_resources"
    );
    let _guard = span.enter();

    let list = match engines.list(&ListParams::default()).await {
        Ok(list) => list,
        Err(e) => {
            error!("CRD is not queryable; {:?}. Is the CRD installed?", e);
            warn!("Continuing despite CRD queryability check failure - controller will retry");
            return Ok(());
        }
    };

    if list.items.is_empty() {
        info!("No existing PlatformEngine resources found, watch will pick up new resources");
        return Ok(());
    }

    let mut names: Vec<String> = list.items.iter().map(|e| e.name_any()).collect();
    names.sort();
    info!(
        "Reconciling {} existing PlatformEngine resources before starting watch: {}",
        names.len(),
        names.join(", ")
    );

    for item in list.items {
        let name = item.name_any();
        match reconcile(Arc::new(item), reconciler.clone()).await {
            Ok(_action) => info!(resource.name = %name, "reconciliation.success"),
            // Continue with the rest; the watch retries this one
            Err(e) => error!(resource.name = %name, error = %e, "reconciliation.error"),
        }
    }

    Ok(())
}
