//! # Reconciler
//!
//! One reconciliation pass for a `PlatformEngine`:
//!
//! ```text
//! Fetching -> (gone: Done)
//!          -> (deleting: Finalizing -> Done)
//!          -> EnsuringFinalizer -> Defaults -> [Hosted | ComputingImages -> ApplyingSubcomponents]
//!          -> UpdatingStatus -> Done / Requeue
//! ```
//!
//! The status write runs after the pass whatever the pass returned, so a
//! failure part way through still leaves the best available status behind.
//! While the resource is not `Available` (and not paused) every pass asks to
//! be requeued after the configured period.

mod status_update;

pub use status_update::{status_changed, write_status};

use crate::client::{
    from_dynamic, to_dynamic, ClientError, ClusterClient, ObjectKey, RemoteClientFactory,
};
use crate::config::ControllerConfig;
use crate::constants::FINALIZER;
use crate::controller::apply::{ApplyError, Applier};
use crate::controller::finalize::{
    hosted_teardown, namespace_wait_condition, teardown, TeardownError,
};
use crate::controller::hosted::{reconcile_hosted, HostedError};
use crate::controller::prune::{prune_obsolete, PruneError};
use crate::controller::status::condition::new_condition;
use crate::controller::status::StatusTracker;
use crate::controller::toggle::catalog::{Component, CATALOG};
use crate::controller::toggle::{self, local_cluster, ToggleContext, ToggleError};
use crate::crd::{
    condition_type, reason, AvailabilityType, Condition, ConditionStatus, Phase, PlatformEngine,
};
use crate::images::{resolve_images, ImageError, ImageMap};
use crate::observability;
use crate::render::Renderer;
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Delay before retrying a pass that lost a write race
const CONFLICT_REQUEUE: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("cluster API error: {0}")]
    Client(#[from] ClientError),

    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error("component {component}: {source}")]
    Toggle {
        component: String,
        #[source]
        source: ToggleError,
    },

    #[error("teardown failed: {0}")]
    Teardown(#[from] TeardownError),

    #[error(transparent)]
    Prune(#[from] PruneError),

    #[error(transparent)]
    Hosted(#[from] HostedError),

    #[error(transparent)]
    Images(#[from] ImageError),
}

impl ReconcilerError {
    /// A write lost an optimistic-concurrency race
    pub fn is_conflict(&self) -> bool {
        match self {
            ReconcilerError::Client(e) => e.is_conflict(),
            ReconcilerError::Apply(e) => e.is_conflict(),
            ReconcilerError::Toggle { source, .. } => source.is_conflict(),
            _ => false,
        }
    }
}

/// What a pass wants next
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassOutcome {
    pub requeue_after: Option<Duration>,
}

impl PassOutcome {
    pub fn done() -> Self {
        Self::default()
    }

    pub fn requeue(after: Duration) -> Self {
        Self {
            requeue_after: Some(after),
        }
    }

    /// Keep the sooner of two requeue requests
    #[must_use]
    pub fn merge(self, other: PassOutcome) -> Self {
        let requeue_after = match (self.requeue_after, other.requeue_after) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self { requeue_after }
    }

    pub fn into_action(self) -> Action {
        match self.requeue_after {
            Some(after) => Action::requeue(after),
            None => Action::await_change(),
        }
    }
}

/// Shared context for every reconciliation
pub struct Reconciler {
    pub client: Arc<dyn ClusterClient>,
    pub renderer: Arc<dyn Renderer>,
    pub remote: Arc<dyn RemoteClientFactory>,
    pub applier: Applier,
    pub config: ControllerConfig,
    /// Images from the operator environment, before per-resource overrides
    pub base_images: ImageMap,
    catalog: Vec<Component>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("renderer", &self.renderer)
            .field("config", &self.config)
            .field("images", &self.base_images.len())
            .field("catalog", &self.catalog.len())
            .finish_non_exhaustive()
    }
}

pub fn engine_key(name: &str) -> ObjectKey {
    ObjectKey::cluster_scoped(
        &PlatformEngine::api_version(&()),
        &PlatformEngine::kind(&()),
        name,
    )
}

impl Reconciler {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        renderer: Arc<dyn Renderer>,
        remote: Arc<dyn RemoteClientFactory>,
        config: ControllerConfig,
        base_images: ImageMap,
    ) -> Self {
        Self {
            client,
            renderer,
            remote,
            applier: Applier::default(),
            config,
            base_images,
            catalog: CATALOG.to_vec(),
        }
    }

    /// Replace the component catalog
    #[must_use]
    pub fn with_catalog(mut self, catalog: Vec<Component>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn catalog(&self) -> &[Component] {
        &self.catalog
    }

    /// Run one pass for the named resource
    pub async fn reconcile_engine(&self, name: &str) -> Result<PassOutcome, ReconcilerError> {
        let engine = match self.client.get(&engine_key(name)).await {
            Ok(obj) => from_dynamic::<PlatformEngine>(&obj)?,
            Err(e) if e.is_not_found() => {
                debug!("PlatformEngine no longer exists");
                return Ok(PassOutcome::done());
            }
            Err(e) => return Err(e.into()),
        };

        if engine.is_deleting() {
            return self.finalize(engine).await;
        }

        let engine = match self.ensure_finalizer(engine).await {
            Ok(engine) => engine,
            Err(e) if e.is_conflict() => return Ok(PassOutcome::requeue(CONFLICT_REQUEUE)),
            Err(e) => return Err(e.into()),
        };

        match self.set_defaults(&engine).await {
            Ok(Some(defaulted)) => {
                self.report_initializing(&defaulted).await;
                return Ok(PassOutcome::requeue(CONFLICT_REQUEUE));
            }
            Ok(None) => {}
            Err(e) if e.is_conflict() => return Ok(PassOutcome::requeue(CONFLICT_REQUEUE)),
            Err(e) => return Err(e.into()),
        }

        let mut tracker = StatusTracker::new();
        tracker.reset(&engine.uid().unwrap_or_default());

        let pass = if engine.is_hosted() {
            self.hosted_pass(&engine, &mut tracker).await
        } else {
            self.standalone_pass(&engine, &mut tracker).await
        };

        // Status is written whatever the pass returned
        let version = &self.config.operator_version;
        let status = tracker
            .report_status(self.client.as_ref(), &engine, version)
            .await;
        let phase = status.phase.unwrap_or(Phase::Progressing);
        observability::metrics::set_phase(name, phase);

        let written = write_status(self.client.as_ref(), &engine, status).await;

        let mut outcome = match pass {
            Ok(outcome) => outcome,
            Err(e) if e.is_conflict() => PassOutcome::requeue(CONFLICT_REQUEUE),
            Err(e) => {
                if let Err(write_err) = written {
                    warn!(error = %write_err, "Status write failed after pass error");
                }
                return Err(e);
            }
        };

        match written {
            Ok(true) => debug!(%phase, "Status updated"),
            Ok(false) => {}
            Err(e) if e.is_conflict() => {
                debug!("Status write conflicted, requeueing");
                outcome = outcome.merge(PassOutcome::requeue(CONFLICT_REQUEUE));
            }
            Err(e) => return Err(e.into()),
        }

        if phase != Phase::Available && !engine.is_paused() {
            outcome = outcome.merge(PassOutcome::requeue(self.config.requeue_period()));
        }
        Ok(outcome)
    }

    async fn write_engine(&self, engine: &PlatformEngine) -> Result<PlatformEngine, ClientError> {
        let updated = self.client.update(&to_dynamic(engine)?).await?;
        from_dynamic(&updated)
    }

    async fn ensure_finalizer(&self, mut engine: PlatformEngine) -> Result<PlatformEngine, ClientError> {
        if engine.has_finalizer() {
            return Ok(engine);
        }
        engine.finalizers_mut().push(FINALIZER.to_string());
        let engine = self.write_engine(&engine).await?;
        info!("Added finalizer");
        Ok(engine)
    }

    /// Fill in defaults missing from the spec; returns the written resource if any
    async fn set_defaults(
        &self,
        engine: &PlatformEngine,
    ) -> Result<Option<PlatformEngine>, ClientError> {
        let mut updated = engine.clone();
        let mut changed = false;

        if updated.spec.availability_config.is_none() {
            updated.spec.availability_config = Some(AvailabilityType::High);
            changed = true;
        }
        if updated.spec.target_namespace.as_deref().unwrap_or_default().is_empty() {
            updated.spec.target_namespace = Some(self.config.default_target_namespace.clone());
            changed = true;
        }
        for component in &self.catalog {
            if !updated.component_present(component.name) {
                if component.default_enabled {
                    updated.enable(component.name);
                } else {
                    updated.disable(component.name);
                }
                changed = true;
            }
        }

        if let Some(overrides) = &engine.spec.overrides {
            for unknown in overrides
                .components
                .iter()
                .filter(|c| !self.catalog.iter().any(|k| k.name == c.name))
            {
                warn!(component = %unknown.name, "Ignoring unknown component");
            }
        }

        if !changed {
            return Ok(None);
        }
        let written = self.write_engine(&updated).await?;
        info!("Wrote spec defaults");
        Ok(Some(written))
    }

    /// First status of a resource whose components have not been toggled yet
    async fn report_initializing(&self, engine: &PlatformEngine) {
        let mut tracker = StatusTracker::new();
        tracker.add_condition(new_condition(
            condition_type::PROGRESSING,
            ConditionStatus::Unknown,
            reason::SPEC_DEFAULTED,
            "Spec defaults applied, installing components",
        ));
        let mut status = tracker
            .report_status(self.client.as_ref(), engine, &self.config.operator_version)
            .await;
        // Nothing is tracked until the next pass toggles components
        if !engine.is_paused() {
            status.phase = Some(Phase::Progressing);
        }
        if let Some(phase) = status.phase {
            observability::metrics::set_phase(&engine.name_any(), phase);
        }
        if let Err(e) = write_status(self.client.as_ref(), engine, status).await {
            debug!(error = %e, "Could not record initial status");
        }
    }

    async fn finalize(&self, mut engine: PlatformEngine) -> Result<PassOutcome, ReconcilerError> {
        if !engine.has_finalizer() {
            return Ok(PassOutcome::done());
        }

        let report = if engine.is_hosted() {
            hosted_teardown(self.client.as_ref(), &self.config.console_plugin).await?
        } else {
            teardown(self.client.as_ref(), &engine.name_any()).await?
        };
        observability::metrics::set_teardown_remaining(report.remaining);

        if let Some(namespace) = &report.waiting_for {
            let condition = namespace_wait_condition(namespace, engine.deleting_for());
            self.report_uninstalling(&engine, condition).await;
            return Ok(PassOutcome::requeue(self.config.finalizer_requeue()));
        }
        if !report.complete() {
            info!(remaining = report.remaining, "Waiting for owned resources to be removed");
            let condition = new_condition(
                condition_type::PROGRESSING,
                ConditionStatus::Unknown,
                reason::DELETION_TIMESTAMP_PRESENT,
                format!("Waiting for {} owned resources to be removed", report.remaining),
            );
            self.report_uninstalling(&engine, condition).await;
            return Ok(PassOutcome::requeue(self.config.finalizer_requeue()));
        }

        info!("All owned resources removed, removing finalizer");
        engine.finalizers_mut().retain(|f| f != FINALIZER);
        match self.write_engine(&engine).await {
            Ok(_) => Ok(PassOutcome::done()),
            // Removing the last finalizer may delete the object before the response
            Err(e) if e.is_not_found() => Ok(PassOutcome::done()),
            Err(e) if e.is_conflict() => Ok(PassOutcome::requeue(CONFLICT_REQUEUE)),
            Err(e) => Err(e.into()),
        }
    }

    async fn report_uninstalling(&self, engine: &PlatformEngine, condition: Condition) {
        let mut tracker = StatusTracker::new();
        tracker.add_condition(condition);
        let status = tracker
            .report_status(self.client.as_ref(), engine, &self.config.operator_version)
            .await;
        if let Err(e) = write_status(self.client.as_ref(), engine, status).await {
            debug!(error = %e, "Could not record uninstall progress");
        }
    }

    async fn hosted_pass(
        &self,
        engine: &PlatformEngine,
        tracker: &mut StatusTracker,
    ) -> Result<PassOutcome, ReconcilerError> {
        if engine.is_paused() {
            return Ok(paused(tracker));
        }

        let target = engine.target_namespace(&self.config.default_target_namespace);
        match reconcile_hosted(
            self.client.as_ref(),
            self.remote.as_ref(),
            engine,
            target,
            tracker,
        )
        .await
        {
            Ok(_) => {
                tracker.add_condition(new_condition(
                    condition_type::PROGRESSING,
                    ConditionStatus::True,
                    reason::COMPONENTS_DEPLOYED,
                    "Hosted reconcile completed successfully",
                ));
                Ok(PassOutcome::done())
            }
            Err(e) => {
                error!(error = %e, "Hosted reconcile failed");
                tracker.add_condition(new_condition(
                    condition_type::PROGRESSING,
                    ConditionStatus::False,
                    reason::REQUIREMENTS_NOT_MET,
                    e.to_string(),
                ));
                Ok(PassOutcome::done())
            }
        }
    }

    async fn standalone_pass(
        &self,
        engine: &PlatformEngine,
        tracker: &mut StatusTracker,
    ) -> Result<PassOutcome, ReconcilerError> {
        let images = match resolve_images(
            self.client.as_ref(),
            engine,
            &self.base_images,
            &self.config.operator_namespace,
        )
        .await
        {
            Ok(images) => images,
            Err(e) => {
                error!(error = %e, "Cannot build image references");
                let message = match e {
                    ImageError::NoImages => "No image references defined in deployment".to_string(),
                    other => format!("Issue building image references: {other}"),
                };
                tracker.add_condition(new_condition(
                    condition_type::PROGRESSING,
                    ConditionStatus::False,
                    reason::REQUIREMENTS_NOT_MET,
                    message,
                ));
                return Ok(PassOutcome::done());
            }
        };

        if engine.is_paused() {
            return Ok(paused(tracker));
        }

        let target = engine.target_namespace(&self.config.default_target_namespace);
        self.ensure_namespace(target).await?;

        let mut outcome = PassOutcome::done();
        let ctx = ToggleContext {
            client: self.client.as_ref(),
            renderer: self.renderer.as_ref(),
            applier: &self.applier,
            engine,
            images: &images,
            target_namespace: target,
            version: &self.config.operator_version,
            console_plugin: &self.config.console_plugin,
        };

        for component in &self.catalog {
            let result = if engine.enabled(component.name) {
                toggle::enable(&ctx, component, tracker).await
            } else {
                toggle::disable(&ctx, component, tracker).await
            };
            match result {
                Ok(toggled) => {
                    debug!(component = component.name, state = %toggled.state, "Component toggled");
                    if toggled.requeue {
                        observability::metrics::increment_requeues_total("component-pending");
                        outcome = outcome.merge(PassOutcome::requeue(self.config.requeue_period()));
                    }
                }
                Err(source) => {
                    record_toggle_failure(tracker, component.name, &source);
                    return Err(ReconcilerError::Toggle {
                        component: component.name.to_string(),
                        source,
                    });
                }
            }
        }

        if !prune_obsolete(self.client.as_ref(), target, tracker).await? {
            return Ok(outcome.merge(PassOutcome::requeue(self.config.requeue_period())));
        }

        // The local cluster reports its own removal progress
        if local_cluster::removal_pending(tracker) {
            return Ok(outcome);
        }

        tracker.add_condition(new_condition(
            condition_type::PROGRESSING,
            ConditionStatus::True,
            reason::COMPONENTS_DEPLOYED,
            "All components deployed",
        ));
        Ok(outcome)
    }

    async fn ensure_namespace(&self, namespace: &str) -> Result<(), ClientError> {
        let ns = ObjectKey::cluster_scoped("v1", "Namespace", namespace).to_object();
        match self.client.create(&ns).await {
            Ok(_) => {
                info!(namespace, "Created target namespace");
                Ok(())
            }
            Err(e) if e.is_already_exists() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn paused(tracker: &mut StatusTracker) -> PassOutcome {
    info!("Reconciliation is paused. Nothing more to do.");
    tracker.add_condition(new_condition(
        condition_type::PROGRESSING,
        ConditionStatus::Unknown,
        reason::PAUSED,
        "PlatformEngine is paused",
    ));
    PassOutcome::done()
}

fn record_toggle_failure(tracker: &mut StatusTracker, component: &str, error: &ToggleError) {
    let condition = match error {
        ToggleError::WaitingForTermination { .. } => new_condition(
            condition_type::PROGRESSING,
            ConditionStatus::Unknown,
            reason::WAITING_FOR_RESOURCE,
            error.to_string(),
        ),
        _ => new_condition(
            condition_type::PROGRESSING,
            ConditionStatus::False,
            reason::FAILED_APPLYING_COMPONENT,
            format!("{component}: {error}"),
        ),
    };
    tracker.add_condition(condition);
}

/// Entry point for the controller runtime
pub async fn reconcile(
    obj: Arc<PlatformEngine>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let name = obj.name_any();
    let span = info_span!("reconcile", resource.name = %name);

    async move {
        observability::metrics::increment_reconciliations();
        let started = Instant::now();
        let result = ctx.reconcile_engine(&name).await;
        observability::metrics::observe_reconciliation_duration(started.elapsed().as_secs_f64());

        let outcome = result?;
        if let Some(after) = outcome.requeue_after {
            debug!(after_secs = after.as_secs(), "Requeueing");
            observability::metrics::increment_requeues_total("pass");
        }
        Ok(outcome.into_action())
    }
    .instrument(span)
    .await
}
