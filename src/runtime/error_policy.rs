//! # Error Policy
//!
//! Requeue decision for passes that returned an error.

use crate::controller::reconciler::{Reconciler, ReconcilerError};
use crate::crd::PlatformEngine;
use crate::observability;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use tracing::{error, info};

/// Requeue a failed pass after the configured fixed delay
///
/// Conflicts are the normal result of racing writers and are retried quickly.
pub fn handle_reconciliation_error(
    obj: Arc<PlatformEngine>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let name = obj.name_any();
    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.name = %name,
        error = %error
    );
    let _error_guard = error_span.enter();

    observability::metrics::increment_reconciliation_errors();

    let delay = if error.is_conflict() {
        info!("Conflict while reconciling {}, retrying", name);
        observability::metrics::increment_requeues_total("conflict");
        std::time::Duration::from_secs(1)
    } else {
        error!("Reconciliation error for {}: {:?}", name, error);
        observability::metrics::increment_requeues_total("error");
        ctx.config.requeue_period()
    };

    info!(
        "Next retry scheduled: {} (in {}s)",
        (chrono::Utc::now() + chrono::Duration::seconds(delay.as_secs() as i64)).to_rfc3339(),
        delay.as_secs()
    );
    Action::requeue(delay)
}
