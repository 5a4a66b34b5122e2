//! # Status Update
//!
//! Persists the aggregate status onto the managing resource.
//!
//! Writes are skipped when nothing but `lastUpdateTime` stamps would change, so
//! a settled resource does not generate watch events for itself.

use crate::client::{to_dynamic, ClientError, ClusterClient};
use crate::crd::{PlatformEngine, PlatformEngineStatus};
use tracing::debug;

/// Status with every update stamp cleared, for change detection
fn without_update_times(status: &PlatformEngineStatus) -> PlatformEngineStatus {
    let mut status = status.clone();
    for c in &mut status.components {
        c.last_update_time = None;
    }
    for c in &mut status.conditions {
        c.last_update_time = None;
    }
    status
}

/// Whether `next` differs from `previous` in anything but update stamps
pub fn status_changed(previous: Option<&PlatformEngineStatus>, next: &PlatformEngineStatus) -> bool {
    match previous {
        Some(previous) => without_update_times(previous) != without_update_times(next),
        None => true,
    }
}

/// Write `status` onto `engine`; returns whether a write happened
///
/// The write carries the resourceVersion `engine` was read at, so a stale read
/// fails with a conflict.
pub async fn write_status(
    client: &dyn ClusterClient,
    engine: &PlatformEngine,
    status: PlatformEngineStatus,
) -> Result<bool, ClientError> {
    if !status_changed(engine.status.as_ref(), &status) {
        debug!("Skipping status update - status unchanged");
        return Ok(false);
    }

    let mut updated = engine.clone();
    updated.status = Some(status);
    client.update_status(&to_dynamic(&updated)?).await?;
    Ok(true)
}
