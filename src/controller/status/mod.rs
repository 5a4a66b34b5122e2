//! # Component Status
//!
//! Health probes for backing resources and their aggregation into the status
//! of the managing resource.
//!
//! ## Sub-modules
//!
//! - `condition` - condition constructors and the top-level upsert rule
//! - `deployment` - workload rollout probe
//! - `composite` - probe for operators that publish their own condition list
//! - `local_cluster` - registration of the hub's own managed cluster
//! - `presence` - existence (`Present`) and absence (`Disabled`) probes
//! - `static_status` - caller-supplied fixed conditions
//! - `tracker` - per-pass registry that produces the aggregate status

pub mod condition;
mod composite;
mod deployment;
mod local_cluster;
mod presence;
mod static_status;
mod tracker;

pub use composite::OperatorResourceStatus;
pub use deployment::DeploymentStatus;
pub use local_cluster::LocalClusterStatus;
pub use presence::{DisabledStatus, PresentStatus};
pub use static_status::StaticStatus;
pub use tracker::StatusTracker;

use crate::client::ClusterClient;
use crate::crd::ComponentCondition;
use async_trait::async_trait;
use std::fmt::Debug;

/// A probe that turns backing-resource state into a [`ComponentCondition`]
///
/// Probes never fail: an unexpected client error is reported as an `Unknown`
/// condition so a single flaky read cannot abort the pass.
#[async_trait]
pub trait StatusReporter: Send + Sync + Debug {
    fn name(&self) -> &str;
    fn namespace(&self) -> &str;
    fn kind(&self) -> &str;
    async fn status(&self, client: &dyn ClusterClient) -> ComponentCondition;
}
