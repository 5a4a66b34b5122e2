//! # Controller Module
//!
//! Reconciliation logic for `PlatformEngine` resources.
//!
//! ## Sub-modules
//!
//! - `apply` - Idempotent create-or-update of rendered resources
//! - `status` - Status reporters and the per-pass status tracker
//! - `toggle` - Enabling and disabling catalog components
//! - `prune` - Removal of resources left behind by older releases
//! - `finalize` - Ordered teardown before the finalizer is released
//! - `hosted` - Remote cluster handling for hosted mode
//! - `reconciler` - The reconcile pass that ties everything together
//! - `server` - Health, readiness and metrics endpoints

pub mod apply;
pub mod finalize;
pub mod hosted;
pub mod prune;
pub mod reconciler;
pub mod server;
pub mod status;
pub mod toggle;
