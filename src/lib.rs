//! # Platform Engine Controller
//!
//! A Kubernetes operator that installs a catalog of platform components from
//! packaged manifests and reports their combined health on a single
//! `PlatformEngine` resource.
//!
//! ## Overview
//!
//! Each reconcile pass:
//!
//! 1. **Defaults the spec** - fills availability, target namespace and the component list
//! 2. **Toggles components** - applies enabled components and removes disabled ones
//! 3. **Prunes leftovers** - deletes resources shipped by older releases
//! 4. **Aggregates status** - asks every tracked reporter for a condition and derives the phase
//!
//! Deleting the `PlatformEngine` runs an ordered teardown of everything it
//! installed before the finalizer is removed. In hosted mode components live
//! on a remote cluster reached through a kubeconfig secret.

pub mod client;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod images;
pub mod observability;
pub mod render;
pub mod runtime;

pub use crd::*;
