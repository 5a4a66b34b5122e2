//! # Observability
//!
//! Prometheus metrics for the controller. Logging goes through `tracing` and
//! is configured during runtime initialization.

pub mod metrics;
