//! # Controller Metrics
//!
//! Metrics for reconciliation passes, requeues, applied resources, teardown
//! progress and the reported phase.

use crate::crd::Phase;
use crate::observability::metrics::registry::REGISTRY;
use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, IntGauge, IntGaugeVec};
use std::sync::LazyLock;

// Controller reconciliation metrics
static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "platform_engine_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "platform_engine_reconciliation_errors_total",
        "Total number of reconciliation errors",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "platform_engine_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

// Requeue metrics
static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "platform_engine_requeues_total",
            "Total number of reconciliation requeues",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

// Applier metrics
static APPLY_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "platform_engine_apply_operations_total",
            "Total number of resource apply operations by kind and outcome",
        ),
        &["kind", "outcome"],
    )
    .expect("Failed to create APPLY_OPERATIONS_TOTAL metric - this should never happen")
});

// Teardown metrics
static TEARDOWN_REMAINING: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "platform_engine_teardown_remaining",
        "Resources still present after the last teardown pass",
    )
    .expect("Failed to create TEARDOWN_REMAINING metric - this should never happen")
});

// Phase metrics
static PHASE: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        prometheus::Opts::new(
            "platform_engine_phase",
            "Current phase of each managing resource (1 for the active phase)",
        ),
        &["name", "phase"],
    )
    .expect("Failed to create PHASE metric - this should never happen")
});

const ALL_PHASES: [Phase; 7] = [
    Phase::Progressing,
    Phase::Available,
    Phase::Error,
    Phase::Uninstalling,
    Phase::Updating,
    Phase::Paused,
    Phase::Unimplemented,
];

/// Register controller metrics with the registry
pub(crate) fn register_controller_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(APPLY_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TEARDOWN_REMAINING.clone()))?;
    REGISTRY.register(Box::new(PHASE.clone()))?;
    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_requeues_total(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

pub fn increment_apply_operations(kind: &str, outcome: &str) {
    APPLY_OPERATIONS_TOTAL
        .with_label_values(&[kind, outcome])
        .inc();
}

pub fn set_teardown_remaining(count: usize) {
    TEARDOWN_REMAINING.set(i64::try_from(count).unwrap_or(i64::MAX));
}

/// Mark `phase` as the active phase of `name`
pub fn set_phase(name: &str, phase: Phase) {
    for candidate in ALL_PHASES {
        let value = i64::from(candidate == phase);
        PHASE
            .with_label_values(&[name, candidate.as_str()])
            .set(value);
    }
}
