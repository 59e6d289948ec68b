//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `acme_http01_reconciliations_total` - Total number of reconciliations
//! - `acme_http01_reconciliation_errors_total` - Reconciliation errors by class (`transient`, `configuration`)
//! - `acme_http01_reconciliation_duration_seconds` - Duration of reconciliation operations
//! - `acme_http01_requeues_total` - Requeues by reason
//! - `acme_http01_solver_resources_created_total` - Solver objects created by kind
//! - `acme_http01_solver_resources_deleted_total` - Solver objects deleted by kind
//! - `acme_http01_merge_conflicts_retried_total` - Conflicting patches on shared objects that were retried
//! - `acme_http01_orphans_swept_total` - Orphaned solver resource sets cleaned up by the sweep

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "acme_http01_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "acme_http01_reconciliation_errors_total",
            "Total number of reconciliation errors by error class",
        ),
        &["class"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "acme_http01_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "acme_http01_requeues_total",
            "Total number of requeues by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static SOLVER_RESOURCES_CREATED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "acme_http01_solver_resources_created_total",
            "Total number of solver objects created by kind",
        ),
        &["kind"],
    )
    .expect("Failed to create SOLVER_RESOURCES_CREATED_TOTAL metric - this should never happen")
});

static SOLVER_RESOURCES_DELETED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "acme_http01_solver_resources_deleted_total",
            "Total number of solver objects deleted by kind",
        ),
        &["kind"],
    )
    .expect("Failed to create SOLVER_RESOURCES_DELETED_TOTAL metric - this should never happen")
});

static MERGE_CONFLICTS_RETRIED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "acme_http01_merge_conflicts_retried_total",
            "Total number of conflicting patches on shared objects that were retried",
        ),
        &["kind"],
    )
    .expect("Failed to create MERGE_CONFLICTS_RETRIED_TOTAL metric - this should never happen")
});

static ORPHANS_SWEPT_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "acme_http01_orphans_swept_total",
        "Total number of orphaned solver resource sets cleaned up",
    )
    .expect("Failed to create ORPHANS_SWEPT_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SOLVER_RESOURCES_CREATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SOLVER_RESOURCES_DELETED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(MERGE_CONFLICTS_RETRIED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ORPHANS_SWEPT_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors(class: &str) {
    RECONCILIATION_ERRORS_TOTAL.with_label_values(&[class]).inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_requeues_total(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

pub fn increment_solver_resources_created(kind: &str) {
    SOLVER_RESOURCES_CREATED_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_solver_resources_deleted(kind: &str) {
    SOLVER_RESOURCES_DELETED_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_merge_conflicts_retried(kind: &str) {
    MERGE_CONFLICTS_RETRIED_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_orphans_swept() {
    ORPHANS_SWEPT_TOTAL.inc();
}
