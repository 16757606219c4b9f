//! # Metrics
//!
//! Prometheus metrics for monitoring the reconciler.
//!
//! ## Metrics Exposed
//!
//! - `gitops_reconciler_ticks_total` - Total number of reconciliation ticks
//! - `gitops_reconciler_tick_errors_total` - Ticks aborted by a render, read or timeout failure
//! - `gitops_reconciler_tick_duration_seconds` - Duration of reconciliation ticks
//! - `gitops_reconciler_objects_applied_total` - Cluster mutations by action (create, update, delete)
//! - `gitops_reconciler_apply_errors_total` - Failed cluster mutations
//! - `gitops_reconciler_drift_detections_total` - Ticks that found live drift with unchanged desired state
//! - `gitops_reconciler_secrets_resolved_total` - Secret lookups served, by provider
//! - `gitops_reconciler_provider_errors_total` - Secret lookups failed, by provider
//! - `gitops_reconciler_render_duration_seconds` - Duration of manifest rendering
//! - `gitops_reconciler_render_errors_total` - Failed renders
//! - `gitops_reconciler_managed_applications` - Applications currently registered

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, IntGauge, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static TICKS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "gitops_reconciler_ticks_total",
        "Total number of reconciliation ticks",
    )
    .expect("Failed to create TICKS_TOTAL metric - this should never happen")
});

static TICK_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "gitops_reconciler_tick_errors_total",
        "Total number of aborted reconciliation ticks",
    )
    .expect("Failed to create TICK_ERRORS_TOTAL metric - this should never happen")
});

static TICK_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "gitops_reconciler_tick_duration_seconds",
            "Duration of reconciliation ticks in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
    )
    .expect("Failed to create TICK_DURATION metric - this should never happen")
});

static OBJECTS_APPLIED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "gitops_reconciler_objects_applied_total",
            "Total number of cluster mutations by action",
        ),
        &["action"],
    )
    .expect("Failed to create OBJECTS_APPLIED_TOTAL metric - this should never happen")
});

static APPLY_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "gitops_reconciler_apply_errors_total",
        "Total number of failed cluster mutations",
    )
    .expect("Failed to create APPLY_ERRORS_TOTAL metric - this should never happen")
});

static DRIFT_DETECTIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "gitops_reconciler_drift_detections_total",
        "Total number of ticks that detected live drift",
    )
    .expect("Failed to create DRIFT_DETECTIONS_TOTAL metric - this should never happen")
});

static SECRETS_RESOLVED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "gitops_reconciler_secrets_resolved_total",
            "Total number of secret lookups served by provider",
        ),
        &["provider"],
    )
    .expect("Failed to create SECRETS_RESOLVED_TOTAL metric - this should never happen")
});

static PROVIDER_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "gitops_reconciler_provider_errors_total",
            "Total number of failed secret lookups by provider",
        ),
        &["provider"],
    )
    .expect("Failed to create PROVIDER_ERRORS_TOTAL metric - this should never happen")
});

static RENDER_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "gitops_reconciler_render_duration_seconds",
            "Duration of manifest rendering in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
    )
    .expect("Failed to create RENDER_DURATION metric - this should never happen")
});

static RENDER_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "gitops_reconciler_render_errors_total",
        "Total number of failed renders",
    )
    .expect("Failed to create RENDER_ERRORS_TOTAL metric - this should never happen")
});

static MANAGED_APPLICATIONS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "gitops_reconciler_managed_applications",
        "Current number of registered applications",
    )
    .expect("Failed to create MANAGED_APPLICATIONS metric - this should never happen")
});

static DURATION_PARSING_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "gitops_reconciler_duration_parsing_errors_total",
        "Total number of interval parsing errors",
    )
    .expect("Failed to create DURATION_PARSING_ERRORS_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(TICKS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TICK_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TICK_DURATION.clone()))?;
    REGISTRY.register(Box::new(OBJECTS_APPLIED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(APPLY_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DRIFT_DETECTIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SECRETS_RESOLVED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PROVIDER_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RENDER_DURATION.clone()))?;
    REGISTRY.register(Box::new(RENDER_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(MANAGED_APPLICATIONS.clone()))?;
    REGISTRY.register(Box::new(DURATION_PARSING_ERRORS_TOTAL.clone()))?;

    Ok(())
}

pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    REGISTRY.gather()
}

pub fn increment_ticks() {
    TICKS_TOTAL.inc();
}

pub fn increment_tick_errors() {
    TICK_ERRORS_TOTAL.inc();
}

pub fn observe_tick_duration(duration: f64) {
    TICK_DURATION.observe(duration);
}

/// Record one successful cluster mutation; `action` is `create`, `update` or `delete`
pub fn increment_objects_applied(action: &str) {
    OBJECTS_APPLIED_TOTAL.with_label_values(&[action]).inc();
}

pub fn increment_apply_errors() {
    APPLY_ERRORS_TOTAL.inc();
}

pub fn increment_drift_detections() {
    DRIFT_DETECTIONS_TOTAL.inc();
}

pub fn increment_secrets_resolved(provider: &str) {
    SECRETS_RESOLVED_TOTAL.with_label_values(&[provider]).inc();
}

pub fn increment_provider_errors(provider: &str) {
    PROVIDER_ERRORS_TOTAL.with_label_values(&[provider]).inc();
}

pub fn observe_render_duration(duration: f64) {
    RENDER_DURATION.observe(duration);
}

pub fn increment_render_errors() {
    RENDER_ERRORS_TOTAL.inc();
}

pub fn set_managed_applications(count: i64) {
    MANAGED_APPLICATIONS.set(count);
}

pub fn increment_duration_parsing_errors() {
    DURATION_PARSING_ERRORS_TOTAL.inc();
}
