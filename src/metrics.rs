//! Engine Metrics
//!
//! Prometheus collectors for reconcile outcomes, stage failures, pass
//! duration and pending teardowns, kept in their own registry.

use crate::error::{Error, Result};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

const NAMESPACE: &str = "component_operator";

/// Result label for a successful invocation
pub const RESULT_SUCCESS: &str = "success";

/// Result label for a failed invocation
pub const RESULT_ERROR: &str = "error";

/// Result label for an invocation stopped by a gate
pub const RESULT_BLOCKED: &str = "blocked";

/// Result label for a teardown pass
pub const RESULT_TEARDOWN: &str = "teardown";

/// Collectors shared by every controller
pub struct EngineMetrics {
    registry: Registry,
    reconcile_total: IntCounterVec,
    stage_errors_total: IntCounterVec,
    reconcile_duration: HistogramVec,
    cleanup_pending: IntGaugeVec,
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {}", e))
}

impl EngineMetrics {
    /// Create and register all collectors
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let reconcile_total = IntCounterVec::new(
            Opts::new("reconcile_total", "Reconcile invocations by result").namespace(NAMESPACE),
            &["controller", "result"],
        )
        .map_err(metrics_error)?;
        let stage_errors_total = IntCounterVec::new(
            Opts::new("stage_errors_total", "Stage failures").namespace(NAMESPACE),
            &["controller", "stage"],
        )
        .map_err(metrics_error)?;
        let reconcile_duration = HistogramVec::new(
            HistogramOpts::new("reconcile_duration_seconds", "Duration of one invocation")
                .namespace(NAMESPACE)
                .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["controller"],
        )
        .map_err(metrics_error)?;
        let cleanup_pending = IntGaugeVec::new(
            Opts::new("cleanup_pending", "Instances waiting on teardown").namespace(NAMESPACE),
            &["controller"],
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(reconcile_total.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(stage_errors_total.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(reconcile_duration.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(cleanup_pending.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            reconcile_total,
            stage_errors_total,
            reconcile_duration,
            cleanup_pending,
        })
    }

    /// Record one finished invocation
    pub fn observe_reconcile(&self, controller: &str, result: &str, seconds: f64) {
        self.reconcile_total
            .with_label_values(&[controller, result])
            .inc();
        self.reconcile_duration
            .with_label_values(&[controller])
            .observe(seconds);
    }

    pub fn stage_error(&self, controller: &str, stage: &str) {
        self.stage_errors_total
            .with_label_values(&[controller, stage])
            .inc();
    }

    pub fn set_cleanup_pending(&self, controller: &str, pending: usize) {
        self.cleanup_pending
            .with_label_values(&[controller])
            .set(pending as i64);
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition of every collector
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }
}
