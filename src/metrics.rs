// Prometheus metrics definitions for the tournament and ladder core.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Gauges ───────────────────────────────────────────────────────

    /// Stages with generated matches that have not completed yet.
    pub static ref STAGES_RUNNING: IntGauge =
        IntGauge::new("cue_stages_running", "Stages currently running").unwrap();

    // ── Counters ─────────────────────────────────────────────────────

    /// Total brackets and group schedules generated, by format.
    pub static ref BRACKETS_GENERATED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cue_brackets_generated_total", "Total brackets generated"),
        &["format"],
    )
    .unwrap();

    /// Total matches that reached a settled state, by status.
    pub static ref MATCHES_SETTLED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cue_matches_settled_total", "Total matches settled"),
        &["status"],
    )
    .unwrap();

    /// Propagations dropped because the target match was missing or full.
    pub static ref PROPAGATION_SKIPPED_TOTAL: IntCounter = IntCounter::new(
        "cue_propagation_skipped_total",
        "Propagations skipped for a missing or full target",
    )
    .unwrap();

    /// Results withdrawn from downstream matches after an edit.
    pub static ref RESULT_REVERTS_TOTAL: IntCounter = IntCounter::new(
        "cue_result_reverts_total",
        "Results reverted after an edit",
    )
    .unwrap();

    /// Total ladder rearrangements, by trigger.
    pub static ref LADDER_REARRANGEMENTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cue_ladder_rearrangements_total", "Total ladder rearrangements"),
        &["trigger"],
    )
    .unwrap();

    // ── Histograms ───────────────────────────────────────────────────

    /// Core operation duration in seconds, by operation.
    pub static ref OPERATION_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "cue_operation_duration_seconds",
            "Core operation duration in seconds",
        )
        .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        &["operation"],
    )
    .unwrap();
}

/// Register all metrics with the custom registry. Call once at startup.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(STAGES_RUNNING.clone()),
        Box::new(BRACKETS_GENERATED_TOTAL.clone()),
        Box::new(MATCHES_SETTLED_TOTAL.clone()),
        Box::new(PROPAGATION_SKIPPED_TOTAL.clone()),
        Box::new(RESULT_REVERTS_TOTAL.clone()),
        Box::new(LADDER_REARRANGEMENTS_TOTAL.clone()),
        Box::new(OPERATION_DURATION_SECONDS.clone()),
    ];

    for c in collectors {
        // Already registered when called twice (tests, embedding).
        let _ = REGISTRY.register(c);
    }
}

/// Serialize all registered metrics to the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Start a duration timer for one core operation; the sample is recorded
/// when the returned guard drops.
pub fn time_operation(operation: &str) -> prometheus::HistogramTimer {
    OPERATION_DURATION_SECONDS
        .with_label_values(&[operation])
        .start_timer()
}
