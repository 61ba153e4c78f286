//! Prometheus metrics for server observability.

use metrics::{counter, gauge, histogram};

/// Initialize metrics exporter (Prometheus).
pub fn init_metrics() {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    if let Err(e) = builder.install() {
        tracing::warn!("Failed to install Prometheus exporter: {}", e);
    }
}

/// Record a webhook delivery that reached an endpoint.
pub fn webhook_received(event_type: &str) {
    counter!("deployhook_webhooks_received_total", "event" => event_type.to_string()).increment(1);
}

/// Record a delivery rejected before classification.
pub fn webhook_rejected(reason: &str) {
    counter!("deployhook_webhooks_rejected_total", "reason" => reason.to_string()).increment(1);
}

/// Record a delivery outcome (ignored / dispatched / failed).
pub fn deployment_outcome(outcome: &str) {
    counter!("deployhook_deployments_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record a trigger folded into an already pending deployment.
pub fn deployment_coalesced() {
    counter!("deployhook_deployments_coalesced_total").increment(1);
}

/// Record deployment duration.
pub fn deployment_duration(duration_ms: u64) {
    histogram!("deployhook_deployment_duration_ms").record(duration_ms as f64);
}

/// Record deploy step duration.
pub fn step_duration(step_name: &str, duration_ms: u64) {
    histogram!("deployhook_step_duration_ms", "step" => step_name.to_string())
        .record(duration_ms as f64);
}

/// Set current number of endpoints with an in-flight deployment.
pub fn active_deployments(count: usize) {
    gauge!("deployhook_active_deployments").set(count as f64);
}

/// Record a scheduler tick skipped because the previous run was still going.
pub fn tick_skipped(task: &str) {
    counter!("deployhook_scheduler_ticks_skipped_total", "task" => task.to_string()).increment(1);
}

/// Record a finished scheduled run.
pub fn task_finished(task: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "deployhook_scheduler_runs_total",
        "task" => task.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record a persisted metric sample.
pub fn sample_recorded() {
    counter!("deployhook_metric_samples_total").increment(1);
}

/// Record samples removed by retention.
pub fn samples_pruned(count: u64) {
    counter!("deployhook_metric_samples_pruned_total").increment(count);
}

/// Record an error occurrence.
pub fn error_recorded(category: &str) {
    counter!("deployhook_errors_total", "category" => category.to_string()).increment(1);
}
