use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Register descriptions for every metric the engine records.
pub fn describe_metrics() {
    metrics::describe_counter!("ad_jobs_submitted_total", "Total ad jobs accepted");
    metrics::describe_counter!("ad_jobs_completed_total", "Total ad jobs completed");
    metrics::describe_counter!("ad_jobs_failed_total", "Total ad jobs that failed");
    metrics::describe_gauge!("ad_queue_depth", "Jobs waiting for a worker");
    metrics::describe_histogram!(
        "stage_duration_seconds",
        metrics::Unit::Seconds,
        "Wall-clock time of a single pipeline stage call"
    );
    metrics::describe_counter!(
        "worker_recycles_total",
        "Times a worker released and rebuilt its model toolkit"
    );
}

/// Prometheus metrics scrape endpoint.
/// Returns metrics in Prometheus text exposition format.
pub async fn prometheus_metrics(
    axum::extract::State(handle): axum::extract::State<Arc<PrometheusHandle>>,
) -> impl IntoResponse {
    handle.render()
}
