//! Prometheus metrics for the visioncop service.
//!
//! Exposes an HTTP endpoint for Prometheus scraping.

use axum::{routing::get, Router};
use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Initialize the metrics system and return the Prometheus handle.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    describe_histogram!(
        "visioncop_search_latency_ms",
        "Time taken for similarity searches in milliseconds"
    );
    describe_counter!(
        "visioncop_search_total",
        "Total number of search requests processed"
    );
    describe_counter!(
        "visioncop_index_total",
        "Total number of images indexed"
    );
    describe_counter!(
        "visioncop_request_errors_total",
        "Total number of failed requests"
    );
    describe_gauge!(
        "visioncop_indexed_images",
        "Number of images currently in the index"
    );

    PrometheusBuilder::new().install_recorder()
}

/// Record a search latency measurement.
pub fn record_search_latency(latency_ms: f64) {
    histogram!("visioncop_search_latency_ms").record(latency_ms);
}

pub fn increment_search_count() {
    counter!("visioncop_search_total").increment(1);
}

pub fn increment_index_count() {
    counter!("visioncop_index_total").increment(1);
}

pub fn increment_request_errors() {
    counter!("visioncop_request_errors_total").increment(1);
}

/// Publish the current index size.
pub fn set_indexed_images(count: usize) {
    gauge!("visioncop_indexed_images").set(count as f64);
}

/// Create an Axum router for the metrics HTTP endpoint.
pub fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new().route("/metrics", get(move || std::future::ready(handle.render())))
}

/// Start the metrics HTTP server on the given port with auto-detect binding.
pub async fn start_metrics_server(port: u16, handle: PrometheusHandle) -> std::io::Result<()> {
    let app = metrics_router(handle);

    // Auto-detect: Try dual-stack first, fall back to IPv4-only
    if let Ok(listener) = tokio::net::TcpListener::bind(("::", port)).await {
        info!(port = port, bind = "::", "Starting metrics server (dual-stack)");
        return axum::serve(listener, app).await;
    }

    info!(port = port, bind = "0.0.0.0", "Starting metrics server (IPv4-only fallback)");
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    axum::serve(listener, app).await
}
