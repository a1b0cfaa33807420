//! Prometheus metrics for imagestore.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, provides a Tower-compatible middleware for
//! HTTP RED metrics, and exposes the `/metrics` endpoint handler.

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "imagestore_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "imagestore_http_request_duration_seconds";

/// Total image operations (counter). Labels: operation, outcome.
pub const IMAGE_OPERATIONS_TOTAL: &str = "imagestore_image_operations_total";

/// Total bytes of successfully stored uploads (counter).
pub const BYTES_UPLOADED_TOTAL: &str = "imagestore_bytes_uploaded_total";

/// Last computed average images per user (gauge).
pub const INSTANCE_WEIGHT: &str = "imagestore_instance_weight";

// -- Global recorder installation ---------------------------------------------

/// Singleton handle to the Prometheus recorder.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent -- safe to call
/// multiple times (e.g. in tests). Returns a reference to the global handle.
pub fn init_metrics() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder")
    })
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(IMAGE_OPERATIONS_TOTAL, "Total image operations by type and outcome");
    describe_counter!(BYTES_UPLOADED_TOTAL, "Total bytes of stored uploads");
    describe_gauge!(INSTANCE_WEIGHT, "Average images per user at last weight request");
}

/// Count one image operation. `outcome` is `success`, `rejected` or `error`.
pub fn record_operation(operation: &'static str, outcome: &'static str) {
    counter!(IMAGE_OPERATIONS_TOTAL, "operation" => operation, "outcome" => outcome).increment(1);
}

pub fn record_upload_bytes(bytes: usize) {
    counter!(BYTES_UPLOADED_TOTAL).increment(bytes as u64);
}

pub fn record_weight(weight: f64) {
    gauge!(INSTANCE_WEIGHT).set(weight);
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that records HTTP RED metrics for every request.
///
/// Excludes `/metrics` from self-instrumentation to avoid feedback loops.
/// Must be the outermost layer so it captures the full request lifecycle.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    if req.uri().path() == "/metrics" {
        return next.run(req).await;
    }

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

// -- Path normalization -------------------------------------------------------

/// Map a request path to a bounded label set.
///
/// Known routes keep their path; `/docs/...` assets collapse to `/docs`;
/// anything else is `/{other}` so scanners cannot inflate cardinality.
fn normalize_path(path: &str) -> String {
    match path {
        "/health" | "/metrics" | "/docs" | "/openapi.json" | "/image/upload" | "/image/list"
        | "/image/list/weight" | "/image/delete" => path.to_string(),
        _ if path.starts_with("/docs/") => "/docs".to_string(),
        _ => "/{other}".to_string(),
    }
}

// -- Metrics endpoint handler -------------------------------------------------

/// `GET /metrics` -- Render Prometheus exposition format text.
pub async fn metrics_handler() -> impl IntoResponse {
    let body = init_metrics().render();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}

// -- Tests --------------------------------------------------------------------
