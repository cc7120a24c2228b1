//! Prometheus metrics for the API server.

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "vmart_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "vmart_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "vmart_http_requests_in_flight";

    // WebSocket metrics
    pub const WS_CONNECTIONS_TOTAL: &str = "vmart_ws_connections_total";
    pub const WS_CONNECTIONS_ACTIVE: &str = "vmart_ws_connections_active";
    pub const WS_MESSAGES_RECEIVED: &str = "vmart_ws_messages_received_total";

    // Ingestion metrics
    pub const EVENTS_RECEIVED_TOTAL: &str = "vmart_progress_events_received_total";
    pub const EVENTS_REJECTED_TOTAL: &str = "vmart_progress_events_rejected_total";
    pub const EVENTS_QUEUED_TOTAL: &str = "vmart_progress_events_queued_total";
    pub const QUEUE_DEPTH: &str = "vmart_progress_queue_depth";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record WebSocket connection.
pub fn record_ws_connection() {
    counter!(names::WS_CONNECTIONS_TOTAL).increment(1);
}

/// Update active WebSocket connections gauge.
pub fn set_ws_active_connections(count: i64) {
    gauge!(names::WS_CONNECTIONS_ACTIVE).set(count as f64);
}

/// Record WebSocket message received.
pub fn record_ws_message_received() {
    counter!(names::WS_MESSAGES_RECEIVED).increment(1);
}

/// Record a progress event received on the wire.
pub fn record_event_received() {
    counter!(names::EVENTS_RECEIVED_TOTAL).increment(1);
}

/// Record a rejected progress event.
pub fn record_event_rejected(reason: &str) {
    let labels = [("reason", reason.to_string())];
    counter!(names::EVENTS_REJECTED_TOTAL, &labels).increment(1);
}

/// Record a queued progress event.
pub fn record_event_queued(outcome: &str) {
    let labels = [("outcome", outcome.to_string())];
    counter!(names::EVENTS_QUEUED_TOTAL, &labels).increment(1);
}

/// Update the pending-key gauge.
pub fn set_queue_depth(depth: u64) {
    gauge!(names::QUEUE_DEPTH).set(depth as f64);
}

/// Sanitize path for metrics labels (remove IDs, etc.).
fn sanitize_path(path: &str) -> String {
    let path = regex_lite::Regex::new(r"/users/[a-zA-Z0-9_-]+")
        .unwrap()
        .replace_all(path, "/users/:user_id");
    let path = regex_lite::Regex::new(r"/videos/[a-zA-Z0-9_-]+")
        .unwrap()
        .replace_all(&path, "/videos/:video_id");
    path.to_string()
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(
            sanitize_path("/api/users/u_123/videos/vid-42/progress"),
            "/api/users/:user_id/videos/:video_id/progress"
        );
        assert_eq!(sanitize_path("/healthz"), "/healthz");
    }
}
