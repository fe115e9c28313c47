//! Prometheus metrics for the API server.

use std::time::Instant;

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "anigen_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "anigen_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "anigen_http_requests_in_flight";

    // WebSocket metrics
    pub const WS_CONNECTIONS_TOTAL: &str = "anigen_ws_connections_total";
    pub const WS_CONNECTIONS_ACTIVE: &str = "anigen_ws_connections_active";
    pub const WS_MESSAGES_SENT: &str = "anigen_ws_messages_sent_total";

    // Project metrics
    pub const PROJECTS_CREATED_TOTAL: &str = "anigen_projects_created_total";
    pub const CHARACTERS_CONFIRMED_TOTAL: &str = "anigen_characters_confirmed_total";
    pub const ROLLBACKS_TOTAL: &str = "anigen_rollbacks_total";

    // Rate limiting metrics
    pub const RATE_LIMIT_HITS_TOTAL: &str = "anigen_rate_limit_hits_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", path.to_string()),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_ws_connection(endpoint: &str) {
    let labels = [("endpoint", endpoint.to_string())];
    counter!(names::WS_CONNECTIONS_TOTAL, &labels).increment(1);
}

pub fn set_ws_active_connections(count: i64) {
    gauge!(names::WS_CONNECTIONS_ACTIVE).set(count as f64);
}

pub fn record_ws_message_sent(stage: &str) {
    let labels = [("stage", stage.to_string())];
    counter!(names::WS_MESSAGES_SENT, &labels).increment(1);
}

pub fn record_project_created() {
    counter!(names::PROJECTS_CREATED_TOTAL).increment(1);
}

pub fn record_character_confirmed() {
    counter!(names::CHARACTERS_CONFIRMED_TOTAL).increment(1);
}

pub fn record_rollback() {
    counter!(names::ROLLBACKS_TOTAL).increment(1);
}

pub fn record_rate_limit_hit(endpoint: &str) {
    let labels = [("endpoint", endpoint.to_string())];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

/// Route template for metric labels, so project ids don't explode cardinality.
fn route_label(request: &Request<Body>) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string())
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = route_label(&request);
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
    let response = next.run(request).await;
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    record_http_request(
        &method,
        &path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_label_without_matched_route() {
        let request = Request::builder()
            .uri("/api/context/abc")
            .body(Body::empty())
            .unwrap();
        assert_eq!(route_label(&request), "unmatched");
    }
}
