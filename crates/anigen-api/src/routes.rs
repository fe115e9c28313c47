//! API routes.

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;

use crate::error::configure_error_details;
use crate::handlers::{
    confirm_character, continue_generation, get_context, get_history_version, health,
    list_history, parse_text, ready, rollback, task_status,
};
use crate::metrics::metrics_middleware;
use crate::middleware::{
    cors_layer, ip_rate_limiter, rate_limit_middleware, request_id, request_logging,
    security_headers,
};
use crate::state::AppState;
use crate::ws::ws_progress;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    configure_error_details(&state.config);

    // Wizard steps
    let project_routes = Router::new()
        .route("/parse-text", post(parse_text))
        .route("/confirm-character", post(confirm_character))
        .route("/continue-generation", post(continue_generation))
        .route("/task-status/:project_id", get(task_status));

    // Context inspection and history
    let context_routes = Router::new()
        .route("/context/:project_id", get(get_context))
        .route("/context/:project_id/history", get(list_history))
        .route("/context/:project_id/history/:version", get(get_history_version))
        .route("/rollback", post(rollback));

    let rate_limiter = ip_rate_limiter(state.config.rate_limit_rps, state.config.rate_limit_burst);

    let api_routes = Router::new()
        .merge(project_routes)
        .merge(context_routes)
        .layer(middleware::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ));

    let ws_routes = Router::new().route("/ws/:project_id", get(ws_progress));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready));

    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .nest("/api", api_routes)
        .merge(ws_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
