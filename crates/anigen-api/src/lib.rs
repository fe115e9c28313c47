//! Axum HTTP/WS API server.
//!
//! This crate provides:
//! - The novel-to-video wizard endpoints
//! - Context history and rollback endpoints
//! - A WebSocket progress stream
//! - Rate limiting, security headers and Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod ws;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
