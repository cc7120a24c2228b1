//! Axum HTTP/WS server.
//!
//! This crate provides:
//! - The `/ws/progress` ingestion endpoint
//! - Progress read and dead-letter inspection routes
//! - Prometheus metrics and health probes

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
