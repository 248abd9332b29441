//! Read-only health status endpoint
//!
//! `GET /` answers `200 Healthy` while every enabled check passes and
//! `412 Unhealthy` otherwise.

use crate::health::HealthAggregator;
use axum::{extract::State, http::StatusCode, routing::get, Router};
use tracing::debug;

pub const HEALTHY: &str = "Healthy";
pub const UNHEALTHY: &str = "Unhealthy";

/// Status handler
pub async fn status(State(health): State<HealthAggregator>) -> (StatusCode, &'static str) {
    let response = if health.is_healthy() {
        (StatusCode::OK, HEALTHY)
    } else {
        (StatusCode::PRECONDITION_FAILED, UNHEALTHY)
    };
    debug!(status = response.0.as_u16(), "Responding to status request");
    response
}

pub fn status_router(health: HealthAggregator) -> Router {
    Router::new().route("/", get(status)).with_state(health)
}
