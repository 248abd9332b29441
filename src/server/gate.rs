//! Lease gate endpoint
//!
//! `GET /?duration=<seconds>` grants a lease when the node is healthy and a
//! slot is free. A missing or unparsable duration falls back to the
//! configured default. Every granted request consumes a slot.

use crate::health::HealthAggregator;
use crate::lease::LeaseManager;
use crate::metrics::{LeaseOutcome, SharedMetrics};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const LOCK_ACQUIRED: &str = "Lock acquired";
pub const LOCKED: &str = "Locked";

/// Shared state of the gate
#[derive(Clone)]
pub struct GateState {
    pub leases: Arc<LeaseManager>,
    pub health: HealthAggregator,
    pub default_duration: Duration,
    pub metrics: SharedMetrics,
}

/// Requested lease duration, if present and a whole number of seconds
pub(super) fn requested_duration(params: &[(String, String)]) -> Option<Duration> {
    let raw = params
        .iter()
        .find(|(key, _)| key == "duration")
        .map(|(_, value)| value.as_str())
        .filter(|value| !value.is_empty())?;

    match raw.parse::<u64>() {
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(e) => {
            warn!(duration = %raw, error = %e, "Invalid lease duration requested, using default");
            None
        }
    }
}

/// Gate handler
pub async fn gate(
    State(state): State<GateState>,
    Query(params): Query<Vec<(String, String)>>,
) -> (StatusCode, &'static str) {
    let outcome = if !state.health.is_healthy() {
        LeaseOutcome::Unhealthy
    } else {
        let duration = requested_duration(&params).unwrap_or(state.default_duration);
        if state.leases.acquire(duration) {
            LeaseOutcome::Granted
        } else {
            LeaseOutcome::Locked
        }
    };
    state.metrics.record_lease_request(outcome);

    let response = match outcome {
        LeaseOutcome::Granted => (StatusCode::OK, LOCK_ACQUIRED),
        LeaseOutcome::Locked | LeaseOutcome::Unhealthy => (StatusCode::LOCKED, LOCKED),
    };
    info!(
        status = response.0.as_u16(),
        outcome = outcome.as_str(),
        "Responding to lock request"
    );
    response
}

pub fn gate_router(state: GateState) -> Router {
    Router::new().route("/", get(gate)).with_state(state)
}
