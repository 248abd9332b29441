//! HTTP servers
//!
//! - `gate` - lease gate on `GET /` (lock mode)
//! - `status` - aggregated health on `GET /` (health mode)
//!
//! Both also expose `GET /metrics` in Prometheus text format.

mod gate;
mod status;

pub use gate::{gate, gate_router, GateState, LOCKED, LOCK_ACQUIRED};
pub use status::{status, status_router, HEALTHY, UNHEALTHY};

use crate::metrics::SharedMetrics;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Upper bound on handling a single request
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

async fn metrics(State(metrics): State<SharedMetrics>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub fn metrics_router(metrics: SharedMetrics) -> Router {
    Router::new()
        .route("/metrics", get(self::metrics))
        .with_state(metrics)
}

/// Serve `app` on `listener` until `shutdown` fires
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    let app = app
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http());

    // Log after successful bind - server is actually listening
    info!(address = ?listener.local_addr().ok(), "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    info!("Server stopped");
    Ok(())
}

#[cfg(test)]
#[path = "server_test.rs"]
mod tests;
