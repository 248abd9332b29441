//! Tests for the gate and status endpoints

use super::*;
use crate::health::{HealthAggregator, HealthSignal};
use crate::lease::LeaseManager;
use crate::metrics::create_metrics;
use axum::extract::{Query, State};
use std::net::SocketAddr;
use std::sync::Arc;

const DEFAULT_DURATION: Duration = Duration::from_secs(10);

fn gate_state(capacity: usize, healthy: bool) -> GateState {
    let signal = HealthSignal::new("test");
    signal.set(healthy);
    GateState {
        leases: Arc::new(LeaseManager::new(capacity)),
        health: HealthAggregator::new(vec![signal]),
        default_duration: DEFAULT_DURATION,
        metrics: create_metrics().expect("create metrics"),
    }
}

fn query(pairs: &[(&str, &str)]) -> Query<Vec<(String, String)>> {
    Query(
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    )
}

async fn request_lock(state: &GateState, pairs: &[(&str, &str)]) -> StatusCode {
    gate(State(state.clone()), query(pairs)).await.0
}

#[tokio::test]
async fn test_gate_grants_first_request() {
    let state = gate_state(1, true);

    let (status, body) = gate(State(state), query(&[])).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, LOCK_ACQUIRED);
}

#[tokio::test]
async fn test_gate_locks_second_request() {
    let state = gate_state(1, true);
    request_lock(&state, &[]).await;

    let (status, body) = gate(State(state), query(&[])).await;

    assert_eq!(status, StatusCode::LOCKED);
    assert_eq!(body, LOCKED);
}

#[tokio::test]
async fn test_gate_unhealthy_always_locked() {
    let state = gate_state(5, false);

    assert_eq!(request_lock(&state, &[]).await, StatusCode::LOCKED);
    assert_eq!(
        state.leases.active(),
        0,
        "No lease should be taken while unhealthy"
    );
}

#[tokio::test]
async fn test_gate_invalid_duration_uses_default() {
    let state = gate_state(1, true);

    assert_eq!(request_lock(&state, &[("duration", "a")]).await, StatusCode::OK);
    assert_eq!(
        request_lock(&state, &[("duration", "a")]).await,
        StatusCode::LOCKED,
        "Default duration lease should still be live"
    );
}

#[tokio::test]
async fn test_gate_zero_duration_expires_immediately() {
    let state = gate_state(1, true);

    assert_eq!(request_lock(&state, &[("duration", "0")]).await, StatusCode::OK);
    assert_eq!(request_lock(&state, &[("duration", "0")]).await, StatusCode::OK);
}

#[tokio::test(start_paused = true)]
async fn test_gate_requested_duration_is_honoured() {
    let state = gate_state(1, true);

    assert_eq!(request_lock(&state, &[("duration", "2")]).await, StatusCode::OK);
    assert_eq!(request_lock(&state, &[]).await, StatusCode::LOCKED);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(request_lock(&state, &[]).await, StatusCode::OK);
}

#[tokio::test]
async fn test_gate_survives_maximum_duration() {
    let state = gate_state(1, true);
    let max = u64::MAX.to_string();

    assert_eq!(request_lock(&state, &[("duration", max.as_str())]).await, StatusCode::OK);
    assert_eq!(request_lock(&state, &[]).await, StatusCode::LOCKED);
    assert_eq!(state.leases.active(), 1);
}

#[test]
fn test_requested_duration_parsing() {
    let parse = |pairs: &[(&str, &str)]| gate::requested_duration(&query(pairs).0);

    assert_eq!(parse(&[]), None);
    assert_eq!(parse(&[("duration", "")]), None);
    assert_eq!(parse(&[("duration", "-5")]), None);
    assert_eq!(parse(&[("duration", "1.5")]), None);
    assert_eq!(parse(&[("duration", "30")]), Some(Duration::from_secs(30)));
    assert_eq!(
        parse(&[("other", "1"), ("duration", "7"), ("duration", "9")]),
        Some(Duration::from_secs(7))
    );
}

#[tokio::test]
async fn test_gate_records_outcomes() {
    let state = gate_state(1, true);
    request_lock(&state, &[]).await;
    request_lock(&state, &[]).await;

    let output = state.metrics.encode().expect("encode metrics");
    assert!(output.contains("podlock_lease_requests_total{result=\"granted\"} 1"));
    assert!(output.contains("podlock_lease_requests_total{result=\"locked\"} 1"));
}

#[tokio::test]
async fn test_status_reflects_aggregate() {
    let signal = HealthSignal::new("test");
    let health = HealthAggregator::new(vec![signal.clone()]);

    assert_eq!(
        status(State(health.clone())).await,
        (StatusCode::PRECONDITION_FAILED, UNHEALTHY)
    );

    signal.set(true);
    assert_eq!(status(State(health)).await, (StatusCode::OK, HEALTHY));
}

/// Bind an ephemeral port and serve `app` until the returned token is cancelled
async fn spawn_server(app: Router) -> (SocketAddr, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    let shutdown = CancellationToken::new();
    tokio::spawn(serve(listener, app, shutdown.clone()));
    (addr, shutdown)
}

#[tokio::test]
async fn test_gate_over_http() {
    let state = gate_state(1, true);
    let app = gate_router(state.clone()).merge(metrics_router(state.metrics.clone()));
    let (addr, shutdown) = spawn_server(app).await;
    let client = reqwest::Client::new();

    let first = client
        .get(format!("http://{}/?duration=60", addr))
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(first.status(), 200);
    assert_eq!(first.text().await.expect("body"), LOCK_ACQUIRED);

    let second = client
        .get(format!("http://{}/", addr))
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(second.status(), 423);
    assert_eq!(second.text().await.expect("body"), LOCKED);

    let metrics = client
        .get(format!("http://{}/metrics", addr))
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(metrics.status(), 200);
    let body = metrics.text().await.expect("body");
    assert!(body.contains("podlock_lease_requests_total"));

    shutdown.cancel();
}

#[tokio::test]
async fn test_gate_over_http_with_maximum_duration() {
    let state = gate_state(1, true);
    let (addr, shutdown) = spawn_server(gate_router(state)).await;
    let client = reqwest::Client::new();

    let first = client
        .get(format!("http://{}/?duration={}", addr, u64::MAX))
        .send()
        .await
        .expect("request should get a response");
    assert_eq!(first.status(), 200);

    let second = client
        .get(format!("http://{}/", addr))
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(second.status(), 423);

    shutdown.cancel();
}

#[tokio::test]
async fn test_status_over_http() {
    let signal = HealthSignal::new("test");
    let app = status_router(HealthAggregator::new(vec![signal.clone()]));
    let (addr, shutdown) = spawn_server(app).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("http://{}/", addr))
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(response.status(), 412);
    assert_eq!(response.text().await.expect("body"), UNHEALTHY);

    signal.set(true);
    let response = client
        .get(format!("http://{}/", addr))
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(response.status(), 200);

    shutdown.cancel();
}
