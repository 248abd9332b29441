//! Gate stress tests
//!
//! Hammer a served lease gate with concurrent clients and check that it
//! never grants more leases than its capacity.
//!
//! Run with: cargo test --test stress_test -- --nocapture

#![allow(clippy::expect_used)]

use futures::future::join_all;
use podlock::metrics::create_metrics;
use podlock::server::{gate_router, serve, GateState};
use podlock::{HealthAggregator, HealthSignal, LeaseManager};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

// =============================================================================
// HELPERS
// =============================================================================

async fn start_gate(capacity: usize, health: HealthAggregator) -> (SocketAddr, CancellationToken) {
    let state = GateState {
        leases: Arc::new(LeaseManager::new(capacity)),
        health,
        default_duration: Duration::from_secs(60),
        metrics: create_metrics().expect("metrics"),
    };
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind gate listener");
    let addr = listener.local_addr().expect("local addr");
    let shutdown = CancellationToken::new();
    tokio::spawn(serve(listener, gate_router(state), shutdown.clone()));
    (addr, shutdown)
}

fn healthy() -> HealthAggregator {
    let signal = HealthSignal::new("stress");
    signal.set(true);
    HealthAggregator::new(vec![signal])
}

/// Fire `requests` concurrent lock requests, return how many were granted
async fn burst(addr: SocketAddr, requests: usize, duration_secs: u64) -> u64 {
    let client = reqwest::Client::new();
    let granted = Arc::new(AtomicU64::new(0));

    let futures: Vec<_> = (0..requests)
        .map(|_| {
            let client = client.clone();
            let granted = granted.clone();
            async move {
                let response = client
                    .get(format!("http://{}/?duration={}", addr, duration_secs))
                    .send()
                    .await
                    .expect("request should succeed");
                if response.status() == 200 {
                    granted.fetch_add(1, Ordering::Relaxed);
                }
            }
        })
        .collect();
    join_all(futures).await;

    granted.load(Ordering::Relaxed)
}

// =============================================================================
// LOAD TESTS
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_load_concurrent_requests_respect_capacity() {
    const CAPACITY: usize = 5;
    const REQUESTS: usize = 200;

    let (addr, shutdown) = start_gate(CAPACITY, healthy()).await;
    let start = Instant::now();

    let granted = burst(addr, REQUESTS, 60).await;

    println!(
        "  {}/{} requests granted in {:?}",
        granted,
        REQUESTS,
        start.elapsed()
    );
    assert_eq!(granted, CAPACITY as u64, "Gate must grant exactly its capacity");

    shutdown.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_load_slots_free_after_expiry() {
    const CAPACITY: usize = 3;

    let (addr, shutdown) = start_gate(CAPACITY, healthy()).await;

    assert_eq!(burst(addr, 20, 1).await, CAPACITY as u64);
    assert_eq!(burst(addr, 20, 1).await, 0, "Leases are still live");

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(
        burst(addr, 20, 1).await,
        CAPACITY as u64,
        "Expired leases should free their slots"
    );

    shutdown.cancel();
}

// =============================================================================
// CHAOS TESTS
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_chaos_health_flapping_never_overgrants() {
    const CAPACITY: usize = 4;

    let signal = HealthSignal::new("flapping");
    let (addr, shutdown) = start_gate(CAPACITY, HealthAggregator::new(vec![signal.clone()])).await;

    let flapper = {
        let signal = signal.clone();
        let stop = shutdown.clone();
        tokio::spawn(async move {
            let mut healthy = false;
            while !stop.is_cancelled() {
                healthy = !healthy;
                signal.set(healthy);
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };

    let mut total = 0;
    for _ in 0..10 {
        total += burst(addr, 20, 60).await;
    }

    println!("  {} leases granted while health was flapping", total);
    assert!(total <= CAPACITY as u64, "Granted {} > capacity", total);

    shutdown.cancel();
    flapper.await.expect("flapper task");
}
