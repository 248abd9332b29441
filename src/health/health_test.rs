//! Tests for the evaluator loop and aggregator

use super::*;
use crate::metrics::create_metrics;
use std::sync::Mutex;
use tokio::time::Instant;

/// Replays scripted results and records when each check ran
struct ScriptedCheck {
    results: Mutex<Vec<bool>>,
    calls: Arc<Mutex<Vec<Instant>>>,
}

impl ScriptedCheck {
    fn new(results: &[bool]) -> (Self, Arc<Mutex<Vec<Instant>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut results = results.to_vec();
        results.reverse();
        (
            Self {
                results: Mutex::new(results),
                calls: calls.clone(),
            },
            calls,
        )
    }
}

#[async_trait]
impl HealthCheck for ScriptedCheck {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn check(&self) -> bool {
        self.calls.lock().unwrap().push(Instant::now());
        // last scripted result repeats forever
        let mut results = self.results.lock().unwrap();
        if results.len() > 1 {
            results.pop().unwrap()
        } else {
            results.last().copied().unwrap_or(false)
        }
    }
}

const PERIODS: Periods = Periods {
    on_pass: Duration::from_secs(60),
    on_fail: Duration::from_secs(10),
};

fn intervals(calls: &[Instant]) -> Vec<Duration> {
    calls.windows(2).map(|w| w[1] - w[0]).collect()
}

#[test]
fn test_signal_starts_unhealthy() {
    let signal = HealthSignal::new("x");

    assert!(signal.is_enabled());
    assert!(!signal.is_healthy());
}

#[test]
fn test_disabled_signal_is_always_healthy() {
    let signal = HealthSignal::disabled("x");
    signal.set(false);

    assert!(!signal.is_enabled());
    assert!(signal.is_healthy());
}

#[test]
fn test_signal_clones_share_state() {
    let signal = HealthSignal::new("x");
    let reader = signal.clone();

    assert!(!signal.set(true), "Previous value should be returned");
    assert!(reader.is_healthy());
}

#[test]
fn test_periods_after() {
    assert_eq!(PERIODS.after(true), Duration::from_secs(60));
    assert_eq!(PERIODS.after(false), Duration::from_secs(10));
}

#[test]
fn test_aggregator_ands_enabled_signals() {
    let a = HealthSignal::new("a");
    let b = HealthSignal::new("b");
    let off = HealthSignal::disabled("off");
    let aggregator = HealthAggregator::new(vec![a.clone(), b.clone(), off]);

    assert!(!aggregator.is_healthy());
    a.set(true);
    assert!(!aggregator.is_healthy());
    b.set(true);
    assert!(aggregator.is_healthy());
    a.set(false);
    assert!(!aggregator.is_healthy());
}

#[test]
fn test_empty_aggregator_is_healthy() {
    assert!(HealthAggregator::default().is_healthy());
}

#[tokio::test(start_paused = true)]
async fn test_evaluator_publishes_result() {
    let (check, _calls) = ScriptedCheck::new(&[true]);
    let evaluator = Evaluator::new(Box::new(check), PERIODS, create_metrics().unwrap());
    let signal = evaluator.signal();
    let shutdown = CancellationToken::new();
    let handle = evaluator.spawn(shutdown.clone());

    assert!(!signal.is_healthy(), "Should fail closed before first check");
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(signal.is_healthy());

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_evaluator_uses_hysteresis_periods() {
    let (check, calls) = ScriptedCheck::new(&[false, false, true, true, false]);
    let evaluator = Evaluator::new(Box::new(check), PERIODS, create_metrics().unwrap());
    let signal = evaluator.signal();
    let shutdown = CancellationToken::new();
    let handle = evaluator.spawn(shutdown.clone());

    // fail, fail, pass, pass, fail: 10 + 10 + 60 + 60 seconds of sleep
    tokio::time::sleep(Duration::from_secs(141)).await;
    assert!(!signal.is_healthy());

    shutdown.cancel();
    handle.await.unwrap();

    let calls = calls.lock().unwrap();
    assert!(calls.len() >= 5, "Expected at least 5 checks, got {}", calls.len());
    assert_eq!(
        intervals(&calls[..5]),
        vec![
            Duration::from_secs(10),
            Duration::from_secs(10),
            Duration::from_secs(60),
            Duration::from_secs(60),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_evaluator_stops_promptly_on_shutdown() {
    let (check, calls) = ScriptedCheck::new(&[true]);
    let evaluator = Evaluator::new(Box::new(check), PERIODS, create_metrics().unwrap());
    let shutdown = CancellationToken::new();
    let handle = evaluator.spawn(shutdown.clone());

    tokio::time::sleep(Duration::from_secs(1)).await;
    let started = Instant::now();
    shutdown.cancel();
    handle.await.unwrap();

    assert!(Instant::now() - started < Duration::from_secs(1));
    assert_eq!(calls.lock().unwrap().len(), 1, "Should not check again after shutdown");
}

#[tokio::test(start_paused = true)]
async fn test_evaluator_records_metrics() {
    let metrics = create_metrics().unwrap();
    let (check, _calls) = ScriptedCheck::new(&[false]);
    let evaluator = Evaluator::new(Box::new(check), PERIODS, metrics.clone());
    let shutdown = CancellationToken::new();
    let handle = evaluator.spawn(shutdown.clone());

    tokio::time::sleep(Duration::from_secs(25)).await;
    shutdown.cancel();
    handle.await.unwrap();

    let output = metrics.encode().unwrap();
    assert!(output.contains("podlock_health_checks_total{check=\"scripted\",result=\"fail\"} 3"));
    assert!(output.contains("podlock_health_status{check=\"scripted\"} 0"));
}
