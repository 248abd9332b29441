//! Adaptive health evaluation
//!
//! Each enabled check runs in its own task: check, publish the result, then
//! sleep for the on-pass or on-fail period depending on that result. The
//! aggregator ANDs the latest published results together.
//!
//! - `endpoints` - raw/HTTP endpoint reachability
//! - `daemonsets` - DaemonSet rollout on this node
//! - `nodeload` - node CPU utilisation

pub mod daemonset;
pub mod endpoints;
pub mod nodeload;

pub use daemonset::{DaemonSetCheck, DaemonSetFilter};
pub use endpoints::EndpointCheck;
pub use nodeload::NodeLoadCheck;

use crate::metrics::SharedMetrics;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One kind of health signal
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Short name used in logs and metrics
    fn name(&self) -> &'static str;

    /// Run the check once; failures to reach a dependency count as unhealthy
    async fn check(&self) -> bool;
}

/// Published result of one check
///
/// Written only by the owning evaluator loop, read by anyone. A disabled
/// signal always reads healthy.
#[derive(Debug, Clone)]
pub struct HealthSignal {
    name: &'static str,
    enabled: bool,
    healthy: Arc<AtomicBool>,
}

impl HealthSignal {
    /// Signal for an enabled check; unhealthy until the first check passes
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            enabled: true,
            healthy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Signal for a check that is switched off
    pub fn disabled(name: &'static str) -> Self {
        Self {
            name,
            enabled: false,
            healthy: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_healthy(&self) -> bool {
        !self.enabled || self.healthy.load(Ordering::SeqCst)
    }

    /// Publish a new result, returning the previous one
    pub fn set(&self, healthy: bool) -> bool {
        self.healthy.swap(healthy, Ordering::SeqCst)
    }
}

/// Poll intervals after a passing and after a failing check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Periods {
    pub on_pass: Duration,
    pub on_fail: Duration,
}

impl Periods {
    pub fn new(on_pass: Duration, on_fail: Duration) -> Self {
        Self { on_pass, on_fail }
    }

    pub fn after(&self, healthy: bool) -> Duration {
        if healthy {
            self.on_pass
        } else {
            self.on_fail
        }
    }
}

/// Owns the polling loop of one check
pub struct Evaluator {
    check: Box<dyn HealthCheck>,
    periods: Periods,
    signal: HealthSignal,
    metrics: SharedMetrics,
}

impl Evaluator {
    pub fn new(check: Box<dyn HealthCheck>, periods: Periods, metrics: SharedMetrics) -> Self {
        let signal = HealthSignal::new(check.name());
        info!(
            check = check.name(),
            on_pass_secs = periods.on_pass.as_secs(),
            on_fail_secs = periods.on_fail.as_secs(),
            "Configured health evaluator"
        );
        Self {
            check,
            periods,
            signal,
            metrics,
        }
    }

    /// Handle to the signal this evaluator publishes to
    pub fn signal(&self) -> HealthSignal {
        self.signal.clone()
    }

    /// Run until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) {
        let name = self.check.name();
        info!(check = name, "Starting health evaluator");

        loop {
            let healthy = tokio::select! {
                healthy = self.check.check() => healthy,
                _ = shutdown.cancelled() => break,
            };

            let previous = self.signal.set(healthy);
            if previous != healthy {
                if healthy {
                    info!(check = name, "Health check passing");
                } else {
                    warn!(check = name, "Health check failing");
                }
            }
            debug!(check = name, healthy, "Performed health check");
            self.metrics.record_health_check(name, healthy);

            tokio::select! {
                _ = tokio::time::sleep(self.periods.after(healthy)) => {}
                _ = shutdown.cancelled() => break,
            }
        }

        info!(check = name, "Health evaluator shutting down");
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

/// AND over every check's latest result
#[derive(Debug, Clone, Default)]
pub struct HealthAggregator {
    signals: Vec<HealthSignal>,
}

impl HealthAggregator {
    pub fn new(signals: Vec<HealthSignal>) -> Self {
        Self { signals }
    }

    pub fn signals(&self) -> &[HealthSignal] {
        &self.signals
    }

    pub fn is_healthy(&self) -> bool {
        let healthy = self.signals.iter().all(HealthSignal::is_healthy);
        debug!(healthy, "Overall health status");
        healthy
    }
}

#[cfg(test)]
#[path = "health_test.rs"]
mod tests;
