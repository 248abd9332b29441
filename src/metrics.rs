//! Prometheus metrics for podlock
//!
//! - Lease request outcomes at the gate
//! - Health check results and current status per check

use prometheus::{self, Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Outcome of one request to the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseOutcome {
    Granted,
    Locked,
    Unhealthy,
}

impl LeaseOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseOutcome::Granted => "granted",
            LeaseOutcome::Locked => "locked",
            LeaseOutcome::Unhealthy => "unhealthy",
        }
    }
}

/// Metrics registry
///
/// Clone is cheap (the prometheus collectors are Arc internally).
#[derive(Clone)]
pub struct PodlockMetrics {
    registry: Registry,
    /// Gate requests by outcome
    pub lease_requests_total: IntCounterVec,
    /// Health check runs by check and result (pass, fail)
    pub health_checks_total: IntCounterVec,
    /// Latest result per check, 1 healthy / 0 unhealthy
    pub health_status: IntGaugeVec,
}

impl PodlockMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let lease_requests_total = IntCounterVec::new(
            Opts::new(
                "podlock_lease_requests_total",
                "Total number of lease requests handled by the gate",
            ),
            &["result"],
        )?;
        registry.register(Box::new(lease_requests_total.clone()))?;

        let health_checks_total = IntCounterVec::new(
            Opts::new(
                "podlock_health_checks_total",
                "Total number of health check runs",
            ),
            &["check", "result"],
        )?;
        registry.register(Box::new(health_checks_total.clone()))?;

        let health_status = IntGaugeVec::new(
            Opts::new(
                "podlock_health_status",
                "Latest health check result (1 healthy, 0 unhealthy)",
            ),
            &["check"],
        )?;
        registry.register(Box::new(health_status.clone()))?;

        Ok(Self {
            registry,
            lease_requests_total,
            health_checks_total,
            health_status,
        })
    }

    pub fn record_lease_request(&self, outcome: LeaseOutcome) {
        self.lease_requests_total
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    pub fn record_health_check(&self, check: &str, healthy: bool) {
        let result = if healthy { "pass" } else { "fail" };
        self.health_checks_total
            .with_label_values(&[check, result])
            .inc();
        self.health_status
            .with_label_values(&[check])
            .set(i64::from(healthy));
    }

    /// Encode all metrics to Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| {
            prometheus::Error::Msg(format!("Failed to encode metrics as UTF-8: {}", e))
        })
    }
}

pub type SharedMetrics = Arc<PodlockMetrics>;

pub fn create_metrics() -> Result<SharedMetrics, prometheus::Error> {
    Ok(Arc::new(PodlockMetrics::new()?))
}

#[cfg(test)]
#[path = "metrics_test.rs"]
mod tests;
