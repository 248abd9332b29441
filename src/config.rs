//! Command line and environment configuration
//!
//! Every flag can also be set through a `PODLOCK_*` environment variable.
//! Parsing only checks syntax; `validate()` enforces the cross-field rules
//! and must pass before anything is started.

use crate::endpoint::Endpoint;
use crate::health::Periods;
use crate::labels::{parse_label_pair, Labels};
use clap::{Args, Parser, Subcommand};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_GATE_PORT: u16 = 8888;
pub const DEFAULT_STATUS_PORT: u16 = 9999;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("parallel locks must be at least 1, got {0}")]
    InvalidParallelLocks(usize),

    #[error("CPU threshold must be between 0 and 100, got {0}")]
    InvalidThreshold(u8),

    #[error("include and exclude labels are mutually exclusive")]
    ConflictingLabelFilters,

    #[error("{0} must be greater than zero")]
    ZeroPeriod(&'static str),

    #[error("NODE_NAME is required when the {0} check is enabled")]
    MissingNodeName(&'static str),
}

#[derive(Debug, Parser)]
#[command(
    name = "podlock",
    about = "Bounded, health-aware admission gate for pod startup",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the lease gate
    Lock(LockArgs),

    /// Serve the aggregated health status
    Health(HealthArgs),

    /// Wait for a lease from a running gate, then exit
    Init(InitArgs),
}

#[derive(Debug, Clone, Args)]
pub struct LockArgs {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0", env = "PODLOCK_HOST")]
    pub host: String,

    /// Port to bind
    #[arg(long, default_value_t = DEFAULT_GATE_PORT, env = "PODLOCK_PORT")]
    pub port: u16,

    /// Number of leases that may be held at once
    #[arg(long, default_value_t = 1, env = "PODLOCK_PARALLEL_LOCKS")]
    pub parallel_locks: usize,

    /// Lease length when a request does not name one, in seconds
    #[arg(long, default_value_t = 10, env = "PODLOCK_LOCK_DURATION")]
    pub lock_duration: u64,

    #[command(flatten)]
    pub checks: ChecksArgs,
}

impl LockArgs {
    pub fn default_duration(&self) -> Duration {
        Duration::from_secs(self.lock_duration)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parallel_locks < 1 {
            return Err(ConfigError::InvalidParallelLocks(self.parallel_locks));
        }
        self.checks.validate()
    }
}

#[derive(Debug, Clone, Args)]
pub struct HealthArgs {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0", env = "PODLOCK_HOST")]
    pub host: String,

    /// Port to bind
    #[arg(long, default_value_t = DEFAULT_STATUS_PORT, env = "PODLOCK_PORT")]
    pub port: u16,

    #[command(flatten)]
    pub checks: ChecksArgs,
}

impl HealthArgs {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.checks.validate()
    }
}

/// Health checks shared by the gate and the status server
#[derive(Debug, Clone, Args)]
pub struct ChecksArgs {
    /// Endpoint that must be reachable, e.g. `tcp://db:5432` or `https://api/healthz`
    #[arg(
        long = "check",
        env = "PODLOCK_CHECKS",
        value_delimiter = ',',
        value_name = "ENDPOINT"
    )]
    pub endpoints: Vec<Endpoint>,

    /// Seconds between endpoint checks after a pass
    #[arg(long, default_value_t = 60, env = "PODLOCK_ENDPOINT_PASS_PERIOD")]
    pub endpoint_pass_period: u64,

    /// Seconds between endpoint checks after a failure
    #[arg(long, default_value_t = 10, env = "PODLOCK_ENDPOINT_FAIL_PERIOD")]
    pub endpoint_fail_period: u64,

    /// Timeout of a single endpoint probe, in seconds
    #[arg(long, default_value_t = 10, env = "PODLOCK_ENDPOINT_TIMEOUT")]
    pub endpoint_timeout: u64,

    /// Require DaemonSets scheduled on this node to be ready
    #[arg(long, env = "PODLOCK_DAEMONSET_CHECK")]
    pub daemonset_check: bool,

    /// Namespace to list DaemonSets in; all namespaces when empty
    #[arg(long, default_value = "", env = "PODLOCK_DAEMONSET_NAMESPACE")]
    pub daemonset_namespace: String,

    /// Only consider DaemonSets whose pods use the host network
    #[arg(long, env = "PODLOCK_DAEMONSET_HOST_NETWORK")]
    pub daemonset_host_network: bool,

    /// Only consider DaemonSets carrying all of these labels (`key:value`)
    #[arg(
        long = "daemonset-include",
        env = "PODLOCK_DAEMONSET_INCLUDE",
        value_delimiter = ',',
        value_parser = parse_label_pair
    )]
    pub daemonset_include: Vec<(String, String)>,

    /// Skip DaemonSets carrying any of these labels (`key:value`)
    #[arg(
        long = "daemonset-exclude",
        env = "PODLOCK_DAEMONSET_EXCLUDE",
        value_delimiter = ',',
        value_parser = parse_label_pair
    )]
    pub daemonset_exclude: Vec<(String, String)>,

    /// Seconds between DaemonSet checks after a pass
    #[arg(long, default_value_t = 60, env = "PODLOCK_DAEMONSET_PASS_PERIOD")]
    pub daemonset_pass_period: u64,

    /// Seconds between DaemonSet checks after a failure
    #[arg(long, default_value_t = 10, env = "PODLOCK_DAEMONSET_FAIL_PERIOD")]
    pub daemonset_fail_period: u64,

    /// Require node CPU usage to stay at or below the threshold
    #[arg(long, env = "PODLOCK_NODELOAD_CHECK")]
    pub nodeload_check: bool,

    /// CPU usage threshold, percent of node capacity
    #[arg(long, default_value_t = 80, env = "PODLOCK_NODELOAD_THRESHOLD")]
    pub nodeload_threshold: u8,

    /// Seconds between node load checks after a pass
    #[arg(long, default_value_t = 60, env = "PODLOCK_NODELOAD_PASS_PERIOD")]
    pub nodeload_pass_period: u64,

    /// Seconds between node load checks after a failure
    #[arg(long, default_value_t = 10, env = "PODLOCK_NODELOAD_FAIL_PERIOD")]
    pub nodeload_fail_period: u64,

    /// Name of the node this process runs on
    #[arg(long, env = "NODE_NAME")]
    pub node_name: Option<String>,
}

impl ChecksArgs {
    pub fn endpoint_check_enabled(&self) -> bool {
        !self.endpoints.is_empty()
    }

    pub fn cluster_checks_enabled(&self) -> bool {
        self.daemonset_check || self.nodeload_check
    }

    pub fn endpoint_periods(&self) -> Periods {
        periods(self.endpoint_pass_period, self.endpoint_fail_period)
    }

    pub fn endpoint_timeout(&self) -> Duration {
        Duration::from_secs(self.endpoint_timeout)
    }

    pub fn daemonset_periods(&self) -> Periods {
        periods(self.daemonset_pass_period, self.daemonset_fail_period)
    }

    pub fn nodeload_periods(&self) -> Periods {
        periods(self.nodeload_pass_period, self.nodeload_fail_period)
    }

    /// `None` means every namespace
    pub fn daemonset_namespace(&self) -> Option<String> {
        let namespace = self.daemonset_namespace.trim();
        (!namespace.is_empty()).then(|| namespace.to_string())
    }

    pub fn daemonset_include(&self) -> Labels {
        self.daemonset_include.iter().cloned().collect()
    }

    pub fn daemonset_exclude(&self) -> Labels {
        self.daemonset_exclude.iter().cloned().collect()
    }

    /// Node name, trimmed; `None` when unset or blank
    pub fn node_name(&self) -> Option<&str> {
        self.node_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("endpoint pass period", self.endpoint_pass_period),
            ("endpoint fail period", self.endpoint_fail_period),
            ("endpoint timeout", self.endpoint_timeout),
            ("DaemonSet pass period", self.daemonset_pass_period),
            ("DaemonSet fail period", self.daemonset_fail_period),
            ("node load pass period", self.nodeload_pass_period),
            ("node load fail period", self.nodeload_fail_period),
        ];
        if let Some((name, _)) = nonzero.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::ZeroPeriod(*name));
        }

        if self.nodeload_threshold > 100 {
            return Err(ConfigError::InvalidThreshold(self.nodeload_threshold));
        }

        if !self.daemonset_include.is_empty() && !self.daemonset_exclude.is_empty() {
            return Err(ConfigError::ConflictingLabelFilters);
        }

        if self.node_name().is_none() {
            if self.daemonset_check {
                return Err(ConfigError::MissingNodeName("DaemonSet"));
            }
            if self.nodeload_check {
                return Err(ConfigError::MissingNodeName("node load"));
            }
        }

        Ok(())
    }
}

fn periods(on_pass: u64, on_fail: u64) -> Periods {
    Periods::new(Duration::from_secs(on_pass), Duration::from_secs(on_fail))
}

#[derive(Debug, Clone, Args)]
pub struct InitArgs {
    /// Host of the lease gate
    #[arg(long, env = "PODLOCK_LOCK_HOST")]
    pub lock_host: String,

    /// Port of the lease gate
    #[arg(long, default_value_t = DEFAULT_GATE_PORT, env = "PODLOCK_LOCK_PORT")]
    pub lock_port: u16,

    /// Lease length to request, in seconds; the gate's default when unset
    #[arg(long, env = "PODLOCK_REQUEST_DURATION")]
    pub lock_duration: Option<u64>,

    /// Seconds between lease requests
    #[arg(long, default_value_t = 60, env = "PODLOCK_LOCK_CHECK_PERIOD")]
    pub period: u64,

    /// Timeout of a single lease request, in seconds
    #[arg(long, default_value_t = 1, env = "PODLOCK_LOCK_CHECK_TIMEOUT")]
    pub timeout: u64,
}

impl InitArgs {
    pub fn duration(&self) -> Option<Duration> {
        self.lock_duration.map(Duration::from_secs)
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.period == 0 {
            return Err(ConfigError::ZeroPeriod("lock check period"));
        }
        if self.timeout == 0 {
            return Err(ConfigError::ZeroPeriod("lock check timeout"));
        }
        Ok(())
    }
}

impl Command {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Command::Lock(args) => args.validate(),
            Command::Health(args) => args.validate(),
            Command::Init(args) => args.validate(),
        }
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
