//! Node CPU load check

use super::HealthCheck;
use crate::cluster::{node_cpu_capacity, ClusterError, ClusterReader};
use crate::quantity::usage_percent;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use std::sync::Arc;
use tracing::{debug, error, info};

/// True if `used` of `capacity` milli-CPU, as a rounded percentage, does not
/// exceed `threshold`
pub fn within_threshold(used_millis: u64, capacity_millis: u64, threshold: u8) -> bool {
    usage_percent(used_millis, capacity_millis) <= u64::from(threshold)
}

/// Healthy while node CPU utilisation stays at or below the threshold
pub struct NodeLoadCheck {
    reader: Arc<dyn ClusterReader>,
    node_name: String,
    cpu_capacity_millis: u64,
    threshold: u8,
}

impl NodeLoadCheck {
    /// Capacity is read once from `node`; a node without CPU capacity is an error
    pub fn new(
        reader: Arc<dyn ClusterReader>,
        node_name: String,
        node: &Node,
        threshold: u8,
    ) -> Result<Self, ClusterError> {
        let cpu_capacity_millis = node_cpu_capacity(node)?;
        info!(
            node = %node_name,
            cpu_capacity_millis,
            threshold,
            "Configured node load check"
        );
        Ok(Self {
            reader,
            node_name,
            cpu_capacity_millis,
            threshold,
        })
    }
}

#[async_trait]
impl HealthCheck for NodeLoadCheck {
    fn name(&self) -> &'static str {
        "nodeload"
    }

    async fn check(&self) -> bool {
        let usage = match self.reader.get_node_usage(&self.node_name).await {
            Ok(usage) => usage,
            Err(e) => {
                error!(error = %e, node = %self.node_name, "Failed to read node metrics");
                return false;
            }
        };

        let load = usage_percent(usage.cpu_millis, self.cpu_capacity_millis);
        debug!(cpu_millis = usage.cpu_millis, load, "Node CPU usage");

        if !within_threshold(usage.cpu_millis, self.cpu_capacity_millis, self.threshold) {
            info!(load, threshold = self.threshold, "Node overloaded");
            return false;
        }
        true
    }
}
