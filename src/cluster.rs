//! Read-only access to the cluster API
//!
//! Health checks only see the `ClusterReader` trait; the kube-backed
//! implementation runs every request through the retry policy and stops
//! retrying once shutdown is signalled.

use crate::quantity::{cpu_millis, QuantityError};
use crate::retry::{RetryError, RetryPolicy};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{Api, ListParams};
use kube::core::DynamicObject;
use kube::discovery::ApiResource;
use kube::Client;
use serde::Deserialize;
use std::future::Future;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] RetryError<kube::Error>),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error(transparent)]
    Quantity(#[from] QuantityError),

    #[error("Failed to decode node metrics: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Node {0} reports zero CPU capacity")]
    ZeroCapacity(String),
}

/// Point-in-time resource usage of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeUsage {
    pub cpu_millis: u64,
}

/// Cluster reads needed by the health checks
#[async_trait]
pub trait ClusterReader: Send + Sync {
    /// Fetch a node by name
    async fn get_node(&self, name: &str) -> Result<Node, ClusterError>;

    /// Fetch current usage of a node from the metrics API
    async fn get_node_usage(&self, name: &str) -> Result<NodeUsage, ClusterError>;

    /// List DaemonSets in `namespace`, or in every namespace when `None`
    async fn list_daemon_sets(&self, namespace: Option<&str>)
        -> Result<Vec<DaemonSet>, ClusterError>;

    /// List pods scheduled on a node, across all namespaces
    async fn list_node_pods(&self, node_name: &str) -> Result<Vec<Pod>, ClusterError>;
}

/// CPU capacity of a node in milli-CPU
pub fn node_cpu_capacity(node: &Node) -> Result<u64, ClusterError> {
    let name = node.metadata.name.clone().unwrap_or_default();
    let quantity = node
        .status
        .as_ref()
        .and_then(|s| s.capacity.as_ref())
        .and_then(|c| c.get("cpu"))
        .ok_or_else(|| ClusterError::MissingField("status.capacity.cpu".to_string()))?;

    match cpu_millis(quantity)? {
        0 => Err(ClusterError::ZeroCapacity(name)),
        millis => Ok(millis),
    }
}

fn node_metrics_resource() -> ApiResource {
    ApiResource {
        group: "metrics.k8s.io".to_string(),
        version: "v1beta1".to_string(),
        api_version: "metrics.k8s.io/v1beta1".to_string(),
        kind: "NodeMetrics".to_string(),
        plural: "nodes".to_string(),
    }
}

/// The parts of a `metrics.k8s.io` NodeMetrics object we read
#[derive(Debug, Deserialize)]
struct NodeMetricsData {
    usage: ResourceUsage,
}

#[derive(Debug, Deserialize)]
struct ResourceUsage {
    cpu: Quantity,
}

/// Extract `usage.cpu` from a NodeMetrics object
pub fn node_usage_from_metrics(metrics: &DynamicObject) -> Result<NodeUsage, ClusterError> {
    let data: NodeMetricsData = serde_json::from_value(metrics.data.clone())?;
    Ok(NodeUsage {
        cpu_millis: cpu_millis(&data.usage.cpu)?,
    })
}

/// `ClusterReader` backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeClusterReader {
    client: Client,
    retry: RetryPolicy,
    shutdown: CancellationToken,
}

impl KubeClusterReader {
    pub fn new(client: Client, retry: RetryPolicy, shutdown: CancellationToken) -> Self {
        Self {
            client,
            retry,
            shutdown,
        }
    }

    async fn read<T, F, Fut>(&self, op: F) -> Result<T, ClusterError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, kube::Error>>,
    {
        Ok(self.retry.run(&self.shutdown, op).await?)
    }
}

#[async_trait]
impl ClusterReader for KubeClusterReader {
    async fn get_node(&self, name: &str) -> Result<Node, ClusterError> {
        let api: Api<Node> = Api::all(self.client.clone());
        debug!(node = %name, "Fetching node");
        self.read(|| api.get(name)).await
    }

    async fn get_node_usage(&self, name: &str) -> Result<NodeUsage, ClusterError> {
        let resource = node_metrics_resource();
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &resource);
        debug!(node = %name, "Fetching node metrics");
        let metrics = self.read(|| api.get(name)).await?;
        node_usage_from_metrics(&metrics)
    }

    async fn list_daemon_sets(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<DaemonSet>, ClusterError> {
        let api: Api<DaemonSet> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let params = ListParams::default();
        let list = self.read(|| api.list(&params)).await?;
        debug!(namespace = ?namespace, count = list.items.len(), "Listed DaemonSets");
        Ok(list.items)
    }

    async fn list_node_pods(&self, node_name: &str) -> Result<Vec<Pod>, ClusterError> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let params = ListParams::default().fields(&format!("spec.nodeName={}", node_name));
        let list = self.read(|| api.list(&params)).await?;
        debug!(node = %node_name, count = list.items.len(), "Listed node pods");
        Ok(list.items)
    }
}
