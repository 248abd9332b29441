//! DaemonSet rollout check
//!
//! A node is ready for workloads once every DaemonSet that should run on it
//! is either fully rolled out cluster-wide or has a ready pod on this node.

use super::HealthCheck;
use crate::cluster::ClusterReader;
use crate::labels::{map_contains_all, map_contains_any, node_selector_matches, Labels};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::Pod;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Why a DaemonSet does not count towards this node's health
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ExcludeLabels,
    IncludeLabels,
    NotHostNetwork,
    NodeSelector,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkipReason::ExcludeLabels => "matches exclude labels",
            SkipReason::IncludeLabels => "does not match include labels",
            SkipReason::NotHostNetwork => "not on host network",
            SkipReason::NodeSelector => "not eligible for scheduling on node",
        })
    }
}

/// Which DaemonSets this node depends on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DaemonSetFilter {
    pub include: Labels,
    pub exclude: Labels,
    pub host_network_only: bool,
}

impl DaemonSetFilter {
    /// `Ok` if `ds` must be healthy for a node labelled `node_labels`
    pub fn applies(&self, ds: &DaemonSet, node_labels: &Labels) -> Result<(), SkipReason> {
        let empty = Labels::new();
        let labels = ds.metadata.labels.as_ref().unwrap_or(&empty);
        let pod_spec = ds.spec.as_ref().and_then(|s| s.template.spec.as_ref());

        if !self.exclude.is_empty() && map_contains_any(labels, &self.exclude) {
            return Err(SkipReason::ExcludeLabels);
        }
        if !self.include.is_empty() && !map_contains_all(labels, &self.include) {
            return Err(SkipReason::IncludeLabels);
        }
        if self.host_network_only && !pod_spec.and_then(|s| s.host_network).unwrap_or(false) {
            return Err(SkipReason::NotHostNetwork);
        }
        let selector = pod_spec
            .and_then(|s| s.node_selector.as_ref())
            .unwrap_or(&empty);
        if !node_selector_matches(node_labels, selector) {
            return Err(SkipReason::NodeSelector);
        }
        Ok(())
    }
}

fn qualified_name(ds: &DaemonSet) -> String {
    format!(
        "{}/{}",
        ds.metadata.namespace.as_deref().unwrap_or_default(),
        ds.metadata.name.as_deref().unwrap_or_default()
    )
}

/// Every desired pod is ready
pub fn is_rolled_out(ds: &DaemonSet) -> bool {
    let (desired, ready) = ds
        .status
        .as_ref()
        .map(|s| (s.desired_number_scheduled, s.number_ready))
        .unwrap_or((0, 0));
    if desired != ready {
        info!(
            daemon_set = %qualified_name(ds),
            desired,
            ready,
            "DaemonSet is not ready"
        );
        return false;
    }
    true
}

fn is_owned_by(pod: &Pod, ds: &DaemonSet) -> bool {
    let Some(uid) = ds.metadata.uid.as_deref() else {
        return false;
    };
    pod.metadata
        .owner_references
        .iter()
        .flatten()
        .any(|owner| owner.uid == uid)
}

/// Pod is `Running` with condition `Ready=True`
pub fn is_pod_ready(pod: &Pod) -> bool {
    let Some(status) = pod.status.as_ref() else {
        return false;
    };
    if status.phase.as_deref() != Some("Running") {
        debug!(pod = ?pod.metadata.name, phase = ?status.phase, "Pod is not running");
        return false;
    }
    status
        .conditions
        .iter()
        .flatten()
        .any(|c| c.type_ == "Ready" && c.status == "True")
}

/// `ds` has a ready pod among `pods`
pub fn has_ready_pod(ds: &DaemonSet, pods: &[Pod]) -> bool {
    match pods.iter().find(|pod| is_owned_by(pod, ds)) {
        None => {
            info!(daemon_set = %qualified_name(ds), "No DaemonSet pod found on node");
            false
        }
        Some(pod) if !is_pod_ready(pod) => {
            info!(
                daemon_set = %qualified_name(ds),
                pod = ?pod.metadata.name,
                "DaemonSet pod is not ready"
            );
            false
        }
        Some(_) => true,
    }
}

/// Healthy when every applicable DaemonSet is available to this node
pub struct DaemonSetCheck {
    reader: Arc<dyn ClusterReader>,
    filter: DaemonSetFilter,
    namespace: Option<String>,
    node_name: String,
    node_labels: Labels,
}

impl DaemonSetCheck {
    pub fn new(
        reader: Arc<dyn ClusterReader>,
        filter: DaemonSetFilter,
        namespace: Option<String>,
        node_name: String,
        node_labels: Labels,
    ) -> Self {
        info!(
            node = %node_name,
            namespace = ?namespace,
            host_network_only = filter.host_network_only,
            include = ?filter.include,
            exclude = ?filter.exclude,
            "Configured DaemonSet check"
        );
        Self {
            reader,
            filter,
            namespace,
            node_name,
            node_labels,
        }
    }

    fn required<'a>(&self, daemon_sets: &'a [DaemonSet]) -> Vec<&'a DaemonSet> {
        daemon_sets
            .iter()
            .filter(|ds| match self.filter.applies(ds, &self.node_labels) {
                Ok(()) => true,
                Err(reason) => {
                    debug!(daemon_set = %qualified_name(ds), %reason, "Skipping DaemonSet");
                    false
                }
            })
            .collect()
    }
}

#[async_trait]
impl HealthCheck for DaemonSetCheck {
    fn name(&self) -> &'static str {
        "daemonsets"
    }

    async fn check(&self) -> bool {
        let daemon_sets = match self.reader.list_daemon_sets(self.namespace.as_deref()).await {
            Ok(daemon_sets) => daemon_sets,
            Err(e) => {
                error!(error = %e, "Failed to list DaemonSets");
                return false;
            }
        };

        let pending: Vec<&DaemonSet> = self
            .required(&daemon_sets)
            .into_iter()
            .filter(|ds| !is_rolled_out(ds))
            .collect();
        if pending.is_empty() {
            debug!("All required DaemonSets are ready");
            return true;
        }

        let pods = match self.reader.list_node_pods(&self.node_name).await {
            Ok(pods) => pods,
            Err(e) => {
                error!(error = %e, node = %self.node_name, "Failed to list node pods");
                return false;
            }
        };
        pending.iter().all(|ds| has_ready_pod(ds, &pods))
    }
}

#[cfg(test)]
#[path = "daemonset_test.rs"]
mod tests;
