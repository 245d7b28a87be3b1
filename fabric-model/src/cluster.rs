//! Node inventory and cluster status snapshot types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A node in the inventory. Data, control, and proxy planes can be distinct
/// addresses. Exactly one route *may* be marked `head`; if none is, the
/// first in sort order is treated as head.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeRoute {
    pub id: String,
    #[serde(default)]
    pub head: bool,
    pub data_ip: String,
    pub control_ip: String,
    #[serde(default)]
    pub proxy_ip: Option<String>,
    #[serde(default)]
    pub ssh_user: Option<String>,
}

impl NodeRoute {
    /// Proxy address, defaulting to the control plane address when unset.
    pub fn proxy_address(&self) -> &str {
        self.proxy_ip.as_deref().unwrap_or(&self.control_ip)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterView {
    Full,
    Summary,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncludeFlag {
    Metrics,
    Storage,
    Dgx,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Overall {
    Error,
    Solo,
    Healthy,
    Degraded,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GpuDeviceMetric {
    pub index: u32,
    pub total_mib: u64,
    pub used_mib: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub cpu_percent: Option<f64>,
    pub disk_free_kb: Option<u64>,
    pub gpus: Vec<GpuDeviceMetric>,
}

/// Vendor-specific DGX update/reboot probe result (§4.7 stage 5). Own
/// sub-timeout; failures surface as `error`, never abort the rest of the
/// load pipeline.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DgxStatus {
    pub update_available: Option<bool>,
    pub reboot_required: Option<bool>,
    pub error: Option<String>,
}

/// Per-node probe result within a `ClusterStatus` snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeStatus {
    pub id: String,
    pub reachable: bool,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
    pub metrics: Option<NodeMetrics>,
    pub storage_present: Option<BTreeMap<String, bool>>,
    pub dgx: Option<DgxStatus>,
}

/// Full cluster snapshot, ephemeral and cached by `(view, includeMask)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub overall: Overall,
    pub nodes: Vec<NodeStatus>,
    pub generated_at_ms: i64,
}

impl ClusterStatus {
    /// Classification rule from §4.7: error if empty, solo if no remote
    /// nodes, healthy if all remote nodes reachable and no discovery
    /// errors, else degraded.
    pub fn classify(nodes: &[NodeStatus], local_id: &str, discovery_errored: bool) -> Overall {
        if nodes.is_empty() {
            return Overall::Error;
        }
        let remotes: Vec<&NodeStatus> = nodes.iter().filter(|n| n.id != local_id).collect();
        if remotes.is_empty() {
            return Overall::Solo;
        }
        if !discovery_errored && remotes.iter().all(|n| n.reachable) {
            Overall::Healthy
        } else {
            Overall::Degraded
        }
    }
}
