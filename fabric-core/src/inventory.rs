//! Inventory & Routing: parses the node inventory YAML (§6) and resolves
//! node ids/IPs to `NodeRoute`s. Head election: exactly one route *may*
//! be marked `head`; if none is, the first in sort order is head.

use std::collections::HashMap;

use fabric_model::NodeRoute;
use serde::{Deserialize, Serialize};

use crate::error::InventoryError;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RdmaConfig {
    #[serde(default)]
    pub required: bool,
    pub eth_if: Option<String>,
    pub ib_if: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_port")]
    pub default_port: u16,
}

fn default_agent_port() -> u16 {
    8711
}

/// Raw on-disk shape of the inventory YAML file (§6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InventoryFile {
    pub version: u32,
    #[serde(default)]
    pub rdma: RdmaConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    pub nodes: Vec<NodeRoute>,
}

/// Parsed, validated inventory: unique ids, unique `data_ip`s, at most one
/// `head`, with head election applied.
#[derive(Clone, Debug)]
pub struct Inventory {
    nodes: Vec<NodeRoute>,
    by_id: HashMap<String, usize>,
    by_data_ip: HashMap<String, usize>,
    head_index: usize,
    local_id: String,
    pub agent_default_port: u16,
    pub rdma: RdmaConfig,
}

impl Inventory {
    pub fn from_file(mut file: InventoryFile, local_id: &str) -> Result<Self, InventoryError> {
        file.nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let mut by_id = HashMap::new();
        let mut by_data_ip = HashMap::new();
        let mut head_candidates = Vec::new();
        for (idx, node) in file.nodes.iter().enumerate() {
            if by_id.insert(node.id.clone(), idx).is_some() {
                return Err(InventoryError::DuplicateId(node.id.clone()));
            }
            if by_data_ip.insert(node.data_ip.clone(), idx).is_some() {
                return Err(InventoryError::DuplicateDataIp(node.data_ip.clone()));
            }
            if node.head {
                head_candidates.push(idx);
            }
        }
        if head_candidates.len() > 1 {
            return Err(InventoryError::MultipleHeads);
        }
        let head_index = head_candidates.first().copied().unwrap_or(0);

        Ok(Self {
            nodes: file.nodes,
            by_id,
            by_data_ip,
            head_index,
            local_id: local_id.to_string(),
            agent_default_port: file.agent.default_port,
            rdma: file.rdma,
        })
    }

    pub fn nodes(&self) -> &[NodeRoute] {
        &self.nodes
    }

    pub fn head(&self) -> Option<&NodeRoute> {
        self.nodes.get(self.head_index)
    }

    pub fn by_id(&self, id: &str) -> Option<&NodeRoute> {
        self.by_id.get(id).and_then(|&i| self.nodes.get(i))
    }

    /// Resolves a host string to a route by id, `data_ip`, or `control_ip`.
    pub fn resolve(&self, host: &str) -> Option<&NodeRoute> {
        if let Some(n) = self.by_id(host) {
            return Some(n);
        }
        if let Some(&idx) = self.by_data_ip.get(host) {
            return self.nodes.get(idx);
        }
        self.nodes.iter().find(|n| n.control_ip == host)
    }

    pub fn local_node(&self) -> Option<&NodeRoute> {
        self.by_id(&self.local_id)
    }

    pub fn remote_nodes(&self) -> impl Iterator<Item = &NodeRoute> {
        let local_id = self.local_id.clone();
        self.nodes.iter().filter(move |n| n.id != local_id)
    }

    /// Node list sorted local-first then by IP (§4.7 probe ordering).
    pub fn sorted_for_probe(&self) -> Vec<&NodeRoute> {
        let mut out: Vec<&NodeRoute> = self.nodes.iter().collect();
        let local_id = self.local_id.clone();
        out.sort_by(|a, b| {
            let a_local = a.id == local_id;
            let b_local = b.id == local_id;
            b_local.cmp(&a_local).then_with(|| a.data_ip.cmp(&b.data_ip))
        });
        out
    }
}
