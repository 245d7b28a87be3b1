//! `AutoExec`: picks `LocalExec` when the target host is this node,
//! `AgentExec` (via `fabric-core::agent_rpc::AgentClient`) otherwise,
//! mirroring `ExecMode::Auto`.

use std::sync::Arc;

use async_trait::async_trait;

use super::local::LocalExec;
use super::{Exec, ExecContext, ExecOutput, ExecRequest};
use crate::agent_rpc::AgentClient;
use crate::error::ExecError;
use crate::inventory::Inventory;

pub struct AutoExec {
    local: LocalExec,
    agent: AgentClient,
    inventory: Arc<Inventory>,
    local_host_aliases: Vec<String>,
}

impl AutoExec {
    pub fn new(agent: AgentClient, inventory: Arc<Inventory>, local_host_aliases: Vec<String>) -> Self {
        Self { local: LocalExec::new(), agent, inventory, local_host_aliases }
    }

    fn is_local_host(&self, host: &str) -> bool {
        host == "local"
            || host == "localhost"
            || host == "127.0.0.1"
            || self.local_host_aliases.iter().any(|h| h == host)
            || self.inventory.local_node().is_some_and(|n| n.id == host || n.data_ip == host)
    }
}

#[async_trait]
impl Exec for AutoExec {
    async fn run(&self, ctx: &ExecContext, req: ExecRequest) -> Result<ExecOutput, ExecError> {
        if req.is_local || self.is_local_host(&req.host) {
            return self.local.run(ctx, req).await;
        }
        let route = self
            .inventory
            .resolve(&req.host)
            .ok_or_else(|| ExecError::UnknownHost(req.host.clone()))?;
        self.agent.run(ctx, route, &req.script).await
    }
}
