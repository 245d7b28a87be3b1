//! Builds the `Exec` implementation the rest of the server dispatches
//! through, selected by the persisted `ExecModeOverride` (§6 settings).
//! `Auto` delegates to `fabric_core::exec::AutoExec`; `Local` and `Agent`
//! force one side of that same local/remote split, mirroring its own
//! `is_local_host` dispatch rather than inventing a new one.

use std::sync::Arc;

use async_trait::async_trait;
use fabric_core::error::ExecError;
use fabric_core::exec::{AutoExec, ExecContext, ExecOutput, ExecRequest, LocalExec};
use fabric_core::{AgentClient, Exec, Inventory};
use fabric_store::ExecModeOverride;

/// Forces every request through the node-agent RPC, even for the local
/// node, resolving `host` against `inventory` exactly as `AutoExec` does
/// for its remote branch.
struct ForcedAgentExec {
    agent: AgentClient,
    inventory: Arc<Inventory>,
}

#[async_trait]
impl Exec for ForcedAgentExec {
    async fn run(&self, ctx: &ExecContext, req: ExecRequest) -> Result<ExecOutput, ExecError> {
        let route = self.inventory.resolve(&req.host).ok_or_else(|| ExecError::UnknownHost(req.host.clone()))?;
        self.agent.run(ctx, route, &req.script).await
    }
}

pub fn build_exec(
    mode: ExecModeOverride,
    inventory: Arc<Inventory>,
    agent_bearer_token: Option<String>,
    local_host_aliases: Vec<String>,
) -> Arc<dyn Exec> {
    match mode {
        ExecModeOverride::Local => Arc::new(LocalExec::new()),
        ExecModeOverride::Agent => {
            Arc::new(ForcedAgentExec { agent: AgentClient::new(agent_bearer_token), inventory })
        }
        ExecModeOverride::Auto => {
            Arc::new(AutoExec::new(AgentClient::new(agent_bearer_token), inventory, local_host_aliases))
        }
    }
}
