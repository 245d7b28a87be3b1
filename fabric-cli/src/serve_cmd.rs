//! Builds `AppState` and runs the control-plane server: the `serve`
//! subcommand's whole job is assembling the richer state this control
//! plane needs before it can listen.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fabric_core::inventory::{AgentConfig, RdmaConfig};
use fabric_core::{InventoryFile, ProxyManager};
use fabric_model::NodeRoute;
use fabric_server::app::{load_inventory, AppState};
use fabric_store::{GroupPolicyStore, ManagedModelStore, OverrideStore};
use tracing::info;

use crate::paths;

pub struct ServeOptions {
    pub addr: Option<String>,
    pub inventory_path: Option<PathBuf>,
    pub models_path: Option<PathBuf>,
    pub overrides_path: Option<PathBuf>,
    pub group_policy_path: Option<PathBuf>,
    pub recipes_dir: Option<PathBuf>,
    pub local_node_id: Option<String>,
    pub agent_bearer_token: Option<String>,
    pub status_ttl_secs: u64,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            addr: None,
            inventory_path: None,
            models_path: None,
            overrides_path: None,
            group_policy_path: None,
            recipes_dir: None,
            local_node_id: None,
            agent_bearer_token: None,
            status_ttl_secs: 10,
        }
    }
}

/// A single-node inventory with no peers, written out the first time a
/// server starts with no inventory file on disk — a cluster of one is
/// the default shape until an operator runs `fabric settings wizard`.
fn solo_inventory(local_node_id: &str) -> InventoryFile {
    InventoryFile {
        version: 1,
        rdma: RdmaConfig::default(),
        agent: AgentConfig::default(),
        nodes: vec![NodeRoute {
            id: local_node_id.to_string(),
            head: true,
            data_ip: "127.0.0.1".to_string(),
            control_ip: "127.0.0.1".to_string(),
            proxy_ip: None,
            ssh_user: None,
        }],
    }
}

fn local_node_id(explicit: Option<&str>) -> String {
    explicit.map(str::to_string).unwrap_or_else(|| {
        hostname_fallback().unwrap_or_else(|| "local".to_string())
    })
}

fn hostname_fallback() -> Option<String> {
    std::env::var("HOSTNAME").ok().filter(|s| !s.is_empty())
}

/// Assembles the `AppState` this server runs against, writing a fresh
/// single-node inventory to disk the first time there isn't one — the
/// same "first run has no inventory yet" path `/api/cluster/settings/wizard`
/// exists for, just with a trivial default instead of an operator-filled one.
pub async fn build_app_state(opts: &ServeOptions) -> Result<Arc<AppState>, Box<dyn std::error::Error + Send + Sync>> {
    let local_node_id = local_node_id(opts.local_node_id.as_deref());

    let models_path = opts.models_path.clone().unwrap_or_else(paths::default_models_path);
    let overrides_path = opts.overrides_path.clone().unwrap_or_else(paths::default_overrides_path);
    let group_policy_path = opts.group_policy_path.clone().unwrap_or_else(paths::default_group_policy_path);
    let recipes_dir = opts.recipes_dir.clone().unwrap_or_else(paths::default_recipes_dir);
    std::fs::create_dir_all(&recipes_dir)?;

    let override_store = Arc::new(OverrideStore::new(overrides_path));
    let persisted = override_store.load()?;
    let exec_mode = persisted.exec_mode;

    let inventory_path = persisted
        .inventory_file
        .clone()
        .map(PathBuf::from)
        .or_else(|| opts.inventory_path.clone())
        .unwrap_or_else(paths::default_inventory_path);

    if !inventory_path.exists() {
        if let Some(parent) = inventory_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = solo_inventory(&local_node_id);
        std::fs::write(&inventory_path, serde_yaml::to_string(&file)?)?;
        info!(path = %inventory_path.display(), "wrote default single-node inventory");
    }

    let status_ttl = Duration::from_secs(opts.status_ttl_secs);
    let inventory = load_inventory(&inventory_path, &local_node_id)?;
    let runtime = AppState::build_runtime(&local_node_id, inventory, exec_mode, opts.agent_bearer_token.clone(), status_ttl);

    let proxy_http = reqwest::Client::builder().build()?;
    let health = Arc::new(fabric_server::health_check::HttpHealthCheck::new(proxy_http.clone()));
    let catalog = Arc::new(fabric_core::FlatFileRecipeCatalog::load(&recipes_dir)?);

    let state = Arc::new(AppState {
        manager: Arc::new(ProxyManager::new()),
        health,
        model_store: Arc::new(ManagedModelStore::new(models_path)),
        override_store,
        group_policy_store: Arc::new(GroupPolicyStore::new(group_policy_path)),
        catalog,
        proxy_http,
        local_node_id,
        agent_bearer_token: opts.agent_bearer_token.clone(),
        status_ttl,
        default_inventory_path: inventory_path,
        runtime: tokio::sync::RwLock::new(runtime),
    });

    Ok(state)
}

pub async fn run(opts: ServeOptions) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let state = build_app_state(&opts).await?;
    fabric_server::run_serve(opts.addr.as_deref(), state).await
}
