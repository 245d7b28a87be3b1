//! Axum app: shared state, router construction, and the `run_serve` /
//! `run_serve_on_listener` public entry points (state struct + router
//! function; the listener-taking variant is used directly by tests).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use fabric_core::cluster_status::ClusterStatusAggregator;
use fabric_core::process::HealthCheck;
use fabric_core::{Exec, Inventory, ProxyManager};
use fabric_model::RecipeCatalog;
use fabric_store::{GroupPolicyStore, ManagedModelStore, OverrideStore, RuntimeOverride};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::info;

use crate::exec_mode::build_exec;
use crate::health_check::HttpHealthCheck;
use crate::routes;

const DEFAULT_ADDR: &str = "127.0.0.1:8500";
/// Cache TTL for `/api/cluster/status` when the caller doesn't force a refresh.
const DEFAULT_STATUS_TTL: Duration = Duration::from_secs(10);
/// Bound on how long admission waits for a newly started runtime to pass
/// its first health check (§4.3 start contract).
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(120);

/// The parts of server state that change together when `/api/cluster/settings`
/// applies a new exec-mode or inventory override — rebuilt wholesale rather
/// than mutated field-by-field, mirroring `ProxyManager`'s own
/// swap-under-a-short-lock reload pattern.
pub struct Runtime {
    pub inventory: Arc<Inventory>,
    pub exec: Arc<dyn Exec>,
    pub status: ClusterStatusAggregator,
    pub exec_mode: fabric_store::ExecModeOverride,
}

pub struct AppState {
    pub manager: Arc<ProxyManager>,
    pub health: Arc<dyn HealthCheck>,
    pub model_store: Arc<ManagedModelStore>,
    pub override_store: Arc<OverrideStore>,
    pub group_policy_store: Arc<GroupPolicyStore>,
    pub catalog: Arc<dyn RecipeCatalog>,
    pub proxy_http: reqwest::Client,
    pub local_node_id: String,
    pub agent_bearer_token: Option<String>,
    pub status_ttl: Duration,
    pub default_inventory_path: PathBuf,
    pub runtime: RwLock<Runtime>,
}

impl AppState {
    /// Builds a fresh `Runtime` from an `Inventory` + exec-mode override,
    /// re-deriving the `Exec` dispatcher and a new `ClusterStatusAggregator`
    /// bound to it (the aggregator has no way to swap its own `Inventory`
    /// after construction, so settings changes rebuild the whole handle).
    pub fn build_runtime(
        local_node_id: &str,
        inventory: Inventory,
        exec_mode: fabric_store::ExecModeOverride,
        agent_bearer_token: Option<String>,
        status_ttl: Duration,
    ) -> Runtime {
        let inventory = Arc::new(inventory);
        let exec = build_exec(exec_mode, Arc::clone(&inventory), agent_bearer_token, vec![local_node_id.to_string()]);
        let status = ClusterStatusAggregator::new(Arc::clone(&exec), Arc::clone(&inventory), status_ttl);
        Runtime { inventory, exec, status, exec_mode }
    }

    pub async fn inventory(&self) -> Arc<Inventory> {
        Arc::clone(&self.runtime.read().await.inventory)
    }

    pub async fn exec(&self) -> Arc<dyn Exec> {
        Arc::clone(&self.runtime.read().await.exec)
    }

    pub async fn status_aggregator(&self) -> ClusterStatusAggregator {
        self.runtime.read().await.status.clone()
    }

    /// Applies a persisted `RuntimeOverride`, rebuilding `Runtime` and
    /// saving the override to disk. `inventory_path` is re-read from the
    /// override (or the default) so a settings PUT can repoint the server
    /// at a different inventory file without a restart.
    pub async fn apply_override(&self, overrides: RuntimeOverride) -> Result<(), crate::error::AppError> {
        let inventory_path = overrides
            .inventory_file
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.default_inventory_path.clone());
        let inventory = load_inventory(&inventory_path, &self.local_node_id)?;

        let new_runtime = Self::build_runtime(
            &self.local_node_id,
            inventory,
            overrides.exec_mode,
            self.agent_bearer_token.clone(),
            self.status_ttl,
        );
        *self.runtime.write().await = new_runtime;
        self.override_store.save(&overrides)?;
        Ok(())
    }
}

/// Reads and parses an inventory YAML file from disk.
pub fn load_inventory(path: &PathBuf, local_node_id: &str) -> Result<Inventory, crate::error::AppError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        crate::error::AppError::Api(fabric_core::ApiError {
            kind: fabric_core::error::ErrorKind::Config,
            message: format!("reading inventory {}: {e}", path.display()),
            trace_id: None,
        })
    })?;
    let file: fabric_core::InventoryFile = serde_yaml::from_str(&content).map_err(|e| {
        crate::error::AppError::Api(fabric_core::ApiError {
            kind: fabric_core::error::ErrorKind::Config,
            message: format!("parsing inventory {}: {e}", path.display()),
            trace_id: None,
        })
    })?;
    Inventory::from_file(file, local_node_id)
        .map_err(|e| crate::error::AppError::Api(e.into()))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(routes::healthz::healthz))
        .route("/api/models/", get(routes::models::list))
        .route("/api/models/unload", post(routes::models::unload_all))
        .route("/api/models/unload/:id", post(routes::models::unload_one))
        .route("/api/cluster/status", get(routes::cluster::status))
        .route("/api/cluster/stop", post(routes::cluster::stop))
        .route(
            "/api/cluster/settings",
            get(routes::cluster::get_settings).put(routes::cluster::put_settings),
        )
        .route("/api/cluster/settings/wizard", post(routes::cluster::settings_wizard))
        .route("/api/recipes/state", get(routes::recipes::state))
        .route("/api/recipes/models", post(routes::recipes::upsert_model))
        .route("/api/recipes/models/:id", axum::routing::delete(routes::recipes::delete_model))
        .route("/api/recipes/backend/action", post(routes::recipes::backend_action))
        .route("/*path", axum::routing::any(routes::proxy::proxy))
        .with_state(state)
}

/// Runs the control-plane HTTP server on an existing listener. Used by
/// integration tests (bind to `127.0.0.1:0`, pass the listener in).
pub async fn run_serve_on_listener(
    listener: TcpListener,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = listener.local_addr()?;
    info!("fabric control plane listening on http://{}", addr);
    let app = router(state);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Runs the control-plane HTTP server. Listens on `addr` (default
/// `127.0.0.1:8500`).
pub async fn run_serve(
    addr: Option<&str>,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = addr.unwrap_or(DEFAULT_ADDR);
    let listener = TcpListener::bind(addr).await?;
    run_serve_on_listener(listener, state).await
}
