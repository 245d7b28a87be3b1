//! `/api/cluster/*` (§6): cluster status aggregation and the exec-mode /
//! inventory settings sidecar, including the first-run wizard.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::IntoResponse;
use axum::Json;
use fabric_core::cluster_status::CacheState;
use fabric_core::inventory::{AgentConfig, InventoryFile, RdmaConfig};
use fabric_model::{ClusterView, IncludeFlag, NodeRoute};
use fabric_store::{ExecModeOverride, RuntimeOverride};
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::error::AppError;
use crate::routes::models::release_one;

fn parse_view(raw: Option<&String>) -> ClusterView {
    match raw.map(String::as_str) {
        Some("summary") => ClusterView::Summary,
        _ => ClusterView::Full,
    }
}

fn parse_include(raw: Option<&String>) -> Vec<IncludeFlag> {
    let Some(raw) = raw else { return Vec::new() };
    raw.split(',')
        .filter_map(|flag| match flag.trim() {
            "metrics" => Some(IncludeFlag::Metrics),
            "storage" => Some(IncludeFlag::Storage),
            "dgx" => Some(IncludeFlag::Dgx),
            _ => None,
        })
        .collect()
}

fn truthy(raw: Option<&String>) -> bool {
    matches!(raw.map(String::as_str), Some("1") | Some("true") | Some("yes"))
}

/// `GET /api/cluster/status` (§4.7, §6): cache state and per-stage timings
/// surface as response headers so an operator can tell a fresh read from a
/// stale-while-revalidate one without parsing the body.
pub async fn status(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, AppError> {
    let view = parse_view(params.get("view"));
    let include = parse_include(params.get("include"));
    let force_refresh = truthy(params.get("force"));
    let allow_stale = truthy(params.get("allowStale"));

    let aggregator = state.status_aggregator().await;
    let response = aggregator.get(view, &include, force_refresh, allow_stale).await?;

    let mut headers = HeaderMap::new();
    let cache_state = match response.cache_state {
        CacheState::Fresh => "fresh",
        CacheState::Stale => "stale",
        CacheState::Miss => "miss",
    };
    headers.insert("x-cluster-cache-state", HeaderValue::from_static(cache_state));
    headers.insert(
        "x-cluster-cache-age-ms",
        HeaderValue::from_str(&response.cache_age_ms.to_string()).unwrap_or(HeaderValue::from_static("0")),
    );
    let server_timing = response
        .stage_timings_ms
        .iter()
        .map(|(stage, ms)| format!("{stage};dur={ms}"))
        .collect::<Vec<_>>()
        .join(", ");
    if let Ok(value) = HeaderValue::from_str(&server_timing) {
        headers.insert("server-timing", value);
    }

    Ok((headers, Json(response.status)))
}

/// `POST /api/cluster/stop` (§6): unloads every managed model. A cluster
/// has no separate "shutdown the daemon" action — stopping every model is
/// the whole of what this control plane owns.
pub async fn stop(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, AppError> {
    let models = state.model_store.list().await?;
    for model in &models {
        release_one(&state, model).await?;
    }
    Ok(Json(serde_json::json!({ "stopped": models.len() })))
}

#[derive(Serialize)]
pub struct SettingsView {
    #[serde(rename = "execMode")]
    exec_mode: ExecModeOverride,
    #[serde(rename = "inventoryFile")]
    inventory_file: Option<String>,
    #[serde(rename = "inventoryExists")]
    inventory_exists: bool,
}

async fn settings_view(state: &AppState) -> Result<SettingsView, AppError> {
    let overrides = state.override_store.load()?;
    let inventory_path =
        overrides.inventory_file.clone().map(PathBuf::from).unwrap_or_else(|| state.default_inventory_path.clone());
    Ok(SettingsView {
        exec_mode: overrides.exec_mode,
        inventory_file: overrides.inventory_file,
        inventory_exists: inventory_path.exists(),
    })
}

/// `GET /api/cluster/settings` (§6).
pub async fn get_settings(State(state): State<Arc<AppState>>) -> Result<Json<SettingsView>, AppError> {
    Ok(Json(settings_view(&state).await?))
}

/// `PUT /api/cluster/settings` (§6): applies a new exec-mode / inventory
/// override, rebuilding `Runtime` (`AppState::apply_override`) before
/// reporting the settings back.
pub async fn put_settings(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RuntimeOverride>,
) -> Result<Json<SettingsView>, AppError> {
    state.apply_override(body).await?;
    Ok(Json(settings_view(&state).await?))
}

#[derive(Deserialize)]
pub struct WizardNode {
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

#[derive(Deserialize)]
pub struct WizardRequest {
    pub nodes: Vec<WizardNode>,
    #[serde(default)]
    pub rdma: RdmaConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

/// `POST /api/cluster/settings/wizard` (§6): writes a fresh inventory file
/// from operator-supplied node rows and points settings at it in one step,
/// the first-run path for a cluster that has never had an inventory.
///
/// Written with a plain `fs::write` rather than the atomic write helper in
/// `fabric-store`: unlike the model/override stores this file is touched
/// only by an operator running the wizard, never by a concurrently
/// running process, so the torn-write protection that helper buys doesn't
/// apply here.
pub async fn settings_wizard(
    State(state): State<Arc<AppState>>,
    Json(body): Json<WizardRequest>,
) -> Result<Json<SettingsView>, AppError> {
    let nodes: Vec<NodeRoute> = body
        .nodes
        .into_iter()
        .map(|n| NodeRoute {
            id: n.id,
            head: n.head,
            data_ip: n.data_ip,
            control_ip: n.control_ip,
            proxy_ip: n.proxy_ip,
            ssh_user: n.ssh_user,
        })
        .collect();
    let file = InventoryFile { version: 1, rdma: body.rdma, agent: body.agent, nodes };
    let yaml = serde_yaml::to_string(&file).map_err(|e| {
        AppError::Api(fabric_core::ApiError {
            kind: fabric_core::error::ErrorKind::Config,
            message: format!("rendering inventory yaml: {e}"),
            trace_id: None,
        })
    })?;

    let path = state.default_inventory_path.clone();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            AppError::Api(fabric_core::ApiError {
                kind: fabric_core::error::ErrorKind::Config,
                message: format!("creating {}: {e}", parent.display()),
                trace_id: None,
            })
        })?;
    }
    std::fs::write(&path, yaml).map_err(|e| {
        AppError::Api(fabric_core::ApiError {
            kind: fabric_core::error::ErrorKind::Config,
            message: format!("writing {}: {e}", path.display()),
            trace_id: None,
        })
    })?;

    let current = state.override_store.load()?;
    let overrides =
        RuntimeOverride { exec_mode: current.exec_mode, inventory_file: Some(path.display().to_string()) };
    state.apply_override(overrides).await?;
    Ok(Json(settings_view(&state).await?))
}
