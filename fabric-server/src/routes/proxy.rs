//! Data-plane proxy entry point (§6): the catch-all route every path that
//! isn't one of the control-plane's own resources falls through to.
//! Resolves the target model, runs it through admission, then forwards
//! the request verbatim — this control plane proxies bytes, it does not
//! validate the OpenAI-compatible schema (explicit Non-goal).

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use fabric_core::StartSpec;
use fabric_model::{GroupId, ManagedModel, Recipe};
use futures::TryStreamExt;

use crate::app::{AppState, HEALTH_CHECK_TIMEOUT};
use crate::error::AppError;
use crate::group_spec::build_group_spec;
use crate::routes::models::group_id_of;

/// Request bodies for inference routes are JSON and comfortably small
/// relative to model weights; this bound only guards against a
/// pathological client streaming an unbounded body at us before we've
/// even picked a backend.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "host",
];

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers.iter() {
        if HOP_BY_HOP.iter().any(|h| name.as_str().eq_ignore_ascii_case(h)) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Model identity is read from the JSON body's `model` field first (the
/// OpenAI-compatible convention every data-plane path uses), then a
/// `model` query param, then an `x-fabric-model` header — the latter two
/// exist for data-plane paths with no JSON body (`/v1/audio/...` uploads,
/// health probes against a specific backend, etc).
fn extract_model_id(uri: &Uri, headers: &HeaderMap, body: &[u8]) -> Option<String> {
    if !body.is_empty() {
        if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
            if let Some(model) = value.get("model").and_then(|m| m.as_str()) {
                return Some(model.to_string());
            }
        }
    }
    if let Some(query) = uri.query() {
        for pair in query.split('&') {
            let mut parts = pair.splitn(2, '=');
            if parts.next() == Some("model") {
                if let Some(value) = parts.next() {
                    return Some(value.to_string());
                }
            }
        }
    }
    headers.get("x-fabric-model").and_then(|v| v.to_str().ok()).map(str::to_string)
}

async fn resolve_model(state: &AppState, model_id: &str) -> Result<ManagedModel, AppError> {
    if let Some(model) = state.model_store.get(model_id).await? {
        return Ok(model);
    }
    let models = state.model_store.list().await?;
    models
        .into_iter()
        .find(|m| m.use_model_name.as_deref() == Some(model_id) || m.aliases.iter().any(|a| a == model_id))
        .ok_or_else(|| AppError::NotFound(format!("unknown model: {model_id}")))
}

/// Base URL of the upstream runtime for an admitted model: the recipe's
/// own `host`/`port` defaults, falling back to the pinned node's proxy
/// address (or loopback, for a local placement).
fn upstream_base(recipe: &Recipe, model: &ManagedModel, inventory: &fabric_core::Inventory) -> String {
    let host = recipe.defaults.host.clone().unwrap_or_else(|| match &model.rendered_host {
        Some(node_id) => {
            inventory.by_id(node_id).map(|route| route.proxy_address().to_string()).unwrap_or_else(|| node_id.clone())
        }
        None => "127.0.0.1".to_string(),
    });
    let port = recipe.defaults.port.unwrap_or(8000);
    format!("http://{host}:{port}")
}

/// Admits `model`'s process (starting it if needed) and returns its live
/// proxy target, the full §4.4/§4.6 admission path: resolve recipe →
/// build the group spec → `ProxyManager::acquire`.
async fn admit(state: &AppState, model: &ManagedModel) -> Result<String, AppError> {
    let recipe = state.catalog.resolve(&model.recipe_ref)?;
    let inventory = state.inventory().await;
    let exec = state.exec().await;

    let group_id: GroupId = group_id_of(model).to_string();
    let all_models = state.model_store.list().await?;
    let spec = build_group_spec(&group_id, model, &all_models, &state.group_policy_store)?;

    let proxy_target = upstream_base(&recipe, model, &inventory);
    let health_endpoint = format!("{proxy_target}/health");
    let host = model.rendered_host.clone().unwrap_or_else(|| state.local_node_id.clone());
    let is_local = model.rendered_host.is_none();

    let start = StartSpec {
        host,
        is_local,
        proxy_target: proxy_target.clone(),
        health_endpoint,
        health_check_timeout: HEALTH_CHECK_TIMEOUT,
    };

    let process = state.manager.acquire(&*exec, &*state.health, &group_id, spec, model, start).await?;
    let snapshot = process.snapshot(&model.model_id).await;
    Ok(snapshot.proxy_target.unwrap_or(proxy_target))
}

fn config_error(message: impl Into<String>) -> AppError {
    AppError::Api(fabric_core::ApiError { kind: fabric_core::error::ErrorKind::Config, message: message.into(), trace_id: None })
}

fn transient_error(message: impl Into<String>) -> AppError {
    AppError::Api(fabric_core::ApiError {
        kind: fabric_core::error::ErrorKind::TransientTransport,
        message: message.into(),
        trace_id: None,
    })
}

pub async fn proxy(State(state): State<Arc<AppState>>, req: Request) -> Result<Response, AppError> {
    let (parts, body) = req.into_parts();
    let body_bytes = to_bytes(body, MAX_BODY_BYTES).await.map_err(|e| config_error(format!("reading request body: {e}")))?;

    let model_id = extract_model_id(&parts.uri, &parts.headers, &body_bytes)
        .ok_or_else(|| AppError::NotFound("request names no model (body.model, ?model=, or X-Fabric-Model)".to_string()))?;

    let model = resolve_model(&state, &model_id).await?;
    let proxy_target = admit(&state, &model).await?;

    let path_and_query = parts.uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    let url = format!("{proxy_target}{path_and_query}");

    let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes()).unwrap_or(reqwest::Method::GET);
    let mut upstream_req = state.proxy_http.request(method, &url);
    for (name, value) in strip_hop_by_hop(&parts.headers).iter() {
        upstream_req = upstream_req.header(name, value);
    }

    let upstream_resp =
        upstream_req.body(body_bytes.to_vec()).send().await.map_err(|e| transient_error(format!("proxying to {url}: {e}")))?;

    let status = StatusCode::from_u16(upstream_resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let response_headers = strip_hop_by_hop(upstream_resp.headers());

    let stream = upstream_resp.bytes_stream().map_err(std::io::Error::other);
    let mut builder = Response::builder().status(status);
    for (name, value) in response_headers.iter() {
        builder = builder.header(name, value);
    }
    Ok(builder.body(Body::from_stream(stream)).unwrap_or_else(|_| (StatusCode::BAD_GATEWAY, "bad upstream response").into_response()))
}
