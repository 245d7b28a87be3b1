//! `/api/recipes/*` (§6): recipe catalog listing, managed-model upsert
//! (the only place `Placement`/`CommandBuilder` run), delete, and a
//! narrow backend-maintenance action hook.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use fabric_core::{CommandBuilder, ExecContext, ExecRequest};
use fabric_model::{ManagedModel, ModelMode, Recipe};
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::error::AppError;
use crate::placement::resolve_placement;
use crate::routes::models::release_one;

#[derive(Serialize)]
pub struct RecipeState {
    pub recipes: Vec<Recipe>,
    pub models: Vec<ManagedModel>,
}

/// `GET /api/recipes/state` (§6): the two read models an operator UI needs
/// to render the recipe/model picker in one round trip.
pub async fn state(State(state): State<Arc<AppState>>) -> Result<Json<RecipeState>, AppError> {
    let recipes = state.catalog.list();
    let models = state.model_store.list().await?;
    Ok(Json(RecipeState { recipes, models }))
}

/// Body accepted by `upsert_model`: the subset of `ManagedModel` an
/// operator actually edits. Everything else (`rendered_*`, `schema_version`)
/// is derived, never taken from the request.
#[derive(Deserialize)]
pub struct UpsertModelRequest {
    pub model_id: String,
    pub recipe_ref: String,
    pub mode: ModelMode,
    #[serde(default)]
    pub tensor_parallel: Option<u32>,
    #[serde(default)]
    pub nodes: Option<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default)]
    pub container_image: Option<String>,
    #[serde(default)]
    pub non_privileged: bool,
    #[serde(default)]
    pub mem_limit_gb: Option<u32>,
    pub group_name: String,
    #[serde(default)]
    pub use_model_name: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// `POST /api/recipes/models` (§4.6, §6): resolve the recipe, decide
/// placement (Node Selector for an unpinned solo model, or the explicit
/// pin), render `cmd`/`cmdStop` via the Recipe Command Builder, and
/// persist. The previous `rendered_host` (if any) is released first so a
/// re-placement never leaves a stray process running under the old
/// pinning.
pub async fn upsert_model(
    State(state): State<Arc<AppState>>,
    Json(body): Json<UpsertModelRequest>,
) -> Result<Json<ManagedModel>, AppError> {
    let recipe = state.catalog.resolve(&body.recipe_ref)?;

    if body.mode == ModelMode::Solo && !recipe.allows_solo() {
        return Err(AppError::Api(fabric_core::ApiError {
            kind: fabric_core::error::ErrorKind::Config,
            message: format!("recipe {} does not support solo mode", body.recipe_ref),
            trace_id: None,
        }));
    }
    if body.mode == ModelMode::Cluster && !recipe.allows_cluster() {
        return Err(AppError::Api(fabric_core::ApiError {
            kind: fabric_core::error::ErrorKind::Config,
            message: format!("recipe {} does not support cluster mode", body.recipe_ref),
            trace_id: None,
        }));
    }

    if let Some(existing) = state.model_store.get(&body.model_id).await? {
        release_one(&state, &existing).await?;
    }

    let previous = state.model_store.get(&body.model_id).await?;
    let mut model = ManagedModel {
        model_id: body.model_id,
        recipe_ref: body.recipe_ref,
        mode: body.mode,
        tensor_parallel: body.tensor_parallel,
        nodes: body.nodes,
        extra_args: body.extra_args,
        container_image: body.container_image,
        non_privileged: body.non_privileged,
        mem_limit_gb: body.mem_limit_gb,
        group_name: body.group_name,
        use_model_name: body.use_model_name,
        aliases: body.aliases,
        rendered_cmd: None,
        rendered_cmd_stop: None,
        rendered_group_id: None,
        rendered_host: None,
        metadata: previous.map(|p| p.metadata).unwrap_or_default(),
        schema_version: fabric_model::current_schema_version(),
    };

    let inventory = state.inventory().await;
    let exec = state.exec().await;
    let placement = resolve_placement(&model, &recipe, &inventory, &*exec).await?;

    let rendered = CommandBuilder::render(&recipe, &model, &placement)?;

    model.rendered_cmd = Some(rendered.cmd);
    model.rendered_cmd_stop = Some(rendered.cmd_stop);
    model.rendered_group_id = Some(rendered.group_id);
    model.rendered_host = placement.single_node;

    state.model_store.upsert(model.clone()).await?;
    Ok(Json(model))
}

/// `DELETE /api/recipes/models/:id` (§6): releases the running process (if
/// any) before removing the persisted entry.
pub async fn delete_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let model = state.model_store.get(&id).await?.ok_or_else(|| AppError::NotFound(format!("unknown model: {id}")))?;
    release_one(&state, &model).await?;
    state.model_store.remove(&id).await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

#[derive(Deserialize)]
pub struct BackendActionRequest {
    /// Which node to run the action on; defaults to the local node.
    #[serde(default)]
    pub node: Option<String>,
    pub script: String,
}

#[derive(Serialize)]
pub struct BackendActionResponse {
    pub ok: bool,
    pub output: String,
}

/// `POST /api/recipes/backend/action` (§6, §9 redesign flag): a narrow,
/// synchronous escape hatch for backend maintenance (image pulls, build
/// scripts) that the distilled spec leaves unspecified beyond "some action
/// runs against a backend directory". Full image lifecycle management is a
/// non-goal (§4.6 Non-goals); this only runs an operator-supplied script
/// through the same Remote Exec Layer everything else uses, so it gets the
/// same timeout/cancellation and output-tail behavior for free.
pub async fn backend_action(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BackendActionRequest>,
) -> Result<Json<BackendActionResponse>, AppError> {
    let inventory = state.inventory().await;
    let exec = state.exec().await;

    let (host, is_local) = match &body.node {
        Some(node) => {
            let route = inventory.resolve(node).ok_or_else(|| AppError::NotFound(format!("unknown node: {node}")))?;
            (route.id.clone(), route.id == state.local_node_id)
        }
        None => (state.local_node_id.clone(), true),
    };

    let ctx = ExecContext::with_timeout(std::time::Duration::from_secs(600));
    let req = ExecRequest { host, is_local, script: body.script };
    let output = exec.run(&ctx, req).await?;
    Ok(Json(BackendActionResponse { ok: output.success(), output: output.output_tail }))
}
