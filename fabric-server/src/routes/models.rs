//! `/api/models/*` (§6): live view over the persisted `ManagedModel` set,
//! and unload (release) actions against the admitted `Process` for each.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use fabric_model::{ManagedModel, ProcessSnapshot};
use serde::Serialize;

use crate::app::AppState;
use crate::error::AppError;

#[derive(Serialize)]
pub struct ModelStatusView {
    #[serde(flatten)]
    pub model: ManagedModel,
    pub process: Option<ProcessSnapshot>,
}

pub(crate) fn group_id_of(model: &ManagedModel) -> &str {
    model.rendered_group_id.as_deref().unwrap_or(model.group_name.as_str())
}

async fn snapshot_for(state: &AppState, model: &ManagedModel) -> Option<ProcessSnapshot> {
    let group = state.manager.group(group_id_of(model)).await?;
    let process = group.process(&model.model_id).await?;
    Some(process.snapshot(&model.model_id).await)
}

pub async fn list(State(state): State<Arc<AppState>>) -> Result<Json<Vec<ModelStatusView>>, AppError> {
    let models = state.model_store.list().await?;
    let mut views = Vec::with_capacity(models.len());
    for model in models {
        let process = snapshot_for(&state, &model).await;
        views.push(ModelStatusView { model, process });
    }
    Ok(Json(views))
}

pub(crate) async fn release_one(state: &AppState, model: &ManagedModel) -> Result<(), AppError> {
    let exec = state.exec().await;
    let host = model.rendered_host.clone().unwrap_or_else(|| state.local_node_id.clone());
    let is_local = model.rendered_host.is_none();
    state.manager.release(&*exec, group_id_of(model), model, &host, is_local).await?;
    Ok(())
}

pub async fn unload_all(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, AppError> {
    let models = state.model_store.list().await?;
    for model in &models {
        release_one(&state, model).await?;
    }
    Ok(Json(serde_json::json!({ "unloaded": models.len() })))
}

pub async fn unload_one(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let model = state.model_store.get(&id).await?.ok_or_else(|| AppError::NotFound(format!("unknown model: {id}")))?;
    release_one(&state, &model).await?;
    Ok(Json(serde_json::json!({ "unloaded": id })))
}
