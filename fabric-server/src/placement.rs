//! Resolves a `ManagedModel`'s `Placement` (single-node pin, tensor
//! parallelism, hot-swap container) ahead of command rendering, grounded on
//! the Recipe Command Builder's `Placement` input (§4.6) and the Node
//! Selector's best-fit algorithm (§4.5).

use fabric_core::error::ErrorKind;
use fabric_core::{ApiError, Exec, ExecContext, ExecRequest, Inventory, NodeSelector, NvidiaSmiProbe, Placement};
use fabric_model::{BackendKind, ManagedModel, ModelMode, Recipe};

use crate::error::AppError;

/// Fallback GPU headroom target when neither the model nor its recipe pins
/// one, matching the Node Selector's own scenario defaults (§8 scenario 5).
const DEFAULT_GPU_UTILIZATION: f64 = 0.85;

/// Decides where a `ManagedModel` runs. An explicit `nodes` pin always wins;
/// otherwise a `solo` model is placed by GPU best-fit across the whole
/// inventory, and a `cluster` model stays unpinned (runs locally, fans out
/// via its own recipe's cluster launcher).
pub async fn resolve_placement(
    model: &ManagedModel,
    recipe: &Recipe,
    inventory: &Inventory,
    exec: &dyn Exec,
) -> Result<Placement, AppError> {
    let tensor_parallel = model.tensor_parallel.or(recipe.defaults.tensor_parallel).unwrap_or(1);

    let single_node = match &model.nodes {
        Some(csv) => match csv.split(',').map(str::trim).find(|s| !s.is_empty()) {
            Some(host) => {
                let route = inventory
                    .resolve(host)
                    .ok_or_else(|| AppError::NotFound(format!("unknown node in pin list: {host}")))?;
                Some(route.id.clone())
            }
            None => None,
        },
        None if model.mode == ModelMode::Solo => {
            let utilization = recipe.defaults.gpu_memory_utilization.unwrap_or(DEFAULT_GPU_UTILIZATION);
            let probe = NvidiaSmiProbe { exec };
            let selector = NodeSelector::new(&probe);
            let candidates: Vec<_> = inventory.nodes().to_vec();
            let fit = selector.select_best_fit(&candidates, utilization).await.map_err(|e| {
                AppError::Api(ApiError { kind: ErrorKind::Config, message: e.to_string(), trace_id: None })
            })?;
            Some(fit.node_id)
        }
        None => None,
    };

    let hot_swap_container = match (recipe.backend_kind, model.mode, &single_node) {
        (BackendKind::Vllm, ModelMode::Solo, Some(node)) => detect_hot_swap_container(exec, node, model).await,
        _ => None,
    };

    Ok(Placement { single_node, tensor_parallel, hot_swap_container })
}

/// Best-effort detection of an already-running container for this model's
/// vLLM solo runtime (§4.6 hot-swap mode): if `docker ps` reports it up, the
/// Command Builder reuses it via `docker exec` instead of a fresh launch.
/// A probe error or a miss both fall through to a normal (non-hot-swap)
/// launch rather than failing the upsert.
async fn detect_hot_swap_container(exec: &dyn Exec, node: &str, model: &ManagedModel) -> Option<String> {
    let container = model.use_model_name.clone().unwrap_or_else(|| model.model_id.clone());
    let ctx = ExecContext::with_timeout(std::time::Duration::from_secs(4));
    let req = ExecRequest {
        host: node.to_string(),
        is_local: false,
        script: format!(
            "docker ps --filter name=^{name}$ --format '{{{{.Names}}}}'",
            name = shlex::try_quote(&container).unwrap_or_default()
        ),
    };
    match exec.run(&ctx, req).await {
        Ok(out) if out.success() && out.output_tail.trim() == container => Some(container),
        _ => None,
    }
}
