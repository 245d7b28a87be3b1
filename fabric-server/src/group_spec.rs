//! Builds the `ProcessGroupSpec` admission needs from the flat
//! `ManagedModel` list plus the per-group policy sidecar. `ProcessGroup`'s
//! `swap`/`exclusive`/`persistent` fields (§3 data model) live on the
//! group, not on any one model, so they're looked up by the model's
//! logical `group_name` while membership is computed from whichever
//! models rendered into the same `group_id` (post single-node pinning,
//! §4.6).

use std::collections::BTreeSet;

use fabric_model::{ManagedModel, ProcessGroupSpec};
use fabric_store::GroupPolicyStore;

pub fn build_group_spec(
    group_id: &str,
    model: &ManagedModel,
    all_models: &[ManagedModel],
    policy_store: &GroupPolicyStore,
) -> Result<ProcessGroupSpec, fabric_store::StoreError> {
    let policy = policy_store.get(&model.group_name)?;
    let members: BTreeSet<String> = all_models
        .iter()
        .filter(|m| m.group_name == model.group_name && rendered_group_of(m) == group_id)
        .map(|m| m.model_id.clone())
        .collect();
    Ok(ProcessGroupSpec {
        group_id: group_id.to_string(),
        members,
        swap: policy.swap,
        exclusive: policy.exclusive,
        persistent: policy.persistent,
    })
}

/// A model's rendered group id if placement resolved one, else its plain
/// `group_name` (true for every model that isn't single-node pinned).
fn rendered_group_of(model: &ManagedModel) -> &str {
    model.rendered_group_id.as_deref().unwrap_or(model.group_name.as_str())
}
