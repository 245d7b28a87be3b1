//! Shared data model for the cluster control plane: recipes, managed models,
//! process/group state, node routing, and cluster status snapshots.
//!
//! Types here are intentionally dumb: no I/O, no locking. Everything that
//! mutates or persists these lives in `fabric-core` / `fabric-store`.

pub mod cluster;
pub mod process;
pub mod recipe;

pub use cluster::{ClusterStatus, ClusterView, DgxStatus, GpuDeviceMetric, IncludeFlag, NodeMetrics, NodeRoute, NodeStatus, Overall};
pub use process::{
    current_schema_version, pinned_group_id, GroupId, ManagedModel, ManagedModelMetadata, ModelMode,
    ProcessGroupSpec, ProcessSnapshot, ProcessState, StdioTail,
};
pub use recipe::{BackendKind, Recipe, RecipeCatalog, RecipeDefaults, RecipeError};

use thiserror::Error;

/// Errors constructing or validating model-layer values (not I/O — those
/// live in the owning crates' own error enums).
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}
