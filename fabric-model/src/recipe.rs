//! Recipe catalog entries: immutable, read-only per process.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which runtime a recipe launches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Vllm,
    Trtllm,
    Llamacpp,
    Sqlang,
    Custom,
}

/// Defaults a recipe supplies for fields a `ManagedModel` may override.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RecipeDefaults {
    pub tensor_parallel: Option<u32>,
    pub gpu_memory_utilization: Option<f64>,
    pub host: Option<String>,
    pub port: Option<u16>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// An immutable catalog entry resolved from the (external) recipe tree.
///
/// Identity is `ref`; lifecycle is read-only for the life of the process —
/// recipes are reloaded wholesale, never mutated in place.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Recipe {
    pub id: String,
    #[serde(rename = "ref")]
    pub recipe_ref: String,
    pub backend_dir: String,
    pub backend_kind: BackendKind,
    pub runtime: String,
    pub model: String,
    #[serde(default)]
    pub defaults: RecipeDefaults,
    pub command_template: String,
    #[serde(default)]
    pub solo_only: bool,
    #[serde(default)]
    pub cluster_only: bool,
    pub container_image: Option<String>,
}

impl Recipe {
    /// A recipe usable as a starting point for a single-node (`solo`) managed model.
    pub fn allows_solo(&self) -> bool {
        !self.cluster_only
    }

    /// A recipe usable as a starting point for a multi-node (`cluster`) managed model.
    pub fn allows_cluster(&self) -> bool {
        !self.solo_only
    }
}

#[derive(Debug, Error)]
pub enum RecipeError {
    #[error("unknown recipe ref: {0}")]
    NotFound(String),
    #[error("recipe {recipe_ref} does not support mode {mode}")]
    ModeNotSupported { recipe_ref: String, mode: &'static str },
    #[error("recipe source error: {0}")]
    Source(String),
}

/// External collaborator boundary: the full recipe catalog is a tree of YAML
/// files with inheritance, out of scope here. This trait is the seam the
/// rest of the control plane depends on; `fabric-core` ships a
/// `StaticRecipeCatalog` and a `FlatFileRecipeCatalog` against it.
pub trait RecipeCatalog: Send + Sync {
    fn resolve(&self, recipe_ref: &str) -> Result<Recipe, RecipeError>;
    fn list(&self) -> Vec<Recipe>;
}
