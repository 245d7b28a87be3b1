//! Default on-disk layout under `$XDG_DATA_HOME/fabric` (or the platform
//! equivalent via `dirs::data_dir`), mirroring `fabric-config`'s own
//! `log_dir` convention of namespacing everything under one app directory.

use std::path::PathBuf;

fn data_dir() -> PathBuf {
    dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("fabric")
}

pub fn default_inventory_path() -> PathBuf {
    data_dir().join("inventory.yaml")
}

pub fn default_models_path() -> PathBuf {
    data_dir().join("models.yaml")
}

pub fn default_overrides_path() -> PathBuf {
    data_dir().join(".cluster_settings.json")
}

pub fn default_group_policy_path() -> PathBuf {
    data_dir().join("group_policy.json")
}

pub fn default_recipes_dir() -> PathBuf {
    data_dir().join("recipes")
}
