//! `.cluster_settings.json`: the single-writer runtime override sidecar
//! (§6, §9 — modeled as one value owned by the caller, never a process
//! global).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::atomic::{read_locked, write_atomic, StoreError};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecModeOverride {
    #[default]
    Auto,
    Local,
    Agent,
}

/// Process-wide exec mode and inventory path override. Absent file means
/// "auto" for exec mode and the default inventory path.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RuntimeOverride {
    #[serde(default, rename = "execMode")]
    pub exec_mode: ExecModeOverride,
    #[serde(default, rename = "inventoryFile")]
    pub inventory_file: Option<String>,
}

pub struct OverrideStore {
    path: PathBuf,
}

impl OverrideStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<RuntimeOverride, StoreError> {
        match read_locked(&self.path)? {
            None => Ok(RuntimeOverride::default()),
            Some(content) if content.trim().is_empty() => Ok(RuntimeOverride::default()),
            Some(content) => {
                serde_json::from_str(&content).map_err(|e| StoreError::Deserialize(e.to_string()))
            }
        }
    }

    pub fn save(&self, overrides: &RuntimeOverride) -> Result<(), StoreError> {
        let content =
            serde_json::to_string_pretty(overrides).map_err(|e| StoreError::Serialize(e.to_string()))?;
        write_atomic(&self.path, &content)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_defaults_to_auto() {
        let dir = tempfile::tempdir().unwrap();
        let store = OverrideStore::new(dir.path().join(".cluster_settings.json"));
        let loaded = store.load().unwrap();
        assert_eq!(loaded.exec_mode, ExecModeOverride::Auto);
        assert!(loaded.inventory_file.is_none());
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = OverrideStore::new(dir.path().join(".cluster_settings.json"));
        let overrides = RuntimeOverride {
            exec_mode: ExecModeOverride::Agent,
            inventory_file: Some("/etc/fabric/inventory.yaml".into()),
        };
        store.save(&overrides).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.exec_mode, ExecModeOverride::Agent);
        assert_eq!(loaded.inventory_file.as_deref(), Some("/etc/fabric/inventory.yaml"));
    }

    #[cfg(unix)]
    #[test]
    fn saved_file_is_0600() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".cluster_settings.json");
        let store = OverrideStore::new(&path);
        store.save(&RuntimeOverride::default()).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
