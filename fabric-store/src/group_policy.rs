//! Persisted per-group `swap`/`exclusive`/`persistent` policy: the
//! `ProcessGroup` fields the data model (§3) describes as belonging to
//! the group rather than any one `ManagedModel`. Stored the same way as
//! the runtime-override sidecar (one small JSON file, write-temp-then-
//! rename, `0600`), keyed by group id.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::atomic::{read_locked, write_atomic, StoreError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPolicy {
    #[serde(default = "default_swap")]
    pub swap: bool,
    #[serde(default)]
    pub exclusive: bool,
    #[serde(default)]
    pub persistent: bool,
}

fn default_swap() -> bool {
    true
}

/// The common case: one runtime at a time within a group, no cross-group
/// exclusivity, no pin against eviction. Matches an unconfigured group's
/// observable behavior before any settings write ever touches it.
impl Default for GroupPolicy {
    fn default() -> Self {
        Self { swap: true, exclusive: false, persistent: false }
    }
}

pub struct GroupPolicyStore {
    path: PathBuf,
}

impl GroupPolicyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<BTreeMap<String, GroupPolicy>, StoreError> {
        match read_locked(&self.path)? {
            None => Ok(BTreeMap::new()),
            Some(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Some(content) => {
                serde_json::from_str(&content).map_err(|e| StoreError::Deserialize(e.to_string()))
            }
        }
    }

    pub fn get(&self, group_id: &str) -> Result<GroupPolicy, StoreError> {
        Ok(self.load()?.get(group_id).copied().unwrap_or_default())
    }

    pub fn set(&self, group_id: &str, policy: GroupPolicy) -> Result<(), StoreError> {
        let mut map = self.load()?;
        map.insert(group_id.to_string(), policy);
        let content = serde_json::to_string_pretty(&map).map_err(|e| StoreError::Serialize(e.to_string()))?;
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
    fn missing_file_defaults_to_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let store = GroupPolicyStore::new(dir.path().join(".group_policy.json"));
        assert!(store.load().unwrap().is_empty());
        assert_eq!(store.get("g1").unwrap(), GroupPolicy::default());
    }

    #[test]
    fn set_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = GroupPolicyStore::new(dir.path().join(".group_policy.json"));
        store.set("g1", GroupPolicy { swap: true, exclusive: false, persistent: true }).unwrap();
        let loaded = store.get("g1").unwrap();
        assert!(loaded.swap);
        assert!(loaded.persistent);
    }

    #[test]
    fn unknown_group_defaults_rather_than_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = GroupPolicyStore::new(dir.path().join(".group_policy.json"));
        store.set("g1", GroupPolicy { swap: true, exclusive: true, persistent: false }).unwrap();
        assert_eq!(store.get("g2").unwrap(), GroupPolicy::default());
    }
}
