//! Persisted `ManagedModel` set: a single YAML file, upserted/removed
//! under an exclusive lock, written atomically.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use fabric_model::ManagedModel;
use tokio::sync::Mutex;

use crate::atomic::{read_locked, write_atomic, StoreError};

const CURRENT_SCHEMA_VERSION: u32 = 1;

#[derive(Default, serde::Serialize, serde::Deserialize)]
struct OnDisk {
    #[serde(default)]
    models: BTreeMap<String, ManagedModel>,
}

/// File-backed store of `ManagedModel` entries, keyed by `model_id`.
///
/// A `tokio::sync::Mutex` serializes upsert/remove from within this
/// process; the `fs2` exclusive lock in `atomic` additionally protects
/// against other processes (e.g. a concurrently running CLI command)
/// racing the same file.
pub struct ManagedModelStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl ManagedModelStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<OnDisk, StoreError> {
        match read_locked(&self.path)? {
            None => Ok(OnDisk::default()),
            Some(content) if content.trim().is_empty() => Ok(OnDisk::default()),
            Some(content) => {
                let parsed: OnDisk =
                    serde_yaml::from_str(&content).map_err(|e| StoreError::Deserialize(e.to_string()))?;
                for model in parsed.models.values() {
                    if model.schema_version > CURRENT_SCHEMA_VERSION {
                        return Err(StoreError::UnsupportedSchemaVersion {
                            found: model.schema_version,
                            max: CURRENT_SCHEMA_VERSION,
                        });
                    }
                }
                Ok(parsed)
            }
        }
    }

    fn save(&self, data: &OnDisk) -> Result<(), StoreError> {
        let content = serde_yaml::to_string(data).map_err(|e| StoreError::Serialize(e.to_string()))?;
        write_atomic(&self.path, &content)
    }

    pub async fn list(&self) -> Result<Vec<ManagedModel>, StoreError> {
        let _permit = self.guard.lock().await;
        let data = self.load()?;
        Ok(data.models.into_values().collect())
    }

    pub async fn get(&self, model_id: &str) -> Result<Option<ManagedModel>, StoreError> {
        let _permit = self.guard.lock().await;
        let data = self.load()?;
        Ok(data.models.get(model_id).cloned())
    }

    /// Insert or replace a `ManagedModel`. Rendering (`rendered_cmd`,
    /// `rendered_cmd_stop`) is the Recipe Command Builder's job — callers
    /// are expected to populate those fields before calling this.
    pub async fn upsert(&self, model: ManagedModel) -> Result<(), StoreError> {
        let _permit = self.guard.lock().await;
        let mut data = self.load()?;
        data.models.insert(model.model_id.clone(), model);
        self.save(&data)
    }

    pub async fn remove(&self, model_id: &str) -> Result<bool, StoreError> {
        let _permit = self.guard.lock().await;
        let mut data = self.load()?;
        let removed = data.models.remove(model_id).is_some();
        if removed {
            self.save(&data)?;
        }
        Ok(removed)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_model::ModelMode;

    fn sample(id: &str) -> ManagedModel {
        ManagedModel {
            model_id: id.to_string(),
            recipe_ref: "vllm/llama3".to_string(),
            mode: ModelMode::Solo,
            tensor_parallel: None,
            nodes: None,
            extra_args: vec![],
            container_image: None,
            non_privileged: false,
            mem_limit_gb: None,
            group_name: "default".to_string(),
            use_model_name: None,
            aliases: vec![],
            rendered_cmd: None,
            rendered_cmd_stop: None,
            rendered_group_id: None,
            rendered_host: None,
            metadata: Default::default(),
            schema_version: 1,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upsert_then_list_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManagedModelStore::new(dir.path().join("models.yaml"));
        store.upsert(sample("m1")).await.unwrap();
        let list = store.list().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].model_id, "m1");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upsert_is_keyed_by_model_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManagedModelStore::new(dir.path().join("models.yaml"));
        store.upsert(sample("m1")).await.unwrap();
        let mut updated = sample("m1");
        updated.group_name = "other".to_string();
        store.upsert(updated).await.unwrap();
        let list = store.list().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].group_name, "other");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remove_returns_false_for_unknown_model() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManagedModelStore::new(dir.path().join("models.yaml"));
        assert!(!store.remove("nope").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remove_deletes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManagedModelStore::new(dir.path().join("models.yaml"));
        store.upsert(sample("m1")).await.unwrap();
        assert!(store.remove("m1").await.unwrap());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reopening_store_reads_persisted_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.yaml");
        let store1 = ManagedModelStore::new(&path);
        store1.upsert(sample("m1")).await.unwrap();
        drop(store1);

        let store2 = ManagedModelStore::new(&path);
        let list = store2.get("m1").await.unwrap();
        assert!(list.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn future_schema_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.yaml");
        std::fs::write(
            &path,
            "models:\n  m1:\n    model_id: m1\n    recipe_ref: r\n    mode: solo\n    group_name: g\n    schema_version: 99\n",
        )
        .unwrap();
        let store = ManagedModelStore::new(&path);
        let err = store.list().await.unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedSchemaVersion { found: 99, .. }));
    }
}
