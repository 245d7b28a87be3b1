//! Two `RecipeCatalog` implementations (§3 addition): `StaticRecipeCatalog`
//! for tests/embeddable defaults, and `FlatFileRecipeCatalog` — a
//! simplification of the "tree of YAML files" the distilled spec gestures
//! at, reading a single directory of `*.yaml` files, one recipe per file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use fabric_model::{Recipe, RecipeCatalog, RecipeError};

pub struct StaticRecipeCatalog {
    recipes: HashMap<String, Recipe>,
}

impl StaticRecipeCatalog {
    pub fn new(recipes: impl IntoIterator<Item = Recipe>) -> Self {
        Self { recipes: recipes.into_iter().map(|r| (r.recipe_ref.clone(), r)).collect() }
    }
}

impl RecipeCatalog for StaticRecipeCatalog {
    fn resolve(&self, recipe_ref: &str) -> Result<Recipe, RecipeError> {
        self.recipes.get(recipe_ref).cloned().ok_or_else(|| RecipeError::NotFound(recipe_ref.to_string()))
    }

    fn list(&self) -> Vec<Recipe> {
        self.recipes.values().cloned().collect()
    }
}

/// Reads every `*.yaml` file directly under `dir`, one recipe per file.
/// Reloaded wholesale on `reload()` — never mutated in place, matching
/// the "recipes are immutable shared references" ownership rule (§3).
pub struct FlatFileRecipeCatalog {
    dir: PathBuf,
    cache: RwLock<HashMap<String, Recipe>>,
}

impl FlatFileRecipeCatalog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), cache: RwLock::new(HashMap::new()) }
    }

    pub fn load(dir: impl Into<PathBuf>) -> Result<Self, RecipeError> {
        let catalog = Self::new(dir);
        catalog.reload()?;
        Ok(catalog)
    }

    pub fn reload(&self) -> Result<(), RecipeError> {
        let mut recipes = HashMap::new();
        let entries = std::fs::read_dir(&self.dir).map_err(|e| RecipeError::Source(e.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|e| RecipeError::Source(e.to_string()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            let recipe = load_one(&path)?;
            recipes.insert(recipe.recipe_ref.clone(), recipe);
        }
        *self.cache.write().expect("recipe catalog lock poisoned") = recipes;
        Ok(())
    }
}

fn load_one(path: &Path) -> Result<Recipe, RecipeError> {
    let content = std::fs::read_to_string(path).map_err(|e| RecipeError::Source(e.to_string()))?;
    serde_yaml::from_str(&content).map_err(|e| RecipeError::Source(format!("{}: {e}", path.display())))
}

impl RecipeCatalog for FlatFileRecipeCatalog {
    fn resolve(&self, recipe_ref: &str) -> Result<Recipe, RecipeError> {
        self.cache
            .read()
            .expect("recipe catalog lock poisoned")
            .get(recipe_ref)
            .cloned()
            .ok_or_else(|| RecipeError::NotFound(recipe_ref.to_string()))
    }

    fn list(&self) -> Vec<Recipe> {
        self.cache.read().expect("recipe catalog lock poisoned").values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_model::BackendKind;

    fn sample_recipe(recipe_ref: &str) -> Recipe {
        Recipe {
            id: recipe_ref.to_string(),
            recipe_ref: recipe_ref.to_string(),
            backend_dir: "/opt".into(),
            backend_kind: BackendKind::Vllm,
            runtime: "vllm serve".into(),
            model: "m".into(),
            defaults: Default::default(),
            command_template: String::new(),
            solo_only: false,
            cluster_only: false,
            container_image: None,
        }
    }

    #[test]
    fn static_catalog_resolves_known_ref() {
        let catalog = StaticRecipeCatalog::new(vec![sample_recipe("vllm/llama3")]);
        let recipe = catalog.resolve("vllm/llama3").unwrap();
        assert_eq!(recipe.model, "m");
    }

    #[test]
    fn static_catalog_unknown_ref_errors() {
        let catalog = StaticRecipeCatalog::new(vec![]);
        assert!(matches!(catalog.resolve("nope"), Err(RecipeError::NotFound(_))));
    }

    #[test]
    fn flat_file_catalog_reads_yaml_files_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        let recipe = sample_recipe("vllm/llama3");
        let yaml = serde_yaml::to_string(&recipe).unwrap();
        std::fs::write(dir.path().join("llama3.yaml"), yaml).unwrap();
        std::fs::write(dir.path().join("README.md"), "ignored").unwrap();

        let catalog = FlatFileRecipeCatalog::load(dir.path()).unwrap();
        assert_eq!(catalog.list().len(), 1);
        assert!(catalog.resolve("vllm/llama3").is_ok());
    }

    #[test]
    fn flat_file_catalog_reload_picks_up_new_files() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = FlatFileRecipeCatalog::load(dir.path()).unwrap();
        assert!(catalog.list().is_empty());

        let recipe = sample_recipe("trtllm/mixtral");
        std::fs::write(dir.path().join("mixtral.yaml"), serde_yaml::to_string(&recipe).unwrap()).unwrap();
        catalog.reload().unwrap();
        assert_eq!(catalog.list().len(), 1);
    }
}
