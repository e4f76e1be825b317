// src/recipe/index.rs

//! Index of available recipes
//!
//! The dependency resolver chooses versions from here. An index is usually
//! loaded from a directory tree where each recipe lives in its own
//! directory next to its patches:
//!
//! ```text
//! recipes/
//!   gstreamer/1.16.0/recipe.toml
//!   gstreamer/1.16.0/patches/0001-fix-build.diff
//!   glib/2.66.0/recipe.toml
//! ```

use crate::error::{Error, Result};
use crate::recipe::format::Recipe;
use crate::recipe::parser::{parse_recipe_file, validate_recipe};
use crate::version::Version;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// File name recipes are discovered by
pub const RECIPE_FILE_NAME: &str = "recipe.toml";

/// Available recipes by name and version
#[derive(Debug, Clone, Default)]
pub struct RecipeIndex {
    recipes: BTreeMap<String, BTreeMap<Version, Arc<Recipe>>>,
}

impl RecipeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `recipe.toml` below `dir`
    ///
    /// Each recipe is validated; validation warnings are logged.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut index = Self::new();

        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                Error::IoError(format!("Failed to scan {}: {}", dir.display(), e))
            })?;
            if !entry.file_type().is_file() || entry.file_name() != RECIPE_FILE_NAME {
                continue;
            }

            let recipe = parse_recipe_file(entry.path())?;
            for warning in validate_recipe(&recipe)? {
                warn!("{}: {}", entry.path().display(), warning);
            }
            debug!("Indexed {} from {}", recipe.id(), entry.path().display());
            index.insert(recipe)?;
        }

        info!("Loaded {} recipes from {}", index.len(), dir.display());
        Ok(index)
    }

    /// Add a recipe; a second recipe with the same name and version is an error
    pub fn insert(&mut self, recipe: Recipe) -> Result<()> {
        let id = recipe.id();
        let versions = self.recipes.entry(id.name.clone()).or_default();
        if versions.contains_key(&id.version) {
            return Err(Error::ParseError(format!("Duplicate recipe {}", id)));
        }
        versions.insert(id.version, Arc::new(recipe));
        Ok(())
    }

    /// Builder form of [`RecipeIndex::insert`]
    pub fn with(mut self, recipe: Recipe) -> Result<Self> {
        self.insert(recipe)?;
        Ok(self)
    }

    /// All versions of a package, ascending
    pub fn versions(&self, name: &str) -> Option<&BTreeMap<Version, Arc<Recipe>>> {
        self.recipes.get(name)
    }

    pub fn get(&self, name: &str, version: &Version) -> Option<Arc<Recipe>> {
        self.recipes.get(name)?.get(version).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.recipes.contains_key(name)
    }

    /// Package names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.recipes.keys().map(String::as_str)
    }

    /// Number of recipes across all versions
    pub fn len(&self) -> usize {
        self.recipes.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }
}
