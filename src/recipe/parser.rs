// src/recipe/parser.rs

//! Recipe file parsing

use crate::error::{Error, Result};
use crate::hash::Checksum;
use crate::recipe::format::Recipe;
use std::path::Path;

/// Parse a recipe from a TOML string
pub fn parse_recipe(content: &str) -> Result<Recipe> {
    toml::from_str(content).map_err(|e| Error::ParseError(format!("Invalid recipe: {}", e)))
}

/// Parse a recipe from a file
///
/// The file's directory is recorded so local patches can be found.
pub fn parse_recipe_file(path: &Path) -> Result<Recipe> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::IoError(format!("Failed to read recipe file {}: {}", path.display(), e))
    })?;

    let mut recipe = parse_recipe(&content)
        .map_err(|e| Error::ParseError(format!("{}: {}", path.display(), e)))?;
    recipe.recipe_dir = path.parent().map(Path::to_path_buf);
    Ok(recipe)
}

/// Validate a recipe for completeness and correctness
///
/// Returns warnings for things that are allowed but probably unintended.
pub fn validate_recipe(recipe: &Recipe) -> Result<Vec<String>> {
    let mut warnings = Vec::new();

    if recipe.package.name.trim().is_empty() {
        return Err(Error::ParseError("Recipe package name cannot be empty".to_string()));
    }

    Checksum::parse(&recipe.source.checksum).map_err(|e| {
        Error::ParseError(format!(
            "Invalid checksum '{}': {}",
            recipe.source.checksum, e
        ))
    })?;

    for (name, spec) in &recipe.options {
        if spec.values.is_empty() {
            return Err(Error::ParseError(format!("Option '{}' has no allowed values", name)));
        }
        if let Some(default) = &spec.default
            && !spec.allows(default)
        {
            return Err(Error::ParseError(format!(
                "Default '{}' of option '{}' is not one of: {}",
                default,
                name,
                spec.values.join(", ")
            )));
        }
    }

    for option in recipe.build.option_definitions.keys() {
        if !recipe.options.contains_key(option) {
            return Err(Error::ParseError(format!(
                "Build definition refers to undeclared option '{}'",
                option
            )));
        }
    }

    if let Some(patches) = &recipe.patches {
        for patch in &patches.files {
            if patch.is_remote() && patch.checksum.is_none() {
                return Err(Error::ParseError(format!(
                    "Remote patch {} has no checksum",
                    patch.file
                )));
            }
            if let Some(checksum) = &patch.checksum {
                Checksum::parse(checksum)?;
            }
        }
    }

    if recipe.package.description.is_none() {
        warnings.push("Missing package description".to_string());
    }
    if recipe.package.license.is_none() {
        warnings.push("Missing package license".to_string());
    }
    if recipe.publish.libs.is_empty() {
        warnings.push("No libraries declared in [publish]".to_string());
    }
    if recipe.publish.depends_on_linkage() && !recipe.options.contains_key("shared") {
        warnings.push(
            "Plugin or static settings in [publish] without a 'shared' option".to_string(),
        );
    }

    Ok(warnings)
}
