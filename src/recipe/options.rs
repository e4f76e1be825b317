// src/recipe/options.rs

//! Option resolution
//!
//! Turns a recipe's option schema, user overrides and the target platform
//! into an immutable [`ResolvedConfiguration`]. Resolution happens in a
//! fixed order:
//!
//! 1. options removed for the platform are dropped
//! 2. overrides are validated against the remaining schema
//! 3. defaults fill whatever was not overridden
//!
//! An override for a removed option is ignored with a warning, since the
//! same profile is routinely used across platforms.

use crate::error::{Error, Result};
use crate::platform::Platform;
use crate::recipe::format::{Recipe, RecipeId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::warn;

/// User-supplied option values for a whole resolution
///
/// Keys are either `package:option`, which targets one package, or a bare
/// `option`, which targets only the root package of the plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionOverrides {
    root: BTreeMap<String, String>,
    scoped: BTreeMap<String, BTreeMap<String, String>>,
}

impl OptionOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an override from a `package:option` or `option` key
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match key.split_once(':') {
            Some((package, option)) => {
                self.scoped
                    .entry(package.trim().to_string())
                    .or_default()
                    .insert(option.trim().to_string(), value);
            }
            None => {
                self.root.insert(key.trim().to_string(), value);
            }
        }
    }

    /// Builder form of [`OptionOverrides::set`]
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Overrides that apply to `package`
    ///
    /// Package-scoped values win over bare ones for the root package.
    pub fn for_package(&self, package: &str, is_root: bool) -> BTreeMap<String, String> {
        let mut values = if is_root {
            self.root.clone()
        } else {
            BTreeMap::new()
        };
        if let Some(scoped) = self.scoped.get(package) {
            values.extend(scoped.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        values
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty() && self.scoped.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for OptionOverrides {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut overrides = Self::new();
        for (key, value) in iter {
            overrides.set(key.as_ref(), value);
        }
        overrides
    }
}

/// Whether a package is built as shared or static libraries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Linkage {
    Shared,
    Static,
}

impl fmt::Display for Linkage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Linkage::Shared => write!(f, "shared"),
            Linkage::Static => write!(f, "static"),
        }
    }
}

/// Concrete configuration of one recipe
///
/// Immutable once resolved; the build invoker and publisher only read it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedConfiguration {
    pub recipe: RecipeId,
    /// Concrete option values
    pub options: BTreeMap<String, String>,
    /// Options that do not exist on this platform
    pub removed: BTreeSet<String>,
    pub platform: Platform,
}

impl ResolvedConfiguration {
    /// Value of an option, failing if it has no concrete value
    pub fn option(&self, name: &str) -> Result<&str> {
        self.options
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| Error::UnresolvedOption {
                package: self.recipe.to_string(),
                option: name.to_string(),
            })
    }

    /// Boolean value of an option
    pub fn flag(&self, name: &str) -> Result<bool> {
        let value = self.option(name)?;
        match value.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(Error::InvalidOptionValue {
                option: name.to_string(),
                value: value.to_string(),
                allowed: vec!["true".to_string(), "false".to_string()],
            }),
        }
    }

    /// Linkage from the `shared` option
    pub fn linkage(&self) -> Result<Linkage> {
        Ok(if self.flag("shared")? {
            Linkage::Shared
        } else {
            Linkage::Static
        })
    }

    pub fn is_removed(&self, name: &str) -> bool {
        self.removed.contains(name)
    }
}

/// Resolve a recipe's options for a platform
pub fn resolve_options(
    recipe: &Recipe,
    overrides: &BTreeMap<String, String>,
    platform: &Platform,
) -> Result<ResolvedConfiguration> {
    let id = recipe.id();

    // Step 1: drop options removed for the platform
    let removed: BTreeSet<String> = recipe
        .options
        .iter()
        .filter(|(_, spec)| spec.removed_on(platform.os))
        .map(|(name, _)| name.clone())
        .collect();

    // Step 2: validate overrides
    let mut options = BTreeMap::new();
    for (name, value) in overrides {
        if removed.contains(name) {
            warn!(
                "{}: ignoring override {}={} (option removed on {})",
                id, name, value, platform.os
            );
            continue;
        }
        let spec = recipe.option(name).ok_or_else(|| Error::UnknownOption {
            package: id.to_string(),
            option: name.clone(),
        })?;
        let value = canonical_value(&spec.values, value);
        if !spec.allows(&value) {
            return Err(Error::InvalidOptionValue {
                option: name.clone(),
                value,
                allowed: spec.values.clone(),
            });
        }
        options.insert(name.clone(), value);
    }

    // Step 3: defaults
    for (name, spec) in &recipe.options {
        if removed.contains(name) || options.contains_key(name) {
            continue;
        }
        if let Some(default) = &spec.default {
            options.insert(name.clone(), default.clone());
        }
    }

    let platform = if recipe.is_pure_c() {
        platform.without_cxx_settings()
    } else {
        platform.clone()
    };

    Ok(ResolvedConfiguration {
        recipe: id,
        options,
        removed,
        platform,
    })
}

/// Match boolean spellings (`True`, `FALSE`) to the declared value
fn canonical_value(allowed: &[String], value: &str) -> String {
    allowed
        .iter()
        .find(|candidate| {
            candidate.eq_ignore_ascii_case(value)
                && matches!(candidate.as_str(), "true" | "false")
        })
        .cloned()
        .unwrap_or_else(|| value.to_string())
}
