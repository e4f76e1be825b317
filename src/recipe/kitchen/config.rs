// src/recipe/kitchen/config.rs

//! Configuration types for the Kitchen
//!
//! [`KitchenConfig`] says where the Kitchen keeps its state; a [`Profile`]
//! says what it builds for. Both are TOML files:
//!
//! ```toml
//! # kitchen.toml
//! source_cache = "/var/cache/kitchen/sources"
//! registry = "/var/lib/kitchen/registry"
//! jobs = 8
//! ```
//!
//! ```toml
//! # profile.toml
//! [settings]
//! os = "windows"
//! arch = "x86_64"
//! build_type = "release"
//!
//! [settings.compiler]
//! family = "msvc"
//! version = "16"
//! runtime = "MD"
//!
//! [options]
//! "gstreamer:shared" = false
//! ```

use crate::error::{Error, Result};
use crate::platform::Platform;
use crate::recipe::options::OptionOverrides;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration for the Kitchen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KitchenConfig {
    /// Directory for downloaded and extracted sources
    pub source_cache: PathBuf,
    /// Published package registry
    pub registry: PathBuf,
    /// Scratch space for per-cook build trees
    pub work_dir: PathBuf,
    /// Number of parallel jobs passed to the build tool
    pub jobs: usize,
    /// Keep build directory after completion (for debugging)
    pub keep_builddir: bool,
}

impl Default for KitchenConfig {
    fn default() -> Self {
        let jobs = std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(4);
        let base = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("conary-kitchen");

        Self {
            source_cache: base.join("sources"),
            registry: base.join("registry"),
            work_dir: base.join("work"),
            jobs,
            keep_builddir: false,
        }
    }
}

impl KitchenConfig {
    /// A configuration keeping all state below `root`
    pub fn with_root(root: &Path) -> Self {
        Self {
            source_cache: root.join("sources"),
            registry: root.join("registry"),
            work_dir: root.join("work"),
            ..Self::default()
        }
    }

    /// Load a configuration file; unset keys keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::IoError(format!("Failed to read {}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| Error::ParseError(format!("Invalid config {}: {}", path.display(), e)))
    }
}

/// Target settings and option overrides for a cook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub platform: Platform,
    pub overrides: OptionOverrides,
}

#[derive(Deserialize)]
struct ProfileFile {
    settings: Platform,
    #[serde(default)]
    options: BTreeMap<String, toml::Value>,
}

impl Profile {
    /// Profile for the running machine with no overrides
    pub fn host() -> Self {
        Self {
            platform: Platform::host(),
            overrides: OptionOverrides::new(),
        }
    }

    pub fn new(platform: Platform, overrides: OptionOverrides) -> Self {
        Self {
            platform,
            overrides,
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        let file: ProfileFile = toml::from_str(content)
            .map_err(|e| Error::ParseError(format!("Invalid profile: {}", e)))?;

        let mut overrides = OptionOverrides::new();
        for (key, value) in file.options {
            let value = match value {
                toml::Value::String(s) => s,
                toml::Value::Boolean(b) => b.to_string(),
                toml::Value::Integer(i) => i.to_string(),
                other => {
                    return Err(Error::ParseError(format!(
                        "Option '{}' must be a string, boolean or integer, got {}",
                        key,
                        other.type_str()
                    )));
                }
            };
            overrides.set(&key, value);
        }

        Ok(Self {
            platform: file.settings,
            overrides,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::IoError(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::parse(&content)
    }
}
