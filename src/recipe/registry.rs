// src/recipe/registry.rs

//! Registry of published packages
//!
//! Every cooked package is stored under its fingerprint, a hash of:
//! - the recipe revision (recipe content and local patch content)
//! - the resolved configuration (options and platform)
//! - the fingerprints of its dependencies
//!
//! so a change anywhere below a package produces a new fingerprint and a
//! rebuild, while an unchanged package is found here and reused.
//!
//! Layout, sharded by the first two characters of the fingerprint:
//!
//! ```text
//! <root>/.lock
//! <root>/.staging/<fingerprint>-<uuid>/
//! <root>/ab/abcdef.../artifact.json
//! <root>/ab/abcdef.../{include,lib,bin,licenses}/
//! ```
//!
//! Publication is atomic: a package is assembled in `.staging` and renamed
//! into place under an exclusive lock, so readers see either the complete
//! package with its `artifact.json` or nothing.

use crate::error::{Error, Result};
use crate::hash::{HashAlgorithm, hash_bytes};
use crate::recipe::format::RecipeId;
use crate::recipe::options::{Linkage, ResolvedConfiguration};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Name of the metadata file inside each package directory
pub const ARTIFACT_FILE: &str = "artifact.json";

const STAGING_DIR: &str = ".staging";
const LOCK_FILE: &str = ".lock";

/// Identity of a built package configuration
///
/// Always 64 lowercase hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Combine a recipe revision, its configuration and dependency fingerprints
    ///
    /// Dependency order does not matter.
    pub fn compute(
        revision: &str,
        config: &ResolvedConfiguration,
        dependencies: &[Fingerprint],
    ) -> Result<Self> {
        let config_json = serde_json::to_string(config).map_err(|e| {
            Error::ParseError(format!("Failed to serialize configuration: {}", e))
        })?;

        let mut deps: Vec<&str> = dependencies.iter().map(Fingerprint::as_str).collect();
        deps.sort_unstable();

        let mut data = String::new();
        data.push_str(&format!("recipe:{}\n", config.recipe));
        data.push_str(&format!("revision:{}\n", revision));
        data.push_str(&format!("config:{}\n", config_json));
        for dep in deps {
            data.push_str(&format!("dep:{}\n", dep));
        }

        let fingerprint = Self(hash_bytes(HashAlgorithm::Sha256, data.as_bytes()).value);
        debug!("Fingerprint for {}: {}", config.recipe, fingerprint.short());
        Ok(fingerprint)
    }

    /// Wrap an existing hex fingerprint
    pub fn from_hex(hex: &str) -> Result<Self> {
        if hex.len() != HashAlgorithm::Sha256.hex_len()
            || !hex.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(Error::ParseError(format!("Invalid fingerprint: {}", hex)));
        }
        Ok(Self(hex.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for logs
    pub fn short(&self) -> &str {
        &self.0[..12]
    }

    fn shard(&self) -> &str {
        &self.0[..2]
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = Error;

    fn try_from(hex: String) -> Result<Self> {
        Self::from_hex(&hex)
    }
}

impl From<Fingerprint> for String {
    fn from(fingerprint: Fingerprint) -> Self {
        fingerprint.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a published environment variable is applied by consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "value", rename_all = "lowercase")]
pub enum EnvValue {
    /// Replace any existing value
    Set(String),
    /// Append to a path-list variable
    Append(String),
}

/// An environment variable published by a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvBinding {
    pub name: String,
    pub value: EnvValue,
}

impl EnvBinding {
    pub fn set(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: EnvValue::Set(value.into()),
        }
    }

    pub fn append(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: EnvValue::Append(value.into()),
        }
    }

    /// Apply this binding to an environment map
    ///
    /// Appended entries are joined with the host path separator.
    pub fn apply_to(&self, env: &mut BTreeMap<String, String>) {
        match &self.value {
            EnvValue::Set(value) => {
                env.insert(self.name.clone(), value.clone());
            }
            EnvValue::Append(value) => {
                let separator = if cfg!(windows) { ";" } else { ":" };
                env.entry(self.name.clone())
                    .and_modify(|existing| {
                        if !existing.is_empty() {
                            existing.push_str(separator);
                        }
                        existing.push_str(value);
                    })
                    .or_insert_with(|| value.clone());
            }
        }
    }
}

/// Metadata of a published package
///
/// Written once by the publisher as `artifact.json`; never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageArtifact {
    pub fingerprint: Fingerprint,
    pub recipe: RecipeId,
    /// Final location of the package inside the registry
    pub package_dir: PathBuf,
    /// None when the recipe has no `shared` option
    pub linkage: Option<Linkage>,
    /// Libraries in link order
    pub libs: Vec<String>,
    pub lib_dirs: Vec<PathBuf>,
    pub include_dirs: Vec<PathBuf>,
    pub bin_dirs: Vec<PathBuf>,
    /// Preprocessor definitions consumers must set
    pub defines: Vec<String>,
    pub system_libs: Vec<String>,
    pub env: Vec<EnvBinding>,
    pub published_at: DateTime<Utc>,
}

impl PackageArtifact {
    /// Look up a published environment variable
    pub fn env_var(&self, name: &str) -> Option<&EnvValue> {
        self.env.iter().find(|b| b.name == name).map(|b| &b.value)
    }
}

/// A package directory being assembled
///
/// Removed on drop unless committed.
#[derive(Debug)]
pub struct StagedPackage {
    fingerprint: Fingerprint,
    dir: PathBuf,
    committed: bool,
}

impl StagedPackage {
    /// Directory to install into
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

impl Drop for StagedPackage {
    fn drop(&mut self) {
        if !self.committed && self.dir.exists() {
            debug!("Discarding staged package {}", self.dir.display());
            if let Err(e) = fs::remove_dir_all(&self.dir) {
                warn!("Failed to remove staging dir {}: {}", self.dir.display(), e);
            }
        }
    }
}

/// Exclusive lock on the registry, released on drop
struct RegistryLock {
    file: File,
}

impl RegistryLock {
    fn acquire(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        file.lock_exclusive().map_err(|e| {
            Error::IoError(format!("Failed to lock registry {}: {}", path.display(), e))
        })?;
        Ok(Self { file })
    }
}

impl Drop for RegistryLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Published package store
#[derive(Debug, Clone)]
pub struct Registry {
    root: PathBuf,
}

impl Registry {
    /// Open (creating if needed) a registry rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(STAGING_DIR)).map_err(|e| {
            Error::IoError(format!("Failed to create registry {}: {}", root.display(), e))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where a package with this fingerprint lives once published
    pub fn package_dir(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root.join(fingerprint.shard()).join(fingerprint.as_str())
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.package_dir(fingerprint).join(ARTIFACT_FILE).is_file()
    }

    /// Load a published package
    pub fn get(&self, fingerprint: &Fingerprint) -> Result<Option<PackageArtifact>> {
        let path = self.package_dir(fingerprint).join(ARTIFACT_FILE);
        if !path.is_file() {
            debug!("Registry miss: {}", fingerprint.short());
            return Ok(None);
        }
        let artifact = read_artifact(&path)?;
        debug!("Registry hit: {} ({})", fingerprint.short(), artifact.recipe);
        Ok(Some(artifact))
    }

    /// Create an empty staging directory for a package
    pub fn stage(&self, fingerprint: &Fingerprint) -> Result<StagedPackage> {
        let dir = self.root.join(STAGING_DIR).join(format!(
            "{}-{}",
            fingerprint.as_str(),
            uuid::Uuid::new_v4()
        ));
        fs::create_dir_all(&dir)?;
        Ok(StagedPackage {
            fingerprint: fingerprint.clone(),
            dir,
            committed: false,
        })
    }

    /// Write the artifact metadata and move the staged package into place
    ///
    /// An existing package with the same fingerprint is replaced.
    pub fn commit(
        &self,
        mut staged: StagedPackage,
        artifact: &PackageArtifact,
    ) -> Result<PackageArtifact> {
        if artifact.fingerprint != staged.fingerprint {
            return Err(Error::PackagingIncomplete {
                reason: format!(
                    "artifact fingerprint {} does not match staged package {}",
                    artifact.fingerprint.short(),
                    staged.fingerprint.short()
                ),
            });
        }

        let json = serde_json::to_string_pretty(artifact)
            .map_err(|e| Error::ParseError(format!("Failed to serialize artifact: {}", e)))?;
        fs::write(staged.dir.join(ARTIFACT_FILE), json)?;

        let target = self.package_dir(&artifact.fingerprint);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let _lock = RegistryLock::acquire(&self.root.join(LOCK_FILE))?;

        let aside = self.root.join(STAGING_DIR).join(format!(
            "{}-old-{}",
            artifact.fingerprint.as_str(),
            uuid::Uuid::new_v4()
        ));
        let replaced = replace_dir(&staged.dir, &target, &aside).map_err(|e| {
            Error::IoError(format!(
                "Failed to publish {} to {}: {}",
                artifact.recipe,
                target.display(),
                e
            ))
        })?;
        staged.committed = true;

        if replaced {
            info!("Replaced previous build of {}", artifact.recipe);
        }

        info!(
            "Published {} as {}",
            artifact.recipe,
            artifact.fingerprint.short()
        );
        Ok(artifact.clone())
    }

    /// All published packages, ordered by recipe identity
    pub fn list(&self) -> Result<Vec<PackageArtifact>> {
        let mut artifacts = Vec::new();

        for shard_entry in fs::read_dir(&self.root)? {
            let shard_entry = shard_entry?;
            let name = shard_entry.file_name();
            if !shard_entry.file_type()?.is_dir() || name.to_string_lossy().starts_with('.') {
                continue;
            }

            for package_entry in fs::read_dir(shard_entry.path())? {
                let path = package_entry?.path().join(ARTIFACT_FILE);
                if path.is_file() {
                    artifacts.push(read_artifact(&path)?);
                }
            }
        }

        artifacts.sort_by(|a, b| {
            a.recipe
                .cmp(&b.recipe)
                .then_with(|| a.fingerprint.cmp(&b.fingerprint))
        });
        Ok(artifacts)
    }

    /// Remove a published package, returning whether it existed
    pub fn remove(&self, fingerprint: &Fingerprint) -> Result<bool> {
        let dir = self.package_dir(fingerprint);
        if !dir.exists() {
            return Ok(false);
        }
        let _lock = RegistryLock::acquire(&self.root.join(LOCK_FILE))?;
        fs::remove_dir_all(&dir)?;
        if let Some(shard) = dir.parent() {
            // Only succeeds when the shard is empty
            let _ = fs::remove_dir(shard);
        }
        info!("Removed {} from registry", fingerprint.short());
        Ok(true)
    }

    /// Remove every published package, returning how many were removed
    pub fn clear(&self) -> Result<u64> {
        let fingerprints: Vec<Fingerprint> =
            self.list()?.into_iter().map(|a| a.fingerprint).collect();

        let mut removed = 0u64;
        for fingerprint in &fingerprints {
            if self.remove(fingerprint)? {
                removed += 1;
            }
        }

        info!("Cleared {} registry entries", removed);
        Ok(removed)
    }
}

/// Move `src` to `target`, parking an existing `target` at `aside` meanwhile
///
/// If the move fails the parked directory is put back, so `target` is never
/// left missing. Returns whether a previous `target` was replaced.
fn replace_dir(src: &Path, target: &Path, aside: &Path) -> std::io::Result<bool> {
    let replaced = target.exists();
    if replaced {
        fs::rename(target, aside)?;
    }

    if let Err(e) = fs::rename(src, target) {
        if replaced && let Err(restore) = fs::rename(aside, target) {
            warn!(
                "Failed to restore {} from {}: {}",
                target.display(),
                aside.display(),
                restore
            );
        }
        return Err(e);
    }

    if replaced && let Err(e) = fs::remove_dir_all(aside) {
        warn!("Failed to remove replaced package {}: {}", aside.display(), e);
    }
    Ok(replaced)
}

fn read_artifact(path: &Path) -> Result<PackageArtifact> {
    let content = fs::read_to_string(path)
        .map_err(|e| Error::IoError(format!("Failed to read {}: {}", path.display(), e)))?;
    serde_json::from_str(&content)
        .map_err(|e| Error::ParseError(format!("Invalid artifact {}: {}", path.display(), e)))
}
