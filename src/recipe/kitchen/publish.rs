// src/recipe/kitchen/publish.rs

//! Package publication
//!
//! Turns an install tree into a [`PackageArtifact`]: licenses are
//! collected, legacy static archive names are fixed, the declared libraries
//! are checked against what the build produced, and the consumer metadata
//! (link list, definitions, environment) is derived from the configuration.
//! The finished tree is committed to the registry atomically.

use crate::error::{Error, Result};
use crate::recipe::format::Recipe;
use crate::recipe::options::{Linkage, ResolvedConfiguration};
use crate::recipe::registry::{EnvBinding, Fingerprint, PackageArtifact, Registry, StagedPackage};
use chrono::Utc;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Directory license files are collected into
pub const LICENSES_DIR: &str = "licenses";

/// Library file suffixes, longest first so `.dll.a` wins over `.a`
const LIBRARY_SUFFIXES: &[&str] = &[".dll.a", ".dylib", ".lib", ".dll", ".so", ".a"];

/// Canonical library name of a file, or `None` if it is not a library
///
/// `libgstreamer-1.0.so.0.1600.0`, `libgstreamer-1.0.a` and
/// `gstreamer-1.0.lib` all map to `gstreamer-1.0`.
pub fn canonical_library_name(file_name: &str) -> Option<String> {
    let stem = strip_library_suffix(file_name)?;
    let name = match stem.strip_prefix("lib") {
        Some(rest) if !rest.is_empty() => rest,
        _ => stem,
    };
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn strip_library_suffix(file_name: &str) -> Option<&str> {
    // Versioned shared objects: libfoo.so.1.2.3
    if let Some(pos) = file_name.find(".so.") {
        let version = &file_name[pos + 4..];
        if !version.is_empty() && version.chars().all(|c| c.is_ascii_digit() || c == '.') {
            return Some(&file_name[..pos]);
        }
    }

    LIBRARY_SUFFIXES
        .iter()
        .find_map(|suffix| file_name.strip_suffix(suffix))
}

/// Canonical names of all libraries directly inside `dir`
pub fn find_libraries(dir: &Path) -> Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    if !dir.is_dir() {
        return Ok(names);
    }
    for entry in fs::read_dir(dir)
        .map_err(|e| Error::IoError(format!("Failed to read {}: {}", dir.display(), e)))?
    {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(name) = canonical_library_name(&entry.file_name().to_string_lossy()) {
            names.insert(name);
        }
    }
    Ok(names)
}

/// Rename `lib<name>.a` archives to `<name>.lib` inside `dir`
///
/// Returns the new paths. Running it again is a no-op, and an existing
/// `<name>.lib` is never overwritten.
pub fn fix_legacy_static_names(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut renamed = Vec::new();
    if !dir.is_dir() {
        return Ok(renamed);
    }

    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    entries.sort();

    for old in entries {
        let Some(file_name) = old.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let Some(name) = file_name
            .strip_prefix("lib")
            .and_then(|rest| rest.strip_suffix(".a"))
            .filter(|name| !name.is_empty() && !name.ends_with(".dll"))
        else {
            continue;
        };

        let new = dir.join(format!("{}.lib", name));
        if new.exists() {
            warn!(
                "Not renaming {}: {} already exists",
                old.display(),
                new.display()
            );
            continue;
        }
        info!("Renaming {} to {}.lib", file_name, name);
        fs::rename(&old, &new)?;
        renamed.push(new);
    }

    Ok(renamed)
}

/// Copy the declared license files from the source tree into `licenses/`
pub fn copy_licenses(recipe: &Recipe, source_dir: &Path, package_dir: &Path) -> Result<usize> {
    if recipe.publish.license_files.is_empty() {
        return Ok(0);
    }

    let dest = package_dir.join(LICENSES_DIR);
    fs::create_dir_all(&dest)?;

    let mut copied = 0;
    for license in &recipe.publish.license_files {
        let src = source_dir.join(license);
        if !src.is_file() {
            return Err(Error::PackagingIncomplete {
                reason: format!("license file {} not found in source tree", license),
            });
        }
        let name = Path::new(license)
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(license));
        fs::copy(&src, dest.join(name))?;
        copied += 1;
    }
    debug!("Copied {} license files for {}", copied, recipe.id());
    Ok(copied)
}

/// Linkage of the package, `None` for recipes without one
fn resolve_linkage(recipe: &Recipe, config: &ResolvedConfiguration) -> Result<Option<Linkage>> {
    let has_shared = recipe.option("shared").is_some() && !config.is_removed("shared");
    if has_shared || recipe.publish.depends_on_linkage() {
        Ok(Some(config.linkage()?))
    } else {
        Ok(None)
    }
}

/// Derive the consumer metadata for an install tree
///
/// `install_dir` is where the files are now; `package_dir` is where they
/// will live once committed, and is what the metadata points at.
pub fn describe_package(
    recipe: &Recipe,
    config: &ResolvedConfiguration,
    fingerprint: &Fingerprint,
    install_dir: &Path,
    package_dir: &Path,
) -> Result<PackageArtifact> {
    let publish = &recipe.publish;
    let platform = &config.platform;
    let linkage = resolve_linkage(recipe, config)?;

    if let Some(legacy) = &publish.legacy_static_names
        && legacy.compilers.contains(&platform.compiler.family)
    {
        for dir in &legacy.dirs {
            fix_legacy_static_names(&install_dir.join(dir))?;
        }
    }

    // Everything the build produced, across the declared library dirs
    let mut produced = BTreeSet::new();
    for dir in &publish.lib_dirs {
        produced.extend(find_libraries(&install_dir.join(dir))?);
    }
    let missing: Vec<&str> = publish
        .libs
        .iter()
        .filter(|lib| !produced.contains(lib.as_str()))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(Error::PackagingIncomplete {
            reason: format!(
                "{} did not produce {}",
                recipe.id(),
                missing.join(", ")
            ),
        });
    }

    let mut libs = publish.libs.clone();
    let mut lib_dirs: Vec<PathBuf> = publish.lib_dirs.iter().map(|d| package_dir.join(d)).collect();
    let mut defines = Vec::new();
    let mut env = Vec::new();

    match (linkage, &publish.plugin_dir) {
        (Some(Linkage::Shared), Some(plugin_dir)) => {
            if let Some(var) = &publish.env.plugin_path {
                env.push(EnvBinding::append(
                    var,
                    package_dir.join(plugin_dir).to_string_lossy(),
                ));
            }
        }
        (Some(Linkage::Static), plugin_dir) => {
            if let Some(plugin_dir) = plugin_dir {
                let plugins = find_libraries(&install_dir.join(plugin_dir))?;
                let missing: Vec<&str> = publish
                    .plugin_libs
                    .iter()
                    .filter(|lib| !plugins.contains(lib.as_str()))
                    .map(String::as_str)
                    .collect();
                if !missing.is_empty() {
                    return Err(Error::PackagingIncomplete {
                        reason: format!(
                            "{} did not produce plugins {}",
                            recipe.id(),
                            missing.join(", ")
                        ),
                    });
                }
                lib_dirs.push(package_dir.join(plugin_dir));
            }
            libs = publish.plugin_libs.iter().cloned().chain(libs).collect();
            if let Some(define) = &publish.static_define {
                defines.push(define.clone());
            }
        }
        (Some(Linkage::Shared), None) | (None, _) => {}
    }

    let root = package_dir.to_string_lossy().into_owned();
    if let Some(var) = &publish.env.root {
        env.push(EnvBinding::set(var, root.clone()));
    }
    if let Some(scanner) = &publish.env.plugin_scanner {
        let path = package_dir.join(format!("{}{}", scanner.path, platform.exe_suffix()));
        env.push(EnvBinding::set(&scanner.var, path.to_string_lossy()));
    }
    if let Some(var) = publish.env.arch_roots.get(&platform.arch) {
        env.push(EnvBinding::set(var, root));
    }

    Ok(PackageArtifact {
        fingerprint: fingerprint.clone(),
        recipe: recipe.id(),
        package_dir: package_dir.to_path_buf(),
        linkage,
        libs,
        lib_dirs,
        include_dirs: publish.include_dirs.iter().map(|d| package_dir.join(d)).collect(),
        bin_dirs: publish.bin_dirs.iter().map(|d| package_dir.join(d)).collect(),
        defines,
        system_libs: publish
            .system_libs
            .get(&platform.os)
            .cloned()
            .unwrap_or_default(),
        env,
        published_at: Utc::now(),
    })
}

/// Publishes install trees into a registry
pub struct Publisher<'a> {
    registry: &'a Registry,
}

impl<'a> Publisher<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Finish a staged install tree and commit it
    ///
    /// On error the staged tree is discarded and the registry is unchanged.
    pub fn publish(
        &self,
        recipe: &Recipe,
        config: &ResolvedConfiguration,
        staged: StagedPackage,
        source_dir: &Path,
    ) -> Result<PackageArtifact> {
        copy_licenses(recipe, source_dir, staged.dir())?;

        let package_dir = self.registry.package_dir(staged.fingerprint());
        let artifact = describe_package(
            recipe,
            config,
            staged.fingerprint(),
            staged.dir(),
            &package_dir,
        )?;

        self.registry.commit(staged, &artifact)
    }
}
