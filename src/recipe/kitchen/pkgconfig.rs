// src/recipe/kitchen/pkgconfig.rs

//! pkg-config staging for dependency artifacts
//!
//! Published `.pc` files carry the prefix they were installed under, which
//! is a staging directory that no longer exists. Before a build, each
//! dependency's `.pc` files are copied into one directory with `prefix=`
//! rewritten to the package's registry location.

use crate::error::{Error, Result};
use crate::recipe::registry::PackageArtifact;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable pointing pkg-config at the staged files
pub const PKG_CONFIG_PATH: &str = "PKG_CONFIG_PATH";

/// Copy every dependency's `.pc` files into `dest`, returning the files written
///
/// Files are taken from `lib/pkgconfig`, falling back to the package root.
pub fn stage_pkgconfig(deps: &[&PackageArtifact], dest: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dest)?;
    let mut written = Vec::new();

    for dep in deps {
        let lib_dir = dep.package_dir.join("lib").join("pkgconfig");
        let search = if lib_dir.is_dir() {
            lib_dir
        } else {
            dep.package_dir.clone()
        };
        if !search.is_dir() {
            continue;
        }

        let mut entries: Vec<PathBuf> = fs::read_dir(&search)
            .map_err(|e| Error::IoError(format!("Failed to read {}: {}", search.display(), e)))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "pc") && p.is_file())
            .collect();
        entries.sort();

        for pc in entries {
            let content = fs::read_to_string(&pc)
                .map_err(|e| Error::IoError(format!("Failed to read {}: {}", pc.display(), e)))?;
            let Some(name) = pc.file_name() else { continue };
            let target = dest.join(name);
            fs::write(&target, rewrite_prefix(&content, &dep.package_dir))?;
            debug!("Staged {} for {}", target.display(), dep.recipe);
            written.push(target);
        }
    }

    Ok(written)
}

/// Replace the value of the `prefix=` variable
fn rewrite_prefix(content: &str, prefix: &Path) -> String {
    let mut out = String::with_capacity(content.len());
    for line in content.split_inclusive('\n') {
        if line.trim_start().starts_with("prefix=") {
            out.push_str(&format!("prefix={}", prefix.display()));
            if line.ends_with('\n') {
                out.push('\n');
            }
        } else {
            out.push_str(line);
        }
    }
    out
}
