// src/recipe/kitchen/archive.rs

//! Source archive extraction and tree utilities for the Kitchen
//!
//! Extraction happens in-process: the archive is streamed through the
//! matching decoder into `tar`, which refuses entries that would escape
//! the destination directory.

use crate::error::{Error, Result};
use std::fmt;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Supported source archive formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
    TarBz2,
    TarXz,
    TarZst,
}

impl ArchiveFormat {
    /// Detect the format from a file name or URL
    ///
    /// Supports: .tar.gz, .tgz, .tar.bz2, .tbz2, .tar.xz, .txz, .tar.zst, .tar
    pub fn from_filename(name: &str) -> Option<Self> {
        // Ignore query strings on URLs
        let name = name.split(['?', '#']).next().unwrap_or(name);
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") {
            Some(Self::TarBz2)
        } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            Some(Self::TarXz)
        } else if name.ends_with(".tar.zst") || name.ends_with(".tzst") {
            Some(Self::TarZst)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }

    fn decoder<'a>(&self, file: File) -> Result<Box<dyn Read + 'a>> {
        Ok(match self {
            Self::Tar => Box::new(file),
            Self::TarGz => Box::new(flate2::read::GzDecoder::new(file)),
            Self::TarBz2 => Box::new(bzip2::read::BzDecoder::new(file)),
            Self::TarXz => Box::new(xz2::read::XzDecoder::new(file)),
            Self::TarZst => Box::new(zstd::Decoder::new(file).map_err(|e| {
                Error::IoError(format!("Failed to create zstd decoder: {}", e))
            })?),
        })
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Tar => "tar",
            Self::TarGz => "tar.gz",
            Self::TarBz2 => "tar.bz2",
            Self::TarXz => "tar.xz",
            Self::TarZst => "tar.zst",
        };
        f.write_str(name)
    }
}

/// Extract an archive into `dest`
///
/// `name` is the file name or URL the format is detected from, since cached
/// archives are stored under their checksum.
pub fn extract_archive(archive: &Path, name: &str, dest: &Path) -> Result<()> {
    let format = ArchiveFormat::from_filename(name)
        .ok_or_else(|| Error::ParseError(format!("Unknown archive format: {}", name)))?;

    fs::create_dir_all(dest)?;
    let file = File::open(archive)
        .map_err(|e| Error::IoError(format!("Failed to open {}: {}", archive.display(), e)))?;

    let mut tar = tar::Archive::new(format.decoder(file)?);
    tar.set_preserve_permissions(true);
    tar.unpack(dest).map_err(|e| {
        Error::IoError(format!(
            "Failed to extract {} archive {}: {}",
            format,
            name,
            e
        ))
    })?;

    debug!("Extracted {} into {}", name, dest.display());
    Ok(())
}

/// Locate the source root inside an extraction directory
///
/// Prefers `extract_dir` when given, otherwise the single top-level
/// directory, otherwise the extraction directory itself.
pub fn source_root(extracted: &Path, extract_dir: Option<&str>) -> Result<PathBuf> {
    if let Some(dir) = extract_dir {
        let root = extracted.join(dir);
        if !root.is_dir() {
            return Err(Error::NotFound(format!(
                "Extract directory '{}' not found in source archive",
                dir
            )));
        }
        return Ok(root);
    }

    let entries: Vec<_> = fs::read_dir(extracted)?
        .filter_map(|e| e.ok())
        .collect();

    if let [only] = entries.as_slice()
        && only.file_type().is_ok_and(|t| t.is_dir())
    {
        return Ok(only.path());
    }

    Ok(extracted.to_path_buf())
}

/// Recursively copy a directory tree, preserving symlinks
pub fn copy_tree(src: &Path, dest: &Path) -> Result<u64> {
    let mut copied = 0u64;

    for entry in WalkDir::new(src) {
        let entry = entry
            .map_err(|e| Error::IoError(format!("Failed to walk {}: {}", src.display(), e)))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::IoError(e.to_string()))?;
        let target = dest.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
            copied += 1;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target).map_err(|e| {
                Error::IoError(format!("Failed to copy {}: {}", entry.path().display(), e))
            })?;
            copied += 1;
        }
    }

    Ok(copied)
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> Result<()> {
    let destination = fs::read_link(link)?;
    std::os::unix::fs::symlink(destination, target)?;
    Ok(())
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> Result<()> {
    fs::copy(link, target)?;
    Ok(())
}
