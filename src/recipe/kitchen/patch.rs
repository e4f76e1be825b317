// src/recipe/kitchen/patch.rs

//! Patch collection and application
//!
//! Patches are applied strictly in order. Each patch is all-or-nothing:
//! [`UnifiedPatcher`] computes every file of a patch in memory and only
//! writes once all hunks have applied, and [`CommandPatcher`] runs a
//! `patch --dry-run` before touching the tree.

use crate::error::{Error, Result};
use crate::hash::Checksum;
use crate::progress::ProgressTracker;
use crate::recipe::format::Recipe;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Where a patch comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOrigin {
    /// File next to the recipe
    Local(PathBuf),
    /// Downloaded through the source cache
    Remote { url: String, checksum: Checksum },
}

/// A patch declared by a recipe, in application order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchSource {
    /// Display name, the file name of the patch
    pub name: String,
    pub origin: PatchOrigin,
    pub strip: u32,
}

/// A patch available on the local file system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedPatch {
    pub name: String,
    pub path: PathBuf,
    pub strip: u32,
}

/// List a recipe's patches in application order
///
/// Glob matches come first, sorted by path, followed by the explicit files.
pub fn collect_patches(recipe: &Recipe) -> Result<Vec<PatchSource>> {
    let Some(section) = &recipe.patches else {
        return Ok(Vec::new());
    };

    let mut patches = Vec::new();

    if let Some(pattern) = &section.glob {
        let dir = recipe.recipe_dir.as_deref().ok_or_else(|| {
            Error::NotFound(format!(
                "{}: patch glob '{}' needs a recipe directory",
                recipe.id(),
                pattern
            ))
        })?;
        let full = format!(
            "{}/{}",
            glob::Pattern::escape(&dir.to_string_lossy()),
            pattern
        );
        let mut matches: Vec<PathBuf> = glob::glob(&full)
            .map_err(|e| Error::ParseError(format!("Invalid patch glob '{}': {}", pattern, e)))?
            .filter_map(|entry| entry.ok())
            .filter(|path| path.is_file())
            .collect();
        matches.sort();

        for path in matches {
            patches.push(PatchSource {
                name: file_name(&path.to_string_lossy()),
                origin: PatchOrigin::Local(path),
                strip: 1,
            });
        }
    }

    for info in &section.files {
        let origin = if info.is_remote() {
            let checksum = info.checksum.as_deref().ok_or_else(|| {
                Error::ParseError(format!("Remote patch {} has no checksum", info.file))
            })?;
            PatchOrigin::Remote {
                url: info.file.clone(),
                checksum: Checksum::parse(checksum)?,
            }
        } else {
            let dir = recipe.recipe_dir.as_deref().ok_or_else(|| {
                Error::NotFound(format!(
                    "{}: patch '{}' needs a recipe directory",
                    recipe.id(),
                    info.file
                ))
            })?;
            PatchOrigin::Local(dir.join(&info.file))
        };

        patches.push(PatchSource {
            name: file_name(&info.file),
            origin,
            strip: info.strip,
        });
    }

    Ok(patches)
}

fn file_name(path: &str) -> String {
    path.rsplit(['/', '\\']).next().unwrap_or(path).to_string()
}

/// Applies a single patch file to a source tree
pub trait Patcher: Send + Sync {
    /// Apply `patch` with `strip` leading path components removed
    ///
    /// The tree must be left untouched when the patch does not apply.
    fn apply(&self, patch: &Path, strip: u32, source_dir: &Path) -> Result<()>;
}

/// Apply patches in order, stopping at the first failure
///
/// Returns the names of the applied patches.
pub fn apply_patches(
    patcher: &dyn Patcher,
    patches: &[PreparedPatch],
    source_dir: &Path,
    progress: &dyn ProgressTracker,
) -> Result<Vec<String>> {
    let mut applied = Vec::new();

    for patch in patches {
        progress.set_message(&format!("applying patch \"{}\"", patch.name));
        info!("Applying patch {}", patch.name);

        if let Err(e) = patcher.apply(&patch.path, patch.strip, source_dir) {
            return Err(Error::PatchApplicationFailed {
                patch: patch.name.clone(),
                applied,
                reason: failure_reason(e),
            });
        }
        applied.push(patch.name.clone());
    }

    Ok(applied)
}

fn failure_reason(err: Error) -> String {
    match err {
        Error::ParseError(msg) | Error::IoError(msg) | Error::NotFound(msg) => msg,
        other => other.to_string(),
    }
}

/// In-process unified diff applier backed by `diffy`
#[derive(Debug, Clone, Copy, Default)]
pub struct UnifiedPatcher;

impl UnifiedPatcher {
    pub fn new() -> Self {
        Self
    }
}

impl Patcher for UnifiedPatcher {
    fn apply(&self, patch: &Path, strip: u32, source_dir: &Path) -> Result<()> {
        let text = fs::read_to_string(patch)
            .map_err(|e| Error::IoError(format!("Failed to read {}: {}", patch.display(), e)))?;

        let files = split_unified_diff(&text)?;
        if files.is_empty() {
            return Err(Error::ParseError(format!(
                "{} contains no file changes",
                patch.display()
            )));
        }

        // Compute every result before writing anything
        let mut results: Vec<(PathBuf, Option<String>)> = Vec::with_capacity(files.len());
        for file in &files {
            let old = file.old.as_deref().map(|p| strip_path(p, strip)).transpose()?;
            let new = file.new.as_deref().map(|p| strip_path(p, strip)).transpose()?;
            let target = new.clone().or_else(|| old.clone()).ok_or_else(|| {
                Error::ParseError("file header names /dev/null on both sides".to_string())
            })?;
            let target_path = source_dir.join(&target);

            let base = match &old {
                None => {
                    if target_path.exists() {
                        return Err(Error::ParseError(format!(
                            "{} already exists",
                            target.display()
                        )));
                    }
                    String::new()
                }
                Some(old) => pending_content(&results, &source_dir.join(old))?,
            };

            let parsed = diffy::Patch::from_str(&file.body).map_err(|e| {
                Error::ParseError(format!("Malformed hunk for {}: {}", target.display(), e))
            })?;
            let patched = diffy::apply(&base, &parsed).map_err(|e| {
                Error::ParseError(format!("Hunk failed for {}: {}", target.display(), e))
            })?;

            if let (Some(old), Some(new)) = (&old, &new)
                && old != new
            {
                results.push((source_dir.join(old), None));
            }
            let content = if new.is_some() { Some(patched) } else { None };
            results.retain(|(path, _)| *path != target_path);
            results.push((target_path, content));
        }

        for (path, content) in results {
            match content {
                Some(content) => {
                    if let Some(parent) = path.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::write(&path, content)?;
                }
                None => {
                    if path.exists() {
                        fs::remove_file(&path)?;
                    }
                }
            }
        }

        debug!("Applied {} ({} files)", patch.display(), files.len());
        Ok(())
    }
}

/// Current content of a file, including changes staged earlier in the same patch
fn pending_content(results: &[(PathBuf, Option<String>)], path: &Path) -> Result<String> {
    if let Some((_, staged)) = results.iter().rev().find(|(p, _)| p == path) {
        return staged
            .clone()
            .ok_or_else(|| {
                Error::NotFound(format!("{} was deleted earlier in the patch", path.display()))
            });
    }
    fs::read_to_string(path)
        .map_err(|e| Error::NotFound(format!("{}: {}", path.display(), e)))
}

/// Remove `strip` leading components; `/dev/null` is not a path
fn strip_path(raw: &str, strip: u32) -> Result<PathBuf> {
    let path = Path::new(raw);
    let mut components = path.components().filter(|c| matches!(c, Component::Normal(_)));
    for _ in 0..strip {
        components.next();
    }
    let stripped: PathBuf = components.collect();

    if stripped.as_os_str().is_empty() {
        return Err(Error::ParseError(format!(
            "path '{}' has fewer than {} components",
            raw,
            strip + 1
        )));
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(Error::ParseError(format!("path '{}' escapes the source tree", raw)));
    }
    Ok(stripped)
}

/// One file's worth of a multi-file diff
#[derive(Debug)]
struct FileDiff {
    /// `None` for `/dev/null`
    old: Option<String>,
    new: Option<String>,
    /// Normalized single-file diff for `diffy`
    body: String,
}

fn header_path(line: &str, prefix: &str) -> Option<String> {
    let rest = line.strip_prefix(prefix)?.trim_end_matches(['\n', '\r']);
    // Drop a trailing timestamp
    let path = rest.split('\t').next().unwrap_or(rest).trim();
    if path == "/dev/null" {
        None
    } else {
        Some(path.trim_matches('"').to_string())
    }
}

/// Old and new line counts from `@@ -a,b +c,d @@`
fn hunk_counts(line: &str) -> Result<(usize, usize)> {
    let malformed = || Error::ParseError(format!("Malformed hunk header: {}", line.trim_end()));
    let inner = line
        .strip_prefix("@@ ")
        .and_then(|rest| rest.split(" @@").next())
        .ok_or_else(malformed)?;
    let mut ranges = inner.split_whitespace();
    let count = |range: Option<&str>, sign: char| -> Result<usize> {
        let range = range.and_then(|r| r.strip_prefix(sign)).ok_or_else(malformed)?;
        match range.split_once(',') {
            Some((_, count)) => count.parse().map_err(|_| malformed()),
            None => Ok(1),
        }
    };
    Ok((count(ranges.next(), '-')?, count(ranges.next(), '+')?))
}

/// Split a (possibly multi-file) unified diff into per-file diffs
///
/// Hunk bodies are delimited by their line counts, so preamble lines such
/// as `diff --git` or `index` between files are skipped.
fn split_unified_diff(text: &str) -> Result<Vec<FileDiff>> {
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let mut files = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let is_header = lines[i].starts_with("--- ")
            && lines.get(i + 1).is_some_and(|l| l.starts_with("+++ "));
        if !is_header {
            i += 1;
            continue;
        }

        let old = header_path(lines[i], "--- ");
        let new = header_path(lines[i + 1], "+++ ");
        let mut body = format!(
            "--- {}\n+++ {}\n",
            old.as_deref().unwrap_or("/dev/null"),
            new.as_deref().unwrap_or("/dev/null")
        );
        i += 2;

        while i < lines.len() && lines[i].starts_with("@@ ") {
            let (mut old_left, mut new_left) = hunk_counts(lines[i])?;
            body.push_str(lines[i]);
            i += 1;

            while i < lines.len() && (old_left > 0 || new_left > 0) {
                let line = lines[i];
                match line.as_bytes().first() {
                    Some(b' ') => {
                        old_left = old_left.saturating_sub(1);
                        new_left = new_left.saturating_sub(1);
                        body.push_str(line);
                    }
                    Some(b'-') => {
                        old_left = old_left.saturating_sub(1);
                        body.push_str(line);
                    }
                    Some(b'+') => {
                        new_left = new_left.saturating_sub(1);
                        body.push_str(line);
                    }
                    Some(b'\\') => body.push_str(line),
                    // Editors strip the space off empty context lines
                    Some(b'\n') | Some(b'\r') => {
                        old_left = old_left.saturating_sub(1);
                        new_left = new_left.saturating_sub(1);
                        body.push(' ');
                        body.push_str(line);
                    }
                    _ => {
                        return Err(Error::ParseError(format!(
                            "Truncated hunk near: {}",
                            line.trim_end()
                        )));
                    }
                }
                i += 1;
            }
            if old_left > 0 || new_left > 0 {
                return Err(Error::ParseError("Patch ends inside a hunk".to_string()));
            }
            if i < lines.len() && lines[i].starts_with('\\') {
                body.push_str(lines[i]);
                i += 1;
            }
        }

        files.push(FileDiff { old, new, body });
    }

    Ok(files)
}

/// Patcher that shells out to the system `patch` tool
#[derive(Debug, Clone)]
pub struct CommandPatcher {
    program: PathBuf,
}

impl CommandPatcher {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("patch"),
        }
    }

    /// Use a specific `patch` binary
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, patch: &Path, strip: u32, source_dir: &Path, dry_run: bool) -> Result<()> {
        let mut command = Command::new(&self.program);
        command
            .arg(format!("-p{}", strip))
            .arg("--forward")
            .arg("--batch")
            .arg("-i")
            .arg(patch)
            .current_dir(source_dir);
        if dry_run {
            command.arg("--dry-run");
        }

        let output = command.output().map_err(|e| {
            Error::IoError(format!("Failed to run {}: {}", self.program.display(), e))
        })?;

        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::ParseError(format!(
                "{}{}",
                stdout.trim(),
                if stderr.trim().is_empty() {
                    String::new()
                } else {
                    format!("\n{}", stderr.trim())
                }
            )));
        }
        Ok(())
    }
}

impl Default for CommandPatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Patcher for CommandPatcher {
    fn apply(&self, patch: &Path, strip: u32, source_dir: &Path) -> Result<()> {
        // `patch` runs inside the source tree, so relative paths must be resolved here
        let patch = fs::canonicalize(patch).map_err(|e| {
            Error::IoError(format!("Failed to open patch {}: {}", patch.display(), e))
        })?;
        self.run(&patch, strip, source_dir, true)?;
        self.run(&patch, strip, source_dir, false)
    }
}
