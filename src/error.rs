// src/error.rs

//! Error types for recipe cooking
//!
//! Every failure aborts the current cook. Errors raised while a single
//! recipe is being cooked are wrapped in [`Error::Cook`] so the caller can
//! see which recipe and which phase failed; [`Error::root_cause`] unwraps
//! that context for matching.

use crate::recipe::kitchen::build::BuildPhase;
use std::fmt;
use thiserror::Error;

/// Errors that can occur while resolving, fetching, building or publishing
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error from the standard library
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O error with context
    #[error("I/O error: {0}")]
    IoError(String),

    /// Malformed recipe, profile, checksum or metadata
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Source download failed
    #[error("Download error: {0}")]
    DownloadError(String),

    /// A file or recipe that should exist does not
    #[error("Not found: {0}")]
    NotFound(String),

    /// Downloaded content does not match the recipe checksum
    #[error("Checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    /// A patch did not apply cleanly; `applied` lists the patches already in the tree
    #[error("Patch {patch} failed to apply: {reason}")]
    PatchApplicationFailed {
        patch: String,
        applied: Vec<String>,
        reason: String,
    },

    /// Option override outside the allowed value set
    #[error("Invalid value '{value}' for option '{option}' (allowed: {})", .allowed.join(", "))]
    InvalidOptionValue {
        option: String,
        value: String,
        allowed: Vec<String>,
    },

    /// Option override for an option the recipe does not declare
    #[error("Recipe {package} has no option '{option}'")]
    UnknownOption { package: String, option: String },

    /// A build or publish step referenced an option without a concrete value
    #[error("Option '{option}' of {package} has no resolved value")]
    UnresolvedOption { package: String, option: String },

    /// The requirement graph contains a cycle
    #[error("Circular dependency: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    /// No available version matches a requirement
    #[error("No version of {package} satisfies '{constraint}' (required by {required_by})")]
    UnsatisfiableVersion {
        package: String,
        constraint: String,
        required_by: String,
    },

    /// Requirements on a package cannot all be met by a single version
    #[error("Conflicting requirements on {package}: {}", format_constraints(.constraints))]
    VersionConflict {
        package: String,
        constraints: Vec<(String, String)>,
    },

    /// A build phase exited with a non-success status
    #[error("{phase} phase failed with exit code {code:?}: {stderr}")]
    BuildStepFailed {
        phase: BuildPhase,
        code: Option<i32>,
        stderr: String,
    },

    /// The install tree does not contain what the recipe promises
    #[error("Packaging incomplete: {reason}")]
    PackagingIncomplete { reason: String },

    /// Failure while cooking a specific recipe
    #[error("{recipe}: {phase} failed: {source}")]
    Cook {
        recipe: String,
        phase: CookPhase,
        #[source]
        source: Box<Error>,
    },
}

fn format_constraints(constraints: &[(String, String)]) -> String {
    constraints
        .iter()
        .map(|(requirer, constraint)| format!("{} requires '{}'", requirer, constraint))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Stage of the cooking pipeline an error was raised in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookPhase {
    Fetch,
    Patch,
    Build,
    Publish,
}

impl fmt::Display for CookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CookPhase::Fetch => "fetch",
            CookPhase::Patch => "patch",
            CookPhase::Build => "build",
            CookPhase::Publish => "publish",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Attach recipe and phase context
    pub(crate) fn during(self, recipe: impl Into<String>, phase: CookPhase) -> Self {
        Error::Cook {
            recipe: recipe.into(),
            phase,
            source: Box::new(self),
        }
    }

    /// The innermost error, with any cook context stripped
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Cook { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Phase the error was raised in, if it carries cook context
    pub fn phase(&self) -> Option<CookPhase> {
        match self {
            Error::Cook { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

/// Result type for kitchen operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_unwraps_context() {
        let err = Error::PackagingIncomplete {
            reason: "missing libfoo".to_string(),
        }
        .during("foo/1.0", CookPhase::Publish);

        assert_eq!(err.phase(), Some(CookPhase::Publish));
        assert!(matches!(
            err.root_cause(),
            Error::PackagingIncomplete { .. }
        ));
        assert!(err.to_string().starts_with("foo/1.0: publish failed"));
    }

    #[test]
    fn test_display_lists_context() {
        let err = Error::CyclicDependency {
            cycle: vec!["a".to_string(), "b".to_string(), "a".to_string()],
        };
        assert_eq!(err.to_string(), "Circular dependency: a -> b -> a");

        let err = Error::InvalidOptionValue {
            option: "shared".to_string(),
            value: "maybe".to_string(),
            allowed: vec!["true".to_string(), "false".to_string()],
        };
        assert!(err.to_string().contains("allowed: true, false"));

        let err = Error::VersionConflict {
            package: "glib".to_string(),
            constraints: vec![
                ("a/1.0".to_string(), ">= 2.0".to_string()),
                ("b/1.0".to_string(), "< 2.0".to_string()),
            ],
        };
        assert!(err.to_string().contains("a/1.0 requires '>= 2.0'"));
    }
}
