// src/lib.rs

//! Conary Kitchen
//!
//! Recipe cooking engine: turns declarative build recipes into published,
//! dependency-annotated packages.
//!
//! # Architecture
//!
//! - Recipes: TOML files declaring source, patches, options, requirements
//!   and how the result is consumed
//! - Planning: requirements are resolved into an ordered build plan with
//!   every option concrete before anything is fetched
//! - Cooking: each plan node is fetched, patched, built and published in
//!   its own work directory
//! - Registry: packages are stored by fingerprint and published atomically,
//!   so unchanged configurations are never rebuilt

mod error;
pub mod hash;
pub mod platform;
pub mod progress;
pub mod recipe;
pub mod version;

pub use error::{CookPhase, Error, Result};
pub use hash::{Checksum, HashAlgorithm, Hasher};
pub use platform::{Arch, BuildType, Compiler, CompilerFamily, MsvcRuntime, Os, Platform};
pub use progress::{
    CallbackProgress, LogProgress, ProgressEvent, ProgressTracker, SilentProgress,
};
pub use recipe::{
    BuildPlan, CookReport, Kitchen, KitchenConfig, PackageArtifact, Profile, Recipe, RecipeIndex,
    Registry, Requirement,
};
pub use version::{Version, VersionConstraint};
