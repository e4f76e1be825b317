// src/recipe/mod.rs

//! Recipe system for building packages from source
//!
//! Recipes define how to build a package from source, including:
//! - Source archives and their checksums
//! - Patches to apply
//! - Options, requirements and build requirements
//! - Build backend and definitions
//! - What the package publishes to its consumers
//!
//! # Culinary Terminology
//!
//! Following Conary tradition, we use cooking metaphors:
//! - **Recipe**: The build specification (like a recipe card)
//! - **Cook**: Build a package from a recipe
//! - **Kitchen**: Where cooking happens
//! - **Ingredients**: Source archives and patches
//! - **Prep**: Fetch and prepare sources
//! - **Simmer**: The actual build process
//!
//! # Example Recipe
//!
//! ```toml
//! requires = ["glib >= 2.66.0"]
//!
//! [package]
//! name = "gstreamer"
//! version = "1.16.0"
//!
//! [source]
//! archive = "https://gstreamer.freedesktop.org/src/%(name)s/%(name)s-%(version)s.tar.xz"
//! checksum = "sha256:abc123..."
//!
//! [options.shared]
//! values = ["true", "false"]
//! default = "true"
//!
//! [build.option_definitions.shared]
//! define = "default_library"
//! map = { "true" = "shared", "false" = "static" }
//!
//! [publish]
//! libs = ["gstreamer-1.0"]
//! ```

mod format;
pub mod graph;
pub mod index;
pub mod kitchen;
pub mod options;
pub mod parser;
pub mod registry;

pub use format::{
    Backend, BuildRequirement, BuildSection, CompilerDefinitions, LegacyStaticNames,
    OptionDefinition, OptionSpec, PackageSection, PatchInfo, PatchSection, PublishEnv,
    PublishSection, Recipe, RecipeId, Requirement, ScannerEnv, SettingsSection, SourceSection,
};
pub use graph::{BuildPlan, DependencyNode, GraphResolver, recipe_revision};
pub use index::{RECIPE_FILE_NAME, RecipeIndex};
pub use kitchen::{CookReport, CookedPackage, Kitchen, KitchenConfig, Profile};
pub use options::{Linkage, OptionOverrides, ResolvedConfiguration, resolve_options};
pub use parser::{parse_recipe, parse_recipe_file, validate_recipe};
pub use registry::{EnvBinding, EnvValue, Fingerprint, PackageArtifact, Registry, StagedPackage};
