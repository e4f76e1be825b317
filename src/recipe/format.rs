// src/recipe/format.rs

//! Recipe file format definitions
//!
//! Recipes are TOML files that describe how to turn an upstream source
//! archive into a published package: where the source lives, which patches
//! to apply, which options the package exposes, what it requires, how the
//! build system is driven and what the package provides to its consumers.

use crate::error::{Error, Result};
use crate::platform::{Arch, CompilerFamily, Os};
use crate::version::{Version, VersionConstraint};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// A complete recipe for cooking a package
///
/// Recipes are immutable once loaded and shared between plan nodes as
/// `Arc<Recipe>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    /// Runtime requirements, e.g. `["glib >= 2.66.0"]`
    ///
    /// Top-level key, so it must appear before the first table.
    #[serde(default)]
    pub requires: Vec<Requirement>,

    /// Package metadata
    pub package: PackageSection,

    /// Source archive and checksum
    pub source: SourceSection,

    /// Settings that shape the configuration
    #[serde(default)]
    pub settings: SettingsSection,

    /// Declared options, keyed by option name
    #[serde(default)]
    pub options: BTreeMap<String, OptionSpec>,

    /// Tools needed to build but not to use the package
    #[serde(default)]
    pub build_requires: Vec<BuildRequirement>,

    /// Patches to apply (optional)
    #[serde(default)]
    pub patches: Option<PatchSection>,

    /// Build system invocation
    #[serde(default)]
    pub build: BuildSection,

    /// What the package exposes to consumers
    #[serde(default)]
    pub publish: PublishSection,

    /// Variables for substitution (optional)
    #[serde(default)]
    pub variables: BTreeMap<String, String>,

    /// Directory the recipe was loaded from, used to locate local patches
    #[serde(skip)]
    pub recipe_dir: Option<PathBuf>,
}

impl Recipe {
    /// Identity of this recipe
    pub fn id(&self) -> RecipeId {
        RecipeId::new(&self.package.name, self.package.version.clone())
    }

    /// Substitute variables in a string
    ///
    /// Replaces `%(name)s` patterns with their values from:
    /// 1. Built-in variables (name, version)
    /// 2. Custom variables from the [variables] section
    pub fn substitute(&self, template: &str) -> String {
        let mut result = template.to_string();

        result = result.replace("%(version)s", self.package.version.as_str());
        result = result.replace("%(name)s", &self.package.name);

        for (key, value) in &self.variables {
            result = result.replace(&format!("%({})s", key), value);
        }

        result
    }

    /// Get the archive URL with variables substituted
    pub fn archive_url(&self) -> String {
        self.substitute(&self.source.archive)
    }

    /// Get the archive filename from the URL
    pub fn archive_filename(&self) -> String {
        self.archive_url()
            .split('/')
            .next_back()
            .filter(|name| !name.is_empty())
            .unwrap_or("source.tar.gz")
            .to_string()
    }

    /// Whether the recipe only compiles C, so C++ settings do not apply
    pub fn is_pure_c(&self) -> bool {
        self.settings.pure_c
    }

    /// Look up a declared option
    pub fn option(&self, name: &str) -> Option<&OptionSpec> {
        self.options.get(name)
    }
}

/// Name and version of a recipe, displayed as `name/version`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecipeId {
    pub name: String,
    pub version: Version,
}

impl RecipeId {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for RecipeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}

/// Package metadata section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageSection {
    /// Package name
    pub name: String,

    /// Upstream version
    pub version: Version,

    /// Full description
    #[serde(default)]
    pub description: Option<String>,

    /// License identifier (SPDX)
    #[serde(default)]
    pub license: Option<String>,

    /// Homepage URL
    #[serde(default)]
    pub homepage: Option<String>,

    /// Search keywords
    #[serde(default)]
    pub topics: Vec<String>,
}

/// Source archive section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSection {
    /// Source archive URL
    ///
    /// Supports `%(name)s` and `%(version)s` substitution.
    /// Example: `https://example.org/%(name)s-%(version)s.tar.bz2`
    pub archive: String,

    /// Checksum for the archive (`sha256:...`)
    pub checksum: String,

    /// Directory name after extraction when the archive has no single top directory
    #[serde(default)]
    pub extract_dir: Option<String>,
}

/// Recipe-wide settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsSection {
    /// C-only package: the C++ library and standard settings are dropped
    #[serde(default)]
    pub pure_c: bool,
}

/// A declared option: allowed values, default and platform removals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionSpec {
    /// Allowed values, in declared order
    #[serde(deserialize_with = "deserialize_option_values")]
    pub values: Vec<String>,

    /// Value used when no override is given
    #[serde(default, deserialize_with = "deserialize_option_default")]
    pub default: Option<String>,

    /// Operating systems on which the option does not exist
    #[serde(default)]
    pub remove_on: Vec<Os>,
}

impl OptionSpec {
    /// Whether `value` is in the allowed set
    pub fn allows(&self, value: &str) -> bool {
        self.values.iter().any(|v| v == value)
    }

    /// Whether the option is removed on `os`
    pub fn removed_on(&self, os: Os) -> bool {
        self.remove_on.contains(&os)
    }
}

/// Option values may be written as strings, booleans or integers
#[derive(Deserialize)]
#[serde(untagged)]
enum OptionValue {
    Str(String),
    Bool(bool),
    Int(i64),
}

impl From<OptionValue> for String {
    fn from(value: OptionValue) -> Self {
        match value {
            OptionValue::Str(s) => s,
            OptionValue::Bool(b) => b.to_string(),
            OptionValue::Int(i) => i.to_string(),
        }
    }
}

fn deserialize_option_values<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<String>, D::Error> {
    let values = Vec::<OptionValue>::deserialize(deserializer)?;
    Ok(values.into_iter().map(String::from).collect())
}

fn deserialize_option_default<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
    let value = Option::<OptionValue>::deserialize(deserializer)?;
    Ok(value.map(String::from))
}

/// A requirement on another recipe: `glib >= 2.66.0`, `glib/2.66.0` or `glib`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub name: String,
    pub constraint: VersionConstraint,
}

impl Requirement {
    pub fn new(name: impl Into<String>, constraint: VersionConstraint) -> Self {
        Self {
            name: name.into(),
            constraint,
        }
    }

    /// Parse a requirement string
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();

        // Pinned reference form: name/version
        if let Some((name, version)) = s.split_once('/') {
            let name = name.trim();
            if name.is_empty() {
                return Err(Error::ParseError(format!("Missing package name in '{}'", s)));
            }
            return Ok(Self::new(
                name,
                VersionConstraint::Exact(Version::parse(version)?),
            ));
        }

        let split = s
            .find(|c: char| c.is_whitespace() || matches!(c, '<' | '>' | '=' | '!'))
            .unwrap_or(s.len());
        let (name, constraint) = s.split_at(split);
        if name.is_empty() {
            return Err(Error::ParseError(format!("Missing package name in '{}'", s)));
        }

        Ok(Self::new(name, VersionConstraint::parse(constraint)?))
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.constraint {
            VersionConstraint::Any => write!(f, "{}", self.name),
            constraint => write!(f, "{} {}", self.name, constraint),
        }
    }
}

impl FromStr for Requirement {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Requirement {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Requirement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Requirement::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// A tool recipe needed at build time, optionally conditional
///
/// Written either as a plain requirement string or as a table:
///
/// ```toml
/// [[build_requires]]
/// requirement = "pkgconf >= 1.7.3"
/// unless_tool = "pkg-config"
/// always_on = ["windows"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BuildRequirementRepr")]
pub struct BuildRequirement {
    pub requirement: Requirement,
    /// Skip when this executable is already on PATH
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unless_tool: Option<String>,
    /// Apply on these operating systems even when the tool is present
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub always_on: Vec<Os>,
}

impl BuildRequirement {
    /// Decide whether this requirement applies on `os`, given a tool check
    pub fn applies(&self, os: Os, tool_present: &dyn Fn(&str) -> bool) -> bool {
        if self.always_on.contains(&os) {
            return true;
        }
        match &self.unless_tool {
            Some(tool) => !tool_present(tool),
            None => true,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BuildRequirementRepr {
    Short(Requirement),
    Full {
        requirement: Requirement,
        #[serde(default)]
        unless_tool: Option<String>,
        #[serde(default)]
        always_on: Vec<Os>,
    },
}

impl From<BuildRequirementRepr> for BuildRequirement {
    fn from(repr: BuildRequirementRepr) -> Self {
        match repr {
            BuildRequirementRepr::Short(requirement) => Self {
                requirement,
                unless_tool: None,
                always_on: Vec::new(),
            },
            BuildRequirementRepr::Full {
                requirement,
                unless_tool,
                always_on,
            } => Self {
                requirement,
                unless_tool,
                always_on,
            },
        }
    }
}

/// Patch configuration section
///
/// Patches matched by `glob` (relative to the recipe directory, expanded in
/// sorted order) are applied first, then the explicit `files` in order.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PatchSection {
    /// Glob of local patch files, e.g. `patches/*.diff`
    #[serde(default)]
    pub glob: Option<String>,

    /// Explicit patches
    #[serde(default)]
    pub files: Vec<PatchInfo>,
}

/// Information about a single patch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchInfo {
    /// Patch file URL or path relative to the recipe directory
    pub file: String,

    /// Checksum, required for remote patches
    #[serde(default)]
    pub checksum: Option<String>,

    /// Strip level for patch (default: 1)
    #[serde(default = "default_strip")]
    pub strip: u32,
}

impl PatchInfo {
    pub fn is_remote(&self) -> bool {
        self.file.starts_with("http://") || self.file.starts_with("https://")
    }
}

fn default_strip() -> u32 {
    1
}

/// Build system that drives configure, build and install
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Meson,
    CMake,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Meson => write!(f, "meson"),
            Backend::CMake => write!(f, "cmake"),
        }
    }
}

/// Build instructions section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildSection {
    #[serde(default)]
    pub backend: Backend,

    /// Extra arguments passed to the configure step
    #[serde(default)]
    pub args: Vec<String>,

    /// Fixed build-system definitions
    #[serde(default)]
    pub definitions: BTreeMap<String, String>,

    /// Definitions derived from option values, keyed by option name
    #[serde(default)]
    pub option_definitions: BTreeMap<String, OptionDefinition>,

    /// Definitions selected by compiler family and version
    #[serde(default)]
    pub compiler_definitions: Vec<CompilerDefinitions>,

    /// Environment variables to set during build
    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    /// Source subdirectory holding the top-level build file
    #[serde(default)]
    pub subdir: Option<String>,
}

/// Maps an option's value onto a build definition
///
/// ```toml
/// [build.option_definitions.shared]
/// define = "default_library"
/// map = { "true" = "shared", "false" = "static" }
/// ```
///
/// Values missing from `map` are passed through unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionDefinition {
    pub define: String,
    #[serde(default)]
    pub map: BTreeMap<String, String>,
}

/// Definitions applied for one compiler family in a version range
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerDefinitions {
    pub family: CompilerFamily,

    /// Applies to versions strictly below this one
    #[serde(default)]
    pub below: Option<Version>,

    /// Applies to versions at or above this one
    #[serde(default)]
    pub at_least: Option<Version>,

    pub definitions: BTreeMap<String, String>,
}

impl CompilerDefinitions {
    /// Whether these definitions apply to a compiler
    pub fn matches(&self, family: CompilerFamily, version: &Version) -> bool {
        family == self.family
            && self.below.as_ref().is_none_or(|below| version < below)
            && self.at_least.as_ref().is_none_or(|min| version >= min)
    }
}

/// What a built package exposes to its consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishSection {
    /// Include directories relative to the package root
    pub include_dirs: Vec<String>,

    /// Library directories relative to the package root
    pub lib_dirs: Vec<String>,

    /// Executable directories relative to the package root
    pub bin_dirs: Vec<String>,

    /// Libraries in link order; each must be produced by the build
    pub libs: Vec<String>,

    /// Plugin directory relative to the package root
    pub plugin_dir: Option<String>,

    /// Plugin libraries linked directly into static builds
    pub plugin_libs: Vec<String>,

    /// Preprocessor definition marking static builds
    pub static_define: Option<String>,

    /// License files copied from the source tree into `licenses/`
    pub license_files: Vec<String>,

    /// System libraries per target OS
    pub system_libs: BTreeMap<Os, Vec<String>>,

    /// Environment variables published to consumers
    pub env: PublishEnv,

    /// Renaming of `lib<name>.a` archives for some compilers
    pub legacy_static_names: Option<LegacyStaticNames>,
}

impl Default for PublishSection {
    fn default() -> Self {
        Self {
            include_dirs: vec!["include".to_string()],
            lib_dirs: vec!["lib".to_string()],
            bin_dirs: vec!["bin".to_string()],
            libs: Vec::new(),
            plugin_dir: None,
            plugin_libs: Vec::new(),
            static_define: None,
            license_files: Vec::new(),
            system_libs: BTreeMap::new(),
            env: PublishEnv::default(),
            legacy_static_names: None,
        }
    }
}

impl PublishSection {
    /// Whether publishing needs to know the package linkage
    pub fn depends_on_linkage(&self) -> bool {
        self.plugin_dir.is_some() || self.static_define.is_some() || !self.plugin_libs.is_empty()
    }
}

/// Names of environment variables a package publishes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishEnv {
    /// Appendable plugin search path (shared builds only)
    pub plugin_path: Option<String>,

    /// Installation root
    pub root: Option<String>,

    /// Path to the plugin scanner executable
    pub plugin_scanner: Option<ScannerEnv>,

    /// Installation root per target architecture
    pub arch_roots: BTreeMap<Arch, String>,
}

/// Variable naming an executable inside the package
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerEnv {
    pub var: String,
    /// Path relative to the package root, without executable suffix
    pub path: String,
}

/// Compilers and directories subject to static archive renaming
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LegacyStaticNames {
    pub compilers: Vec<CompilerFamily>,
    pub dirs: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RECIPE: &str = r#"
requires = ["glib >= 2.66.0"]

[package]
name = "gstreamer"
version = "1.16.0"
license = "GPL-2.0-only"

[source]
archive = "https://example.org/%(name)s/-/archive/%(version)s/%(name)s-%(version)s.tar.bz2"
checksum = "sha256:57dbb3df5781840ca45da6b011deda824e025b22684b5218f167d3a9f721cf3e"

[settings]
pure_c = true

[options.shared]
values = [true, false]
default = true

[options.fPIC]
values = ["true", "false"]
default = "true"
remove_on = ["windows"]

[[build_requires]]
requirement = "meson >= 0.54.2"

[[build_requires]]
requirement = "pkgconf >= 1.7.3"
unless_tool = "pkg-config"
always_on = ["windows"]

[patches]
glob = "patches/*.diff"

[build]
backend = "meson"
args = ["--wrap-mode=nofallback"]

[build.definitions]
tools = "disabled"

[build.option_definitions.shared]
define = "default_library"
map = { "true" = "shared", "false" = "static" }

[[build.compiler_definitions]]
family = "Visual Studio"
below = "14"
definitions = { c_args = "-Dsnprintf=_snprintf" }

[publish]
include_dirs = ["include/gstreamer-1.0"]
libs = ["gstreamer-1.0", "gstbase-1.0"]
plugin_dir = "lib/gstreamer-1.0"

[publish.system_libs]
linux = ["dl"]
windows = ["ws2_32"]

[publish.env]
root = "GSTREAMER_ROOT"
arch_roots = { x86 = "GSTREAMER_ROOT_X86", x86_64 = "GSTREAMER_ROOT_X86_64" }
"#;

    #[test]
    fn test_parse_sample_recipe() {
        let recipe: Recipe = toml::from_str(SAMPLE_RECIPE).unwrap();

        assert_eq!(recipe.id().to_string(), "gstreamer/1.16.0");
        assert!(recipe.is_pure_c());
        assert_eq!(recipe.requires, vec![Requirement::parse("glib >= 2.66.0").unwrap()]);

        let shared = recipe.option("shared").unwrap();
        assert_eq!(shared.values, vec!["true", "false"]);
        assert_eq!(shared.default.as_deref(), Some("true"));
        assert!(recipe.option("fPIC").unwrap().removed_on(Os::Windows));

        assert_eq!(recipe.build.backend, Backend::Meson);
        assert_eq!(recipe.build.compiler_definitions[0].family, CompilerFamily::Msvc);
        assert_eq!(recipe.publish.system_libs[&Os::Linux], vec!["dl"]);
        assert_eq!(recipe.publish.env.arch_roots[&Arch::X86_64], "GSTREAMER_ROOT_X86_64");
        // Defaults survive a partial [publish] table
        assert_eq!(recipe.publish.lib_dirs, vec!["lib"]);
        assert!(recipe.publish.depends_on_linkage());
    }

    #[test]
    fn test_variable_substitution() {
        let recipe: Recipe = toml::from_str(SAMPLE_RECIPE).unwrap();

        assert_eq!(
            recipe.archive_url(),
            "https://example.org/gstreamer/-/archive/1.16.0/gstreamer-1.16.0.tar.bz2"
        );
        assert_eq!(recipe.archive_filename(), "gstreamer-1.16.0.tar.bz2");
    }

    #[test]
    fn test_requirement_forms() {
        let req = Requirement::parse("glib>=2.66").unwrap();
        assert_eq!(req.name, "glib");
        assert!(req.constraint.satisfies(&Version::parse("2.66.0").unwrap()));

        let req = Requirement::parse("glib/2.66.0").unwrap();
        assert_eq!(
            req.constraint,
            VersionConstraint::Exact(Version::parse("2.66.0").unwrap())
        );
        assert_eq!(req.to_string(), "glib = 2.66.0");

        let req = Requirement::parse("zlib").unwrap();
        assert_eq!(req.constraint, VersionConstraint::Any);
        assert_eq!(req.to_string(), "zlib");

        assert!(Requirement::parse(">= 1.0").is_err());
        assert!(Requirement::parse("/1.0").is_err());
    }

    #[test]
    fn test_build_requirement_conditions() {
        let recipe: Recipe = toml::from_str(SAMPLE_RECIPE).unwrap();
        let meson = &recipe.build_requires[0];
        let pkgconf = &recipe.build_requires[1];

        let has_tool = |_: &str| true;
        let no_tool = |_: &str| false;

        assert!(meson.applies(Os::Linux, &has_tool));
        assert!(!pkgconf.applies(Os::Linux, &has_tool));
        assert!(pkgconf.applies(Os::Linux, &no_tool));
        assert!(pkgconf.applies(Os::Windows, &has_tool));
    }

    #[test]
    fn test_build_requirement_short_form() {
        let recipe: Recipe = toml::from_str(
            r#"
build_requires = ["bison >= 3.5.3", "flex"]

[package]
name = "x"
version = "1.0"

[source]
archive = "https://example.org/x.tar.gz"
checksum = "sha256:57dbb3df5781840ca45da6b011deda824e025b22684b5218f167d3a9f721cf3e"
"#,
        )
        .unwrap();

        assert_eq!(recipe.build_requires.len(), 2);
        assert_eq!(recipe.build_requires[1].requirement.name, "flex");
        assert!(recipe.build_requires[1].unless_tool.is_none());
    }

    #[test]
    fn test_compiler_definitions_version_ordering() {
        let recipe: Recipe = toml::from_str(SAMPLE_RECIPE).unwrap();
        let defs = &recipe.build.compiler_definitions[0];

        assert!(defs.matches(CompilerFamily::Msvc, &Version::parse("12").unwrap()));
        assert!(!defs.matches(CompilerFamily::Msvc, &Version::parse("14").unwrap()));
        assert!(!defs.matches(CompilerFamily::Msvc, &Version::parse("15").unwrap()));
        assert!(!defs.matches(CompilerFamily::Gcc, &Version::parse("9").unwrap()));
    }
}
