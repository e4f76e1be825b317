// src/recipe/graph.rs

//! Dependency resolution into a build plan
//!
//! Starting from a root requirement, the resolver walks the requirement
//! graph depth-first, picks one version per package, resolves every
//! package's options and returns a [`BuildPlan`] in which each node comes
//! after all of its dependencies.
//!
//! # Version selection
//!
//! Each package gets the highest available version that satisfies every
//! constraint collected for it so far. Constraints are only discovered while
//! walking, so a constraint found late may rule out a version picked
//! earlier; the walk then restarts from the root, keeping everything it has
//! learned. Each restart is caused by a constraint the previous walk did not
//! know about, so the loop ends.
//!
//! # Example
//!
//! ```ignore
//! use conary_kitchen::recipe::{GraphResolver, RecipeIndex, Requirement};
//!
//! let index = RecipeIndex::load_dir(Path::new("recipes"))?;
//! let plan = GraphResolver::new(&index, Platform::host())
//!     .resolve(&Requirement::parse("gstreamer >= 1.16")?)?;
//! for node in plan.nodes() {
//!     println!("{} {}", node.id(), node.fingerprint.short());
//! }
//! ```

use crate::error::{Error, Result};
use crate::hash::{HashAlgorithm, Hasher, hash_file};
use crate::platform::Platform;
use crate::recipe::format::{Recipe, RecipeId, Requirement};
use crate::recipe::index::RecipeIndex;
use crate::recipe::kitchen::patch::{PatchOrigin, collect_patches};
use crate::recipe::options::{OptionOverrides, ResolvedConfiguration, resolve_options};
use crate::recipe::registry::{Fingerprint, PackageArtifact, Registry};
use crate::version::{Version, VersionConstraint};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Requirer name used for the root requirement
const ROOT_REQUIRER: &str = "(root)";

/// One package of a build plan
#[derive(Debug, Clone)]
pub struct DependencyNode {
    pub recipe: Arc<Recipe>,
    pub config: ResolvedConfiguration,
    /// Direct dependencies: runtime requirements, then applicable build requirements
    pub requires: Vec<RecipeId>,
    /// Hash of the recipe and its local patches
    pub revision: String,
    pub fingerprint: Fingerprint,
    /// Already published with this fingerprint
    pub prebuilt: Option<PackageArtifact>,
}

impl DependencyNode {
    pub fn id(&self) -> &RecipeId {
        &self.config.recipe
    }

    pub fn is_prebuilt(&self) -> bool {
        self.prebuilt.is_some()
    }
}

/// Topologically ordered packages; the root requirement is last
#[derive(Debug, Clone, Default)]
pub struct BuildPlan {
    nodes: Vec<DependencyNode>,
}

impl BuildPlan {
    pub fn nodes(&self) -> &[DependencyNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The package the plan was resolved for
    pub fn root(&self) -> Option<&DependencyNode> {
        self.nodes.last()
    }

    pub fn get(&self, name: &str) -> Option<&DependencyNode> {
        self.nodes.iter().find(|n| n.id().name == name)
    }

    /// Nodes that are not yet in the registry
    pub fn to_build(&self) -> impl Iterator<Item = &DependencyNode> {
        self.nodes.iter().filter(|n| !n.is_prebuilt())
    }

    /// Identities in build order
    pub fn order(&self) -> Vec<RecipeId> {
        self.nodes.iter().map(|n| n.id().clone()).collect()
    }
}

/// Resolves requirements against a recipe index
pub struct GraphResolver<'a> {
    index: &'a RecipeIndex,
    platform: Platform,
    overrides: OptionOverrides,
    registry: Option<&'a Registry>,
    tool_check: Box<dyn Fn(&str) -> bool + 'a>,
}

impl<'a> GraphResolver<'a> {
    /// Create a resolver for a target platform
    ///
    /// Conditional build requirements search the PATH with `which` unless a
    /// different check is set.
    pub fn new(index: &'a RecipeIndex, platform: Platform) -> Self {
        Self {
            index,
            platform,
            overrides: OptionOverrides::default(),
            registry: None,
            tool_check: Box::new(|tool| which::which(tool).is_ok()),
        }
    }

    pub fn with_overrides(mut self, overrides: OptionOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Mark nodes already present in this registry as prebuilt
    pub fn with_registry(mut self, registry: &'a Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replace the tool-presence check
    pub fn with_tool_check(mut self, check: impl Fn(&str) -> bool + 'a) -> Self {
        self.tool_check = Box::new(check);
        self
    }

    /// Resolve a root requirement into a build plan
    pub fn resolve(&self, root: &Requirement) -> Result<BuildPlan> {
        let mut constraints = ConstraintSet::default();
        let mut attempt = 1u32;

        let walk = loop {
            let mut walk = Walk::new(root.name.clone());
            match self.visit(root, ROOT_REQUIRER, &mut walk, &mut constraints)? {
                Step::Done => break walk,
                Step::Restart(package) => {
                    debug!(
                        "Restarting resolution (attempt {}): new constraint on {}",
                        attempt, package
                    );
                    attempt += 1;
                }
            }
        };

        let plan = self.finish(walk)?;
        info!(
            "Resolved {} into {} packages ({} to build)",
            root,
            plan.len(),
            plan.to_build().count()
        );
        Ok(plan)
    }

    fn visit(
        &self,
        requirement: &Requirement,
        requirer: &str,
        walk: &mut Walk,
        constraints: &mut ConstraintSet,
    ) -> Result<Step> {
        let name = &requirement.name;

        if let Some(start) = walk.path.iter().position(|n| n == name) {
            let mut cycle = walk.path[start..].to_vec();
            cycle.push(name.clone());
            return Err(Error::CyclicDependency { cycle });
        }

        let is_new = constraints.record(name, requirer, &requirement.constraint);

        if let Some(selected) = walk.selected.get(name) {
            // Already placed in this walk
            if requirement.constraint.satisfies(&selected.version) {
                return Ok(Step::Done);
            }
            if !is_new {
                // Known constraint that the pick does not meet: nothing new to learn
                return Err(constraints.conflict(name));
            }
            return Ok(Step::Restart(name.clone()));
        }

        let version = self.select_version(requirement, requirer, constraints)?;
        let recipe = self.index.get(name, &version).ok_or_else(|| {
            Error::NotFound(format!("{}/{} vanished from the index", name, version))
        })?;
        let recipe_id = recipe.id();

        let is_root = walk.path.is_empty() && *name == walk.root;
        let config = resolve_options(
            &recipe,
            &self.overrides.for_package(name, is_root),
            &self.platform,
        )?;

        let children: Vec<Requirement> = recipe
            .requires
            .iter()
            .cloned()
            .chain(
                recipe
                    .build_requires
                    .iter()
                    .filter(|b| b.applies(self.platform.os, &*self.tool_check))
                    .map(|b| b.requirement.clone()),
            )
            .collect();

        walk.path.push(name.clone());
        let requirer_id = recipe_id.to_string();
        for child in &children {
            if let Step::Restart(package) = self.visit(child, &requirer_id, walk, constraints)? {
                return Ok(Step::Restart(package));
            }
        }
        walk.path.pop();

        let requires = children
            .iter()
            .filter_map(|child| walk.selected.get(&child.name))
            .map(|s| s.config.recipe.clone())
            .collect();

        walk.order.push(name.clone());
        walk.selected.insert(
            name.clone(),
            Selected {
                version,
                recipe,
                config,
                requires,
            },
        );
        Ok(Step::Done)
    }

    fn select_version(
        &self,
        requirement: &Requirement,
        requirer: &str,
        constraints: &ConstraintSet,
    ) -> Result<Version> {
        let name = &requirement.name;
        let unsatisfiable = || Error::UnsatisfiableVersion {
            package: name.clone(),
            constraint: requirement.constraint.to_string(),
            required_by: requirer.to_string(),
        };

        let versions = self.index.versions(name).ok_or_else(unsatisfiable)?;
        if !versions.keys().any(|v| requirement.constraint.satisfies(v)) {
            return Err(unsatisfiable());
        }

        versions
            .keys()
            .rev()
            .find(|v| constraints.satisfied_by(name, v))
            .cloned()
            .ok_or_else(|| constraints.conflict(name))
    }

    /// Compute fingerprints in build order and consult the registry
    fn finish(&self, walk: Walk) -> Result<BuildPlan> {
        let mut selected = walk.selected;
        let mut fingerprints: HashMap<String, Fingerprint> = HashMap::new();
        let mut nodes = Vec::with_capacity(walk.order.len());

        for name in walk.order {
            let Some(Selected {
                recipe,
                config,
                requires,
                ..
            }) = selected.remove(&name)
            else {
                continue;
            };

            let deps: Vec<Fingerprint> = requires
                .iter()
                .filter_map(|id| fingerprints.get(&id.name).cloned())
                .collect();
            let revision = recipe_revision(&recipe)?;
            let fingerprint = Fingerprint::compute(&revision, &config, &deps)?;

            let prebuilt = match self.registry {
                Some(registry) => registry.get(&fingerprint)?,
                None => None,
            };
            if prebuilt.is_some() {
                debug!("{} already published as {}", config.recipe, fingerprint.short());
            }

            fingerprints.insert(name, fingerprint.clone());
            nodes.push(DependencyNode {
                recipe,
                config,
                requires,
                revision,
                fingerprint,
                prebuilt,
            });
        }

        Ok(BuildPlan { nodes })
    }
}

/// Hash of a recipe's content and the content of its local patches
pub fn recipe_revision(recipe: &Recipe) -> Result<String> {
    let json = serde_json::to_string(recipe)
        .map_err(|e| Error::ParseError(format!("Failed to serialize recipe: {}", e)))?;

    let mut hasher = Hasher::new(HashAlgorithm::Sha256);
    hasher.update(json.as_bytes());

    if recipe.patches.is_some() {
        for patch in collect_patches(recipe)? {
            if let PatchOrigin::Local(path) = &patch.origin {
                let content = hash_file(HashAlgorithm::Sha256, path)?;
                hasher.update(format!("\npatch:{}:{}", patch.name, content).as_bytes());
            }
        }
    }

    Ok(hasher.finalize().value)
}

enum Step {
    Done,
    /// Restart from the root; names the package that gained a constraint
    Restart(String),
}

struct Selected {
    version: Version,
    recipe: Arc<Recipe>,
    config: ResolvedConfiguration,
    requires: Vec<RecipeId>,
}

/// State of one depth-first walk
struct Walk {
    root: String,
    /// Packages currently being visited, outermost first
    path: Vec<String>,
    selected: BTreeMap<String, Selected>,
    /// Post-order: dependencies before dependents
    order: Vec<String>,
}

impl Walk {
    fn new(root: String) -> Self {
        Self {
            root,
            path: Vec::new(),
            selected: BTreeMap::new(),
            order: Vec::new(),
        }
    }
}

/// Constraints per package, kept across restarts
#[derive(Default)]
struct ConstraintSet {
    by_package: BTreeMap<String, Vec<(String, VersionConstraint)>>,
    seen: HashSet<(String, String, String)>,
}

impl ConstraintSet {
    /// Record a constraint, returning whether it was new
    fn record(&mut self, package: &str, requirer: &str, constraint: &VersionConstraint) -> bool {
        let key = (
            package.to_string(),
            requirer.to_string(),
            constraint.to_string(),
        );
        if !self.seen.insert(key) {
            return false;
        }
        self.by_package
            .entry(package.to_string())
            .or_default()
            .push((requirer.to_string(), constraint.clone()));
        true
    }

    fn satisfied_by(&self, package: &str, version: &Version) -> bool {
        self.by_package
            .get(package)
            .is_none_or(|all| all.iter().all(|(_, c)| c.satisfies(version)))
    }

    fn conflict(&self, package: &str) -> Error {
        Error::VersionConflict {
            package: package.to_string(),
            constraints: self
                .by_package
                .get(package)
                .map(|all| {
                    all.iter()
                        .map(|(requirer, c)| (requirer.clone(), c.to_string()))
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Os;
    use crate::recipe::parser::parse_recipe;

    fn recipe(name: &str, version: &str, requires: &[&str], extra: &str) -> Recipe {
        let requires: Vec<String> = requires.iter().map(|r| format!("\"{}\"", r)).collect();
        parse_recipe(&format!(
            r#"
requires = [{requires}]

[package]
name = "{name}"
version = "{version}"

[source]
archive = "https://example.org/{name}-{version}.tar.gz"
checksum = "sha256:57dbb3df5781840ca45da6b011deda824e025b22684b5218f167d3a9f721cf3e"

[options.shared]
values = ["true", "false"]
default = "true"
{extra}
"#,
            requires = requires.join(", ")
        ))
        .unwrap()
    }

    fn index(recipes: Vec<Recipe>) -> RecipeIndex {
        let mut index = RecipeIndex::new();
        for r in recipes {
            index.insert(r).unwrap();
        }
        index
    }

    fn linux() -> Platform {
        let mut platform = Platform::host();
        platform.os = Os::Linux;
        platform
    }

    fn req(s: &str) -> Requirement {
        Requirement::parse(s).unwrap()
    }

    fn names(plan: &BuildPlan) -> Vec<String> {
        plan.order().into_iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn test_dependencies_precede_dependents() {
        let index = index(vec![
            recipe("zlib", "1.2.11", &[], ""),
            recipe("glib", "2.66.0", &["zlib"], ""),
            recipe("gstreamer", "1.16.0", &["glib >= 2.66.0"], ""),
        ]);

        let plan = GraphResolver::new(&index, linux())
            .resolve(&req("gstreamer"))
            .unwrap();

        assert_eq!(names(&plan), vec!["zlib/1.2.11", "glib/2.66.0", "gstreamer/1.16.0"]);
        assert_eq!(plan.root().unwrap().id().name, "gstreamer");
        assert_eq!(plan.get("glib").unwrap().requires[0].name, "zlib");
        assert_eq!(plan.to_build().count(), 3);
    }

    #[test]
    fn test_highest_compatible_version() {
        let index = index(vec![
            recipe("glib", "2.64.6", &[], ""),
            recipe("glib", "2.66.0", &[], ""),
            recipe("glib", "2.70.0", &[], ""),
            recipe("app", "1.0", &["glib >= 2.64, < 2.70"], ""),
        ]);

        let plan = GraphResolver::new(&index, linux()).resolve(&req("app")).unwrap();
        assert_eq!(plan.get("glib").unwrap().id().version.to_string(), "2.66.0");
    }

    #[test]
    fn test_late_constraint_restarts_walk() {
        // a picks glib 2.70, then b restricts glib below 2.70
        let index = index(vec![
            recipe("glib", "2.66.0", &[], ""),
            recipe("glib", "2.70.0", &[], ""),
            recipe("a", "1.0", &["glib >= 2.60"], ""),
            recipe("b", "1.0", &["glib < 2.70"], ""),
            recipe("app", "1.0", &["a", "b"], ""),
        ]);

        let plan = GraphResolver::new(&index, linux()).resolve(&req("app")).unwrap();
        assert_eq!(plan.get("glib").unwrap().id().version.to_string(), "2.66.0");
        assert_eq!(names(&plan), vec!["glib/2.66.0", "a/1.0", "b/1.0", "app/1.0"]);
    }

    #[test]
    fn test_version_conflict() {
        let index = index(vec![
            recipe("glib", "2.64.0", &[], ""),
            recipe("glib", "2.70.0", &[], ""),
            recipe("a", "1.0", &["glib >= 2.70"], ""),
            recipe("b", "1.0", &["glib < 2.70"], ""),
            recipe("app", "1.0", &["a", "b"], ""),
        ]);

        let err = GraphResolver::new(&index, linux()).resolve(&req("app")).unwrap_err();
        match err {
            Error::VersionConflict { package, constraints } => {
                assert_eq!(package, "glib");
                assert!(constraints.iter().any(|(r, _)| r == "a/1.0"));
                assert!(constraints.iter().any(|(r, _)| r == "b/1.0"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unsatisfiable_version() {
        let index = index(vec![
            recipe("glib", "2.64.0", &[], ""),
            recipe("app", "1.0", &["glib >= 2.66"], ""),
        ]);

        let err = GraphResolver::new(&index, linux()).resolve(&req("app")).unwrap_err();
        assert!(matches!(
            err,
            Error::UnsatisfiableVersion { package, required_by, .. }
                if package == "glib" && required_by == "app/1.0"
        ));

        // Missing from the index entirely
        let err = GraphResolver::new(&index, linux()).resolve(&req("nope")).unwrap_err();
        assert!(matches!(err, Error::UnsatisfiableVersion { .. }));
    }

    #[test]
    fn test_cycle_reports_path() {
        let index = index(vec![
            recipe("a", "1.0", &["b"], ""),
            recipe("b", "1.0", &["c"], ""),
            recipe("c", "1.0", &["a"], ""),
        ]);

        let err = GraphResolver::new(&index, linux()).resolve(&req("a")).unwrap_err();
        match err {
            Error::CyclicDependency { cycle } => assert_eq!(cycle, vec!["a", "b", "c", "a"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_conditional_build_requirements() {
        let extra = r#"
[[build_requires]]
requirement = "pkgconf"
unless_tool = "pkg-config"
always_on = ["windows"]
"#;
        let index = index(vec![
            recipe("pkgconf", "1.7.3", &[], ""),
            recipe("app", "1.0", &[], extra),
        ]);

        let with_tool = GraphResolver::new(&index, linux())
            .with_tool_check(|_| true)
            .resolve(&req("app"))
            .unwrap();
        assert_eq!(names(&with_tool), vec!["app/1.0"]);

        let without_tool = GraphResolver::new(&index, linux())
            .with_tool_check(|_| false)
            .resolve(&req("app"))
            .unwrap();
        assert_eq!(names(&without_tool), vec!["pkgconf/1.7.3", "app/1.0"]);

        let mut windows = linux();
        windows.os = Os::Windows;
        let on_windows = GraphResolver::new(&index, windows)
            .with_tool_check(|_| true)
            .resolve(&req("app"))
            .unwrap();
        assert!(on_windows.get("pkgconf").is_some());
    }

    #[test]
    fn test_overrides_and_fingerprints() {
        let index = index(vec![
            recipe("glib", "2.66.0", &[], ""),
            recipe("app", "1.0", &["glib"], ""),
        ]);

        let default = GraphResolver::new(&index, linux()).resolve(&req("app")).unwrap();
        let overridden = GraphResolver::new(&index, linux())
            .with_overrides(OptionOverrides::new().with("glib:shared", "false"))
            .resolve(&req("app"))
            .unwrap();

        assert_eq!(overridden.get("glib").unwrap().config.option("shared").unwrap(), "false");
        // Bare overrides only reach the root
        assert_eq!(overridden.get("app").unwrap().config.option("shared").unwrap(), "true");

        // A dependency change propagates to its dependents
        assert_ne!(
            default.get("glib").unwrap().fingerprint,
            overridden.get("glib").unwrap().fingerprint
        );
        assert_ne!(
            default.get("app").unwrap().fingerprint,
            overridden.get("app").unwrap().fingerprint
        );

        // Determinism
        let again = GraphResolver::new(&index, linux()).resolve(&req("app")).unwrap();
        assert_eq!(
            default.root().unwrap().fingerprint,
            again.root().unwrap().fingerprint
        );
    }

    #[test]
    fn test_invalid_override_fails_resolution() {
        let index = index(vec![recipe("app", "1.0", &[], "")]);
        let err = GraphResolver::new(&index, linux())
            .with_overrides(OptionOverrides::new().with("shared", "sometimes"))
            .resolve(&req("app"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOptionValue { .. }));
    }
}
