// src/recipe/kitchen/mod.rs

//! Kitchen: where recipes are cooked
//!
//! The Kitchen drives a resolved [`BuildPlan`] through the cooking
//! pipeline, one node at a time in dependency order:
//!
//! 1. **Fetch** the source archive (and remote patches) into the cache
//! 2. **Patch** a private copy of the source tree
//! 3. **Build** with the recipe's backend against the dependency artifacts
//! 4. **Publish** the install tree into the registry
//!
//! Nodes already in the registry are reused as-is. Every node is cooked in
//! a fresh work directory that is discarded afterwards, so a failed cook
//! leaves neither a contaminated source tree nor a partial package behind.

pub mod archive;
pub mod build;
mod config;
pub mod fetch;
pub mod patch;
pub mod pkgconfig;
pub mod publish;

pub use build::{
    BuildDirs, BuildInvoker, BuildPhase, CommandRunner, Invocation, StepOutput, ToolRunner,
};
pub use config::{KitchenConfig, Profile};
pub use fetch::{Downloader, FetchedSource, Fetcher, HttpDownloader};
pub use patch::{CommandPatcher, PatchOrigin, PatchSource, Patcher, PreparedPatch, UnifiedPatcher};
pub use publish::Publisher;

use crate::error::{CookPhase, Error, Result};
use crate::hash::Checksum;
use crate::progress::{ProgressTracker, SilentProgress};
use crate::recipe::format::{Recipe, Requirement};
use crate::recipe::graph::{BuildPlan, DependencyNode, GraphResolver};
use crate::recipe::index::RecipeIndex;
use crate::recipe::registry::{EnvBinding, EnvValue, PackageArtifact, Registry};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name of the build log written into each work directory
const BUILD_LOG: &str = "build.log";

/// Executable search path handed to build tools
const PATH: &str = "PATH";

/// One package of a finished cook
#[derive(Debug, Clone, PartialEq)]
pub struct CookedPackage {
    pub artifact: PackageArtifact,
    /// False when the artifact was already in the registry
    pub built: bool,
}

/// Outcome of cooking a plan, in build order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CookReport {
    pub packages: Vec<CookedPackage>,
}

impl CookReport {
    /// The package that was asked for
    pub fn root(&self) -> Option<&PackageArtifact> {
        self.packages.last().map(|p| &p.artifact)
    }

    pub fn artifact(&self, name: &str) -> Option<&PackageArtifact> {
        self.packages
            .iter()
            .map(|p| &p.artifact)
            .find(|a| a.recipe.name == name)
    }

    /// Packages built during this cook
    pub fn built(&self) -> impl Iterator<Item = &PackageArtifact> {
        self.packages.iter().filter(|p| p.built).map(|p| &p.artifact)
    }

    /// Packages taken from the registry
    pub fn reused(&self) -> impl Iterator<Item = &PackageArtifact> {
        self.packages.iter().filter(|p| !p.built).map(|p| &p.artifact)
    }
}

/// The Kitchen: where recipes are cooked
pub struct Kitchen {
    config: KitchenConfig,
    registry: Registry,
    downloader: Box<dyn Downloader>,
    patcher: Box<dyn Patcher>,
    runner: Box<dyn ToolRunner>,
    progress: Arc<dyn ProgressTracker>,
    tool_check: Box<dyn Fn(&str) -> bool + Send + Sync>,
}

impl Kitchen {
    /// Create a Kitchen with the production collaborators
    pub fn new(config: KitchenConfig) -> Result<Self> {
        let registry = Registry::open(&config.registry)?;
        Ok(Self {
            config,
            registry,
            downloader: Box::new(HttpDownloader::new()?),
            patcher: Box::new(UnifiedPatcher::new()),
            runner: Box::new(CommandRunner),
            progress: Arc::new(SilentProgress::new()),
            tool_check: Box::new(|tool| which::which(tool).is_ok()),
        })
    }

    /// Create a Kitchen with default configuration
    pub fn with_defaults() -> Result<Self> {
        Self::new(KitchenConfig::default())
    }

    pub fn with_downloader(mut self, downloader: impl Downloader + 'static) -> Self {
        self.downloader = Box::new(downloader);
        self
    }

    pub fn with_patcher(mut self, patcher: impl Patcher + 'static) -> Self {
        self.patcher = Box::new(patcher);
        self
    }

    pub fn with_runner(mut self, runner: impl ToolRunner + 'static) -> Self {
        self.runner = Box::new(runner);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressTracker>) -> Self {
        self.progress = progress;
        self
    }

    /// Replace the check deciding whether a conditional build tool is installed
    pub fn with_tool_check(mut self, check: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.tool_check = Box::new(check);
        self
    }

    pub fn config(&self) -> &KitchenConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Resolve a requirement into a build plan without fetching or building
    pub fn plan(
        &self,
        index: &RecipeIndex,
        root: &Requirement,
        profile: &Profile,
    ) -> Result<BuildPlan> {
        GraphResolver::new(index, profile.platform.clone())
            .with_overrides(profile.overrides.clone())
            .with_registry(&self.registry)
            .with_tool_check(|tool| (self.tool_check)(tool))
            .resolve(root)
    }

    /// Resolve and cook a requirement with all its dependencies
    pub fn cook(
        &self,
        index: &RecipeIndex,
        root: &Requirement,
        profile: &Profile,
    ) -> Result<CookReport> {
        let plan = self.plan(index, root, profile)?;
        self.cook_plan(&plan)
    }

    /// Cook every node of a plan that is not yet in the registry
    pub fn cook_plan(&self, plan: &BuildPlan) -> Result<CookReport> {
        self.progress.set_length(plan.len() as u64);
        let mut artifacts: BTreeMap<String, PackageArtifact> = BTreeMap::new();
        let mut report = CookReport::default();

        for node in plan.nodes() {
            let id = node.id().to_string();

            let (artifact, built) = match &node.prebuilt {
                Some(prebuilt) => {
                    info!("Reusing {} ({})", id, node.fingerprint.short());
                    (prebuilt.clone(), false)
                }
                None => {
                    self.progress.set_message(&format!("cooking {}", id));
                    match self.cook_node(plan, node, &artifacts) {
                        Ok(artifact) => (artifact, true),
                        Err(e) => {
                            self.progress.abandon(&format!("{} failed", id));
                            return Err(e);
                        }
                    }
                }
            };

            self.progress.increment(1);
            artifacts.insert(node.id().name.clone(), artifact.clone());
            report.packages.push(CookedPackage { artifact, built });
        }

        let built = report.built().count();
        let reused = report.packages.len() - built;
        self.progress
            .finish_with_message(&format!("{} built, {} reused", built, reused));
        Ok(report)
    }

    /// Fetch a recipe's source archive and remote patches without building
    pub fn fetch(&self, recipe: &Recipe) -> Result<FetchedSource> {
        let id = recipe.id().to_string();
        let fetched = self
            .fetch_source(recipe)
            .map_err(|e| e.during(&id, CookPhase::Fetch))?;
        self.prepare_patches(recipe)
            .map_err(|e| e.during(&id, CookPhase::Fetch))?;
        Ok(fetched)
    }

    fn fetcher(&self) -> Fetcher<'_> {
        Fetcher::new(&self.config.source_cache, self.downloader.as_ref())
    }

    fn fetch_source(&self, recipe: &Recipe) -> Result<FetchedSource> {
        let checksum = Checksum::parse(&recipe.source.checksum)?;
        self.fetcher().fetch_source(
            &recipe.archive_url(),
            &checksum,
            recipe.source.extract_dir.as_deref(),
        )
    }

    /// Local paths of all patches, downloading remote ones
    fn prepare_patches(&self, recipe: &Recipe) -> Result<Vec<PreparedPatch>> {
        let fetcher = self.fetcher();
        patch::collect_patches(recipe)?
            .into_iter()
            .map(|source| {
                let path = match source.origin {
                    PatchOrigin::Local(path) => path,
                    PatchOrigin::Remote { url, checksum } => fetcher.fetch_file(&url, &checksum)?,
                };
                Ok(PreparedPatch {
                    name: source.name,
                    path,
                    strip: source.strip,
                })
            })
            .collect()
    }

    fn cook_node(
        &self,
        plan: &BuildPlan,
        node: &DependencyNode,
        artifacts: &BTreeMap<String, PackageArtifact>,
    ) -> Result<PackageArtifact> {
        let id = node.id();
        info!("Cooking {} ({})", id, node.fingerprint.short());

        fs::create_dir_all(&self.config.work_dir)?;
        let work = tempfile::Builder::new()
            .prefix(&format!("{}-{}-", id.name, id.version))
            .tempdir_in(&self.config.work_dir)?;

        let result = self.cook_in(plan, node, artifacts, work.path());

        if self.config.keep_builddir {
            let kept = work.keep();
            info!("Keeping build directory {}", kept.display());
        } else if let Err(e) = work.close() {
            warn!("Failed to remove work directory: {}", e);
        }

        result
    }

    fn cook_in(
        &self,
        plan: &BuildPlan,
        node: &DependencyNode,
        artifacts: &BTreeMap<String, PackageArtifact>,
        work: &Path,
    ) -> Result<PackageArtifact> {
        let recipe = node.recipe.as_ref();
        let id = node.id().to_string();

        let (fetched, patches) = self
            .prep(recipe)
            .map_err(|e| e.during(&id, CookPhase::Fetch))?;

        let source_dir = work.join("src");
        self.patch_tree(&fetched, &patches, &source_dir)
            .map_err(|e| e.during(&id, CookPhase::Patch))?;

        let staged = self
            .registry
            .stage(&node.fingerprint)
            .map_err(|e| e.during(&id, CookPhase::Build))?;
        let deps = dependency_artifacts(plan, node, artifacts)
            .map_err(|e| e.during(&id, CookPhase::Build))?;
        let dirs = BuildDirs {
            source_dir: source_dir.clone(),
            build_dir: work.join("build"),
            install_dir: staged.dir().to_path_buf(),
        };
        self.simmer(node, &deps, &dirs, work)
            .map_err(|e| e.during(&id, CookPhase::Build))?;

        // A failed publish drops `staged`, which removes it
        Publisher::new(&self.registry)
            .publish(recipe, &node.config, staged, &source_dir)
            .map_err(|e| e.during(&id, CookPhase::Publish))
    }

    /// Fetch the source archive and make every patch available locally
    fn prep(&self, recipe: &Recipe) -> Result<(FetchedSource, Vec<PreparedPatch>)> {
        let fetched = self.fetch_source(recipe)?;
        let patches = self.prepare_patches(recipe)?;
        Ok((fetched, patches))
    }

    /// Copy the cached source tree and patch the copy
    fn patch_tree(
        &self,
        fetched: &FetchedSource,
        patches: &[PreparedPatch],
        source_dir: &Path,
    ) -> Result<()> {
        archive::copy_tree(&fetched.source_dir, source_dir)?;
        let applied = patch::apply_patches(
            self.patcher.as_ref(),
            patches,
            source_dir,
            self.progress.as_ref(),
        )?;
        debug!("Applied {} patches in {}", applied.len(), source_dir.display());
        Ok(())
    }

    /// Run the build against the dependency artifacts
    fn simmer(
        &self,
        node: &DependencyNode,
        deps: &[&PackageArtifact],
        dirs: &BuildDirs,
        work: &Path,
    ) -> Result<()> {
        let env = build_environment(deps, &work.join("pkgconfig"))?;
        let invoker = BuildInvoker::new(self.runner.as_ref(), self.config.jobs);
        let log = invoker.run(&node.recipe, &node.config, dirs, &env)?;
        fs::write(work.join(BUILD_LOG), log)?;
        Ok(())
    }
}

/// Artifacts of every transitive dependency of a node, dependencies first
fn dependency_artifacts<'a>(
    plan: &BuildPlan,
    node: &DependencyNode,
    artifacts: &'a BTreeMap<String, PackageArtifact>,
) -> Result<Vec<&'a PackageArtifact>> {
    let mut needed = BTreeSet::new();
    let mut stack: Vec<&str> = node.requires.iter().map(|r| r.name.as_str()).collect();
    while let Some(name) = stack.pop() {
        if !needed.insert(name.to_string()) {
            continue;
        }
        if let Some(dep) = plan.get(name) {
            stack.extend(dep.requires.iter().map(|r| r.name.as_str()));
        }
    }

    // Plan order keeps dependencies before their dependents
    plan.nodes()
        .iter()
        .filter(|n| needed.contains(&n.id().name))
        .map(|n| {
            artifacts.get(&n.id().name).ok_or_else(|| {
                Error::NotFound(format!("dependency {} has not been cooked", n.id()))
            })
        })
        .collect()
}

/// Environment for a build: dependency bindings, tool directories and staged
/// pkg-config files
///
/// Appended variables start from the value inherited from the host.
fn build_environment(
    deps: &[&PackageArtifact],
    pkgconfig_dir: &Path,
) -> Result<BTreeMap<String, String>> {
    let mut env = BTreeMap::new();
    for dep in deps {
        for binding in &dep.env {
            append_inherited(binding, &mut env);
        }
    }

    let staged = pkgconfig::stage_pkgconfig(deps, pkgconfig_dir)?;
    if !staged.is_empty() {
        let binding = EnvBinding::append(
            pkgconfig::PKG_CONFIG_PATH,
            pkgconfig_dir.to_string_lossy(),
        );
        append_inherited(&binding, &mut env);
    }

    // Dependency tools, build requirements included, shadow the host's
    let bin_dirs: Vec<PathBuf> = deps
        .iter()
        .flat_map(|dep| dep.bin_dirs.iter())
        .filter(|dir| dir.is_dir())
        .cloned()
        .collect();
    if !bin_dirs.is_empty() {
        let inherited = std::env::var_os(PATH).unwrap_or_default();
        let dirs = bin_dirs.into_iter().chain(std::env::split_paths(&inherited));
        let search = std::env::join_paths(dirs)
            .map_err(|e| Error::IoError(format!("Invalid {} entry: {}", PATH, e)))?;
        env.insert(PATH.to_string(), search.to_string_lossy().into_owned());
    }

    Ok(env)
}

/// Apply a binding, seeding appended variables from the host environment
fn append_inherited(binding: &EnvBinding, env: &mut BTreeMap<String, String>) {
    if matches!(binding.value, EnvValue::Append(_))
        && !env.contains_key(&binding.name)
        && let Ok(host) = std::env::var(&binding.name)
    {
        env.insert(binding.name.clone(), host);
    }
    binding.apply_to(env);
}
