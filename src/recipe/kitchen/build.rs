// src/recipe/kitchen/build.rs

//! Build invocation
//!
//! A resolved configuration is turned into a flat map of build-system
//! definitions, which then drives the three build phases through a
//! [`ToolRunner`]. Each phase must succeed before the next one starts.

use crate::error::{Error, Result};
use crate::platform::{CompilerFamily, MsvcRuntime};
use crate::recipe::format::{Backend, Recipe};
use crate::recipe::options::ResolvedConfiguration;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Build phases, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildPhase {
    Configure,
    Build,
    Install,
}

impl BuildPhase {
    pub const ALL: [BuildPhase; 3] = [Self::Configure, Self::Build, Self::Install];
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildPhase::Configure => "configure",
            BuildPhase::Build => "build",
            BuildPhase::Install => "install",
        };
        f.write_str(name)
    }
}

/// A single external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of running an invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutput {
    /// Exit code; `None` when terminated by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl StepOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs build tools
///
/// Errors are reserved for failing to start the tool; a non-zero exit is
/// reported through [`StepOutput::code`].
pub trait ToolRunner: Send + Sync {
    fn run(&self, phase: BuildPhase, invocation: &Invocation) -> Result<StepOutput>;
}

/// Runs tools as child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandRunner;

impl ToolRunner for CommandRunner {
    fn run(&self, phase: BuildPhase, invocation: &Invocation) -> Result<StepOutput> {
        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&invocation.cwd)
            .envs(&invocation.env)
            .output()
            .map_err(|e| {
                Error::IoError(format!(
                    "Failed to run {} phase ({}): {}",
                    phase, invocation.program, e
                ))
            })?;

        Ok(StepOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Compute the build-system definitions for a configuration
///
/// Later sources override earlier ones: fixed recipe definitions, then
/// build type and runtime, then option-derived, then compiler-specific.
pub fn build_definitions(
    recipe: &Recipe,
    config: &ResolvedConfiguration,
) -> Result<BTreeMap<String, String>> {
    let mut defs: BTreeMap<String, String> = recipe
        .build
        .definitions
        .iter()
        .map(|(k, v)| (k.clone(), recipe.substitute(v)))
        .collect();

    let platform = &config.platform;
    match recipe.build.backend {
        Backend::Meson => {
            defs.insert(
                "buildtype".to_string(),
                platform.build_type.meson_buildtype().to_string(),
            );
            if let Some(runtime) = msvc_runtime(config) {
                defs.insert("b_vscrt".to_string(), runtime.meson_vscrt().to_string());
            }
        }
        Backend::CMake => {
            defs.insert(
                "CMAKE_BUILD_TYPE".to_string(),
                platform.build_type.cmake_build_type().to_string(),
            );
            if let Some(runtime) = msvc_runtime(config) {
                defs.insert(
                    "CMAKE_MSVC_RUNTIME_LIBRARY".to_string(),
                    cmake_msvc_runtime(runtime).to_string(),
                );
            }
        }
    }

    for (option, definition) in &recipe.build.option_definitions {
        if config.is_removed(option) {
            continue;
        }
        let value = config.option(option)?;
        let mapped = definition
            .map
            .get(value)
            .cloned()
            .unwrap_or_else(|| value.to_string());
        defs.insert(definition.define.clone(), mapped);
    }

    let compiler = &platform.compiler;
    for selected in recipe
        .build
        .compiler_definitions
        .iter()
        .filter(|cd| cd.matches(compiler.family, &compiler.version))
    {
        for (key, value) in &selected.definitions {
            defs.insert(key.clone(), value.clone());
        }
    }

    Ok(defs)
}

fn msvc_runtime(config: &ResolvedConfiguration) -> Option<MsvcRuntime> {
    let compiler = &config.platform.compiler;
    match compiler.family {
        CompilerFamily::Msvc => compiler.runtime,
        CompilerFamily::Gcc | CompilerFamily::Clang | CompilerFamily::AppleClang => None,
    }
}

fn cmake_msvc_runtime(runtime: MsvcRuntime) -> &'static str {
    match runtime {
        MsvcRuntime::MultiThreadedDll => "MultiThreadedDLL",
        MsvcRuntime::MultiThreaded => "MultiThreaded",
        MsvcRuntime::MultiThreadedDllDebug => "MultiThreadedDebugDLL",
        MsvcRuntime::MultiThreadedDebug => "MultiThreadedDebug",
    }
}

/// Directories a build works in
#[derive(Debug, Clone)]
pub struct BuildDirs {
    /// Patched source tree
    pub source_dir: PathBuf,
    /// Out-of-tree build directory
    pub build_dir: PathBuf,
    /// Install prefix
    pub install_dir: PathBuf,
}

/// Drives configure, build and install for a recipe
pub struct BuildInvoker<'a> {
    runner: &'a dyn ToolRunner,
    jobs: usize,
}

impl<'a> BuildInvoker<'a> {
    pub fn new(runner: &'a dyn ToolRunner, jobs: usize) -> Self {
        Self {
            runner,
            jobs: jobs.max(1),
        }
    }

    /// The commands for each phase, without running them
    pub fn invocations(
        &self,
        recipe: &Recipe,
        config: &ResolvedConfiguration,
        dirs: &BuildDirs,
        env: &BTreeMap<String, String>,
    ) -> Result<Vec<(BuildPhase, Invocation)>> {
        let defs = build_definitions(recipe, config)?;
        let source = match &recipe.build.subdir {
            Some(subdir) => dirs.source_dir.join(subdir),
            None => dirs.source_dir.clone(),
        };

        let mut env = env.clone();
        for (key, value) in &recipe.build.environment {
            env.insert(key.clone(), recipe.substitute(value));
        }

        let build = path_arg(&dirs.build_dir);
        let jobs = self.jobs.to_string();
        let define_args = defs.iter().map(|(k, v)| format!("-D{}={}", k, v));
        let extra_args = recipe.build.args.iter().map(|a| recipe.substitute(a));

        let commands: Vec<(BuildPhase, &str, Vec<String>)> = match recipe.build.backend {
            Backend::Meson => {
                let mut configure = vec![
                    "setup".to_string(),
                    build.clone(),
                    path_arg(&source),
                    format!("--prefix={}", path_arg(&dirs.install_dir)),
                    "--libdir=lib".to_string(),
                ];
                configure.extend(define_args);
                configure.extend(extra_args);
                vec![
                    (BuildPhase::Configure, "meson", configure),
                    (
                        BuildPhase::Build,
                        "meson",
                        vec!["compile".into(), "-C".into(), build.clone(), "-j".into(), jobs],
                    ),
                    (
                        BuildPhase::Install,
                        "meson",
                        vec!["install".into(), "-C".into(), build],
                    ),
                ]
            }
            Backend::CMake => {
                let mut configure = vec![
                    "-S".to_string(),
                    path_arg(&source),
                    "-B".to_string(),
                    build.clone(),
                    format!("-DCMAKE_INSTALL_PREFIX={}", path_arg(&dirs.install_dir)),
                ];
                configure.extend(define_args);
                configure.extend(extra_args);
                vec![
                    (BuildPhase::Configure, "cmake", configure),
                    (
                        BuildPhase::Build,
                        "cmake",
                        vec!["--build".into(), build.clone(), "--parallel".into(), jobs],
                    ),
                    (
                        BuildPhase::Install,
                        "cmake",
                        vec!["--install".into(), build],
                    ),
                ]
            }
        };

        Ok(commands
            .into_iter()
            .map(|(phase, program, args)| {
                (
                    phase,
                    Invocation {
                        program: program.to_string(),
                        args,
                        cwd: source.clone(),
                        env: env.clone(),
                    },
                )
            })
            .collect())
    }

    /// Run all phases, returning the build log
    pub fn run(
        &self,
        recipe: &Recipe,
        config: &ResolvedConfiguration,
        dirs: &BuildDirs,
        env: &BTreeMap<String, String>,
    ) -> Result<String> {
        std::fs::create_dir_all(&dirs.build_dir)?;
        std::fs::create_dir_all(&dirs.install_dir)?;

        let mut log = String::new();
        for (phase, invocation) in self.invocations(recipe, config, dirs, env)? {
            info!("Running {} phase for {}", phase, recipe.id());
            debug!("Command: {}", invocation);

            let output = self.runner.run(phase, &invocation)?;
            log.push_str(&format!("=== {} ===\n$ {}\n", phase, invocation));
            log.push_str(&output.stdout);
            if !output.stderr.is_empty() {
                log.push_str("--- stderr ---\n");
                log.push_str(&output.stderr);
            }

            if !output.success() {
                return Err(Error::BuildStepFailed {
                    phase,
                    code: output.code,
                    stderr: output.stderr,
                });
            }
        }

        Ok(log)
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
