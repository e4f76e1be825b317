// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.
//!
//! The doubles here stand in for the network and the build tools so a full
//! cook runs inside a temporary directory.

#![allow(dead_code)]

use conary_kitchen::hash::{HashAlgorithm, hash_bytes};
use conary_kitchen::recipe::kitchen::{
    BuildPhase, Downloader, Invocation, Kitchen, KitchenConfig, StepOutput, ToolRunner,
};
use conary_kitchen::{Error, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Install a tracing subscriber once; `RUST_LOG` overrides the default level
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Build a gzip-compressed tarball from `(path, content)` pairs
pub fn tar_gz(files: &[(&str, &str)]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, content.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// `sha256:<hex>` checksum of some bytes
pub fn sha256(data: &[u8]) -> String {
    hash_bytes(HashAlgorithm::Sha256, data).to_string()
}

/// Serves downloads from memory and counts requests
#[derive(Clone, Default)]
pub struct MemoryDownloader {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    calls: Arc<AtomicUsize>,
}

impl MemoryDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, data: Vec<u8>) {
        self.files.lock().unwrap().insert(url.to_string(), data);
    }

    /// Number of download requests so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Downloader for MemoryDownloader {
    fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let files = self.files.lock().unwrap();
        let data = files
            .get(url)
            .ok_or_else(|| Error::DownloadError(format!("HTTP 404 for {}", url)))?;
        fs::write(dest, data)?;
        Ok(data.len() as u64)
    }
}

/// Name of the file in a test source tree listing what the build installs
///
/// Each line is `<dir> <library>`; `pc <name>` writes `lib/pkgconfig/<name>.pc`
/// and `bin <name>` installs an executable.
pub const PRODUCES: &str = "PRODUCES";

#[derive(Clone, Default)]
struct Configured {
    prefix: PathBuf,
    static_libs: bool,
}

/// Pretends to be Meson
///
/// Configure records the install prefix and library kind; install lays out
/// the files listed in the source tree's [`PRODUCES`] file.
#[derive(Clone, Default)]
pub struct ScriptedRunner {
    invocations: Arc<Mutex<Vec<(BuildPhase, Invocation)>>>,
    configured: Arc<Mutex<HashMap<PathBuf, Configured>>>,
    fail_on: Option<BuildPhase>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exit with status 1 in `phase`
    pub fn failing_on(phase: BuildPhase) -> Self {
        Self {
            fail_on: Some(phase),
            ..Self::default()
        }
    }

    pub fn invocations(&self) -> Vec<(BuildPhase, Invocation)> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }

    fn install(&self, invocation: &Invocation) -> Result<()> {
        let configured = self
            .configured
            .lock()
            .unwrap()
            .get(&invocation.cwd)
            .cloned()
            .ok_or_else(|| Error::NotFound("install before configure".to_string()))?;

        let listing = fs::read_to_string(invocation.cwd.join(PRODUCES))?;
        for line in listing.lines() {
            let Some((dir, name)) = line.split_once(' ') else {
                continue;
            };
            if dir == "pc" {
                let pc_dir = configured.prefix.join("lib/pkgconfig");
                fs::create_dir_all(&pc_dir)?;
                fs::write(
                    pc_dir.join(format!("{}.pc", name)),
                    format!(
                        "prefix={}\nlibdir=${{prefix}}/lib\n\nName: {}\nLibs: -L${{libdir}} -l{}\n",
                        configured.prefix.display(),
                        name,
                        name
                    ),
                )?;
                continue;
            }
            if dir == "bin" {
                let bin = configured.prefix.join("bin");
                fs::create_dir_all(&bin)?;
                fs::write(bin.join(name), "#!/bin/sh\n")?;
                continue;
            }
            let target = configured.prefix.join(dir);
            fs::create_dir_all(&target)?;
            let file = if configured.static_libs {
                format!("lib{}.a", name)
            } else {
                format!("lib{}.so", name)
            };
            fs::write(target.join(file), b"\x7fELF")?;
        }
        Ok(())
    }
}

impl ToolRunner for ScriptedRunner {
    fn run(&self, phase: BuildPhase, invocation: &Invocation) -> Result<StepOutput> {
        self.invocations
            .lock()
            .unwrap()
            .push((phase, invocation.clone()));

        if self.fail_on == Some(phase) {
            return Ok(StepOutput {
                code: Some(1),
                stdout: String::new(),
                stderr: format!("{} exploded", phase),
            });
        }

        match phase {
            BuildPhase::Configure => {
                let mut configured = Configured::default();
                for arg in &invocation.args {
                    if let Some(prefix) = arg.strip_prefix("--prefix=") {
                        configured.prefix = PathBuf::from(prefix);
                    } else if arg == "-Ddefault_library=static" {
                        configured.static_libs = true;
                    }
                }
                self.configured
                    .lock()
                    .unwrap()
                    .insert(invocation.cwd.clone(), configured);
            }
            BuildPhase::Build => {}
            BuildPhase::Install => self.install(invocation)?,
        }

        Ok(StepOutput {
            code: Some(0),
            stdout: format!("{} ok\n", phase),
            stderr: String::new(),
        })
    }
}

pub const GLIB_URL: &str = "https://download.example.org/glib/glib-2.66.0.tar.gz";
pub const GSTREAMER_URL: &str =
    "https://gitlab.example.org/gstreamer/gstreamer/-/archive/1.16.0/gstreamer-1.16.0.tar.gz";

/// Source tarball for glib
pub fn glib_archive() -> Vec<u8> {
    tar_gz(&[
        ("glib-2.66.0/meson.build", "project('glib', 'c')\n"),
        ("glib-2.66.0/COPYING", "LGPL\n"),
        (
            "glib-2.66.0/PRODUCES",
            "lib glib-2.0\nlib gobject-2.0\npc glib-2.0\n",
        ),
    ])
}

/// Source tarball for gstreamer
pub fn gstreamer_archive() -> Vec<u8> {
    tar_gz(&[
        ("gstreamer-1.16.0/meson.build", "project('gstreamer', 'c')\n"),
        ("gstreamer-1.16.0/COPYING", "GPL\n"),
        ("gstreamer-1.16.0/gst/gst.c", "int gst_init(void)\n{\n  return 0;\n}\n"),
        (
            "gstreamer-1.16.0/PRODUCES",
            "lib gstreamer-1.0\nlib gstbase-1.0\nlib/gstreamer-1.0 gstcoreelements\n",
        ),
    ])
}

pub fn glib_recipe(checksum: &str) -> String {
    format!(
        r#"[package]
name = "glib"
version = "2.66.0"
license = "LGPL-2.1"
description = "GLib core library"

[source]
archive = "https://download.example.org/%(name)s/%(name)s-%(version)s.tar.gz"
checksum = "{checksum}"

[settings]
pure_c = true

[options.shared]
values = ["true", "false"]
default = "false"

[build]
backend = "meson"
[build.option_definitions.shared]
define = "default_library"
map = {{ "true" = "shared", "false" = "static" }}

[publish]
libs = ["gobject-2.0", "glib-2.0"]
license_files = ["COPYING"]
[publish.system_libs]
linux = ["pthread"]
"#
    )
}

pub fn gstreamer_recipe(checksum: &str) -> String {
    format!(
        r#"requires = ["glib >= 2.66.0"]

[package]
name = "gstreamer"
version = "1.16.0"
license = "GPL-2.0-only"
description = "GStreamer multimedia framework"

[source]
archive = "https://gitlab.example.org/gstreamer/%(name)s/-/archive/%(version)s/%(name)s-%(version)s.tar.gz"
checksum = "{checksum}"

[settings]
pure_c = true

[options.shared]
values = ["true", "false"]
default = "true"

[options.fPIC]
values = ["true", "false"]
default = "true"
remove_on = ["windows"]

[[build_requires]]
requirement = "pkgconf >= 1.7.3"
unless_tool = "pkg-config"

[patches]
glob = "patches/*.diff"

[build]
backend = "meson"
args = ["--wrap-mode=nofallback"]
[build.definitions]
tools = "disabled"
[build.option_definitions.shared]
define = "default_library"
map = {{ "true" = "shared", "false" = "static" }}

[publish]
include_dirs = ["include/gstreamer-1.0"]
libs = ["gstreamer-1.0", "gstbase-1.0"]
plugin_dir = "lib/gstreamer-1.0"
plugin_libs = ["gstcoreelements"]
static_define = "GST_STATIC_COMPILATION"
license_files = ["COPYING"]
[publish.system_libs]
linux = ["dl"]
windows = ["ws2_32"]
[publish.env]
plugin_path = "GST_PLUGIN_PATH"
root = "GSTREAMER_ROOT"
plugin_scanner = {{ var = "GST_PLUGIN_SCANNER", path = "bin/gstreamer-1.0/gst-plugin-scanner" }}
arch_roots = {{ x86_64 = "GSTREAMER_ROOT_X86_64" }}
[publish.legacy_static_names]
compilers = ["msvc"]
dirs = ["lib", "lib/gstreamer-1.0"]
"#
    )
}

pub const PKGCONF_URL: &str = "https://download.example.org/pkgconf/pkgconf-1.7.3.tar.gz";

/// Source tarball for pkgconf, which only installs a tool
pub fn pkgconf_archive() -> Vec<u8> {
    tar_gz(&[
        ("pkgconf-1.7.3/meson.build", "project('pkgconf', 'c')\n"),
        ("pkgconf-1.7.3/PRODUCES", "bin pkg-config\nbin pkgconf\n"),
    ])
}

pub fn pkgconf_recipe(checksum: &str) -> String {
    format!(
        r#"[package]
name = "pkgconf"
version = "1.7.3"
license = "ISC"
description = "pkg-config implementation"

[source]
archive = "https://download.example.org/%(name)s/%(name)s-%(version)s.tar.gz"
checksum = "{checksum}"

[settings]
pure_c = true
"#
    )
}

/// Write a recipe into `<root>/<name>/<version>/recipe.toml`, returning its directory
pub fn write_recipe(root: &Path, name: &str, version: &str, content: &str) -> PathBuf {
    let dir = root.join(name).join(version);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("recipe.toml"), content).unwrap();
    dir
}

/// Write a patch next to a recipe
pub fn write_patch(recipe_dir: &Path, name: &str, content: &str) {
    let dir = recipe_dir.join("patches");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(name), content).unwrap();
}

/// A self-contained kitchen: recipes, sources and registry under one temp dir
pub struct TestKitchen {
    pub root: TempDir,
    pub recipes: PathBuf,
    pub downloader: MemoryDownloader,
    pub runner: ScriptedRunner,
}

impl TestKitchen {
    /// glib and gstreamer recipes with their sources served from memory
    pub fn gstreamer() -> Self {
        Self::gstreamer_with_runner(ScriptedRunner::new())
    }

    pub fn gstreamer_with_runner(runner: ScriptedRunner) -> Self {
        init_tracing();
        let root = tempfile::tempdir().unwrap();
        let recipes = root.path().join("recipes");

        let downloader = MemoryDownloader::new();
        let glib = glib_archive();
        let gstreamer = gstreamer_archive();
        write_recipe(&recipes, "glib", "2.66.0", &glib_recipe(&sha256(&glib)));
        write_recipe(
            &recipes,
            "gstreamer",
            "1.16.0",
            &gstreamer_recipe(&sha256(&gstreamer)),
        );
        downloader.serve(GLIB_URL, glib);
        downloader.serve(GSTREAMER_URL, gstreamer);

        Self {
            root,
            recipes,
            downloader,
            runner,
        }
    }

    pub fn config(&self) -> KitchenConfig {
        KitchenConfig::with_root(&self.root.path().join("state"))
    }

    /// A Kitchen wired to the doubles; `pkg-config` counts as installed
    pub fn kitchen(&self) -> Kitchen {
        Kitchen::new(self.config())
            .unwrap()
            .with_downloader(self.downloader.clone())
            .with_runner(self.runner.clone())
            .with_tool_check(|tool| tool == "pkg-config")
    }

    /// Also offer a cookable pkgconf for hosts without `pkg-config`
    pub fn with_pkgconf(self) -> Self {
        let archive = pkgconf_archive();
        write_recipe(
            &self.recipes,
            "pkgconf",
            "1.7.3",
            &pkgconf_recipe(&sha256(&archive)),
        );
        self.downloader.serve(PKGCONF_URL, archive);
        self
    }

    pub fn gstreamer_dir(&self) -> PathBuf {
        self.recipes.join("gstreamer").join("1.16.0")
    }
}
