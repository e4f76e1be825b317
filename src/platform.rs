// src/platform.rs

//! Target platform settings
//!
//! A [`Platform`] is the set of facts a recipe's configuration depends on:
//! operating system, architecture, compiler and build type. Every enum here
//! is matched exhaustively by the option resolver, build invoker and
//! publisher, so adding a variant is a compile-time checklist.

use crate::version::Version;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strum_macros::{Display, EnumString};

/// Serialize through `Display` and deserialize through `FromStr`, so profile
/// files accept the same spellings (case-insensitive, aliases) as strum does
macro_rules! serde_via_str {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Serialize for $ty {
                fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                    serializer.collect_str(self)
                }
            }

            impl<'de> Deserialize<'de> for $ty {
                fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                    let raw = String::deserialize(deserializer)?;
                    raw.parse().map_err(|_| {
                        serde::de::Error::custom(format!(
                            "unknown {} '{}'",
                            stringify!($ty),
                            raw
                        ))
                    })
                }
            }
        )+
    };
}

/// Operating system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Os {
    Linux,
    Windows,
    Macos,
    Freebsd,
    Android,
    Ios,
}

/// CPU architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum Arch {
    #[strum(to_string = "x86", serialize = "i686", serialize = "i386")]
    X86,
    #[strum(to_string = "x86_64", serialize = "amd64")]
    X86_64,
    #[strum(to_string = "armv7")]
    Armv7,
    #[strum(to_string = "armv8", serialize = "aarch64", serialize = "arm64")]
    Armv8,
}

/// Compiler family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum CompilerFamily {
    Gcc,
    Clang,
    AppleClang,
    #[strum(to_string = "msvc", serialize = "visual studio", serialize = "vs")]
    Msvc,
}

/// MSVC C runtime flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum MsvcRuntime {
    #[strum(to_string = "MD")]
    MultiThreadedDll,
    #[strum(to_string = "MT")]
    MultiThreaded,
    #[strum(to_string = "MDd")]
    MultiThreadedDllDebug,
    #[strum(to_string = "MTd")]
    MultiThreadedDebug,
}

impl MsvcRuntime {
    /// Value for Meson's `b_vscrt`
    pub fn meson_vscrt(&self) -> &'static str {
        match self {
            Self::MultiThreadedDll => "md",
            Self::MultiThreaded => "mt",
            Self::MultiThreadedDllDebug => "mdd",
            Self::MultiThreadedDebug => "mtd",
        }
    }
}

/// Build type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum BuildType {
    Debug,
    #[default]
    Release,
    RelWithDebInfo,
    MinSizeRel,
}

impl BuildType {
    /// Value for Meson's `buildtype`
    pub fn meson_buildtype(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Release => "release",
            Self::RelWithDebInfo => "debugoptimized",
            Self::MinSizeRel => "minsize",
        }
    }

    /// Value for `CMAKE_BUILD_TYPE`
    pub fn cmake_build_type(&self) -> &'static str {
        match self {
            Self::Debug => "Debug",
            Self::Release => "Release",
            Self::RelWithDebInfo => "RelWithDebInfo",
            Self::MinSizeRel => "MinSizeRel",
        }
    }
}

serde_via_str!(Os, Arch, CompilerFamily, MsvcRuntime, BuildType);

/// Compiler settings
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Compiler {
    pub family: CompilerFamily,
    pub version: Version,
    /// MSVC runtime, meaningless for other families
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<MsvcRuntime>,
    /// C++ standard library (`libstdc++11`, `libc++`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub libcxx: Option<String>,
    /// C++ standard (`17`, `gnu17`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cppstd: Option<String>,
}

impl Compiler {
    pub fn new(family: CompilerFamily, version: Version) -> Self {
        Self {
            family,
            version,
            runtime: None,
            libcxx: None,
            cppstd: None,
        }
    }

    pub fn with_runtime(mut self, runtime: MsvcRuntime) -> Self {
        self.runtime = Some(runtime);
        self
    }
}

/// Concrete platform a configuration targets
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    pub os: Os,
    pub arch: Arch,
    pub compiler: Compiler,
    #[serde(default)]
    pub build_type: BuildType,
}

impl Platform {
    pub fn new(os: Os, arch: Arch, compiler: Compiler, build_type: BuildType) -> Self {
        Self {
            os,
            arch,
            compiler,
            build_type,
        }
    }

    /// Best guess for the machine we are running on
    ///
    /// The compiler is the conventional system compiler for the OS; use a
    /// profile when the real toolchain differs.
    pub fn host() -> Self {
        let os = if cfg!(target_os = "windows") {
            Os::Windows
        } else if cfg!(target_os = "macos") {
            Os::Macos
        } else if cfg!(target_os = "freebsd") {
            Os::Freebsd
        } else if cfg!(target_os = "android") {
            Os::Android
        } else if cfg!(target_os = "ios") {
            Os::Ios
        } else {
            Os::Linux
        };

        let arch = if cfg!(target_arch = "x86") {
            Arch::X86
        } else if cfg!(target_arch = "arm") {
            Arch::Armv7
        } else if cfg!(target_arch = "aarch64") {
            Arch::Armv8
        } else {
            Arch::X86_64
        };

        let compiler = match os {
            Os::Windows => Compiler::new(CompilerFamily::Msvc, Version::from_numbers(&[19]))
                .with_runtime(MsvcRuntime::MultiThreadedDll),
            Os::Macos | Os::Ios => {
                Compiler::new(CompilerFamily::AppleClang, Version::from_numbers(&[15]))
            }
            Os::Freebsd | Os::Android => {
                Compiler::new(CompilerFamily::Clang, Version::from_numbers(&[17]))
            }
            Os::Linux => Compiler::new(CompilerFamily::Gcc, Version::from_numbers(&[13])),
        };

        Self::new(os, arch, compiler, BuildType::Release)
    }

    /// Copy with the C++ library settings removed, for C-only recipes
    pub fn without_cxx_settings(&self) -> Self {
        let mut platform = self.clone();
        platform.compiler.libcxx = None;
        platform.compiler.cppstd = None;
        platform
    }

    /// Suffix of executables on the target
    pub fn exe_suffix(&self) -> &'static str {
        match self.os {
            Os::Windows => ".exe",
            Os::Linux | Os::Macos | Os::Freebsd | Os::Android | Os::Ios => "",
        }
    }
}
