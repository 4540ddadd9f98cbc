//! Build variant descriptor.
//!
//! A [`Variant`] fingerprints the toolchain a dependency is built with:
//! architecture, platform, C runtime, compiler, language standard, binary
//! ABI, an optional target triple and an optional GPU backend. Two builds of
//! the same `name@version` under different variants never share a build
//! cache slot.
//!
//! The canonical text form is a comma-separated `key=value` list in a fixed
//! field order:
//!
//! ```text
//! arch=x86_64,platform=linux,runtime=glibc,compiler=gcc-12,std=cpp17,abi=sysv,cuda=12.1,cuda_arch=sm_80|sm_86
//! ```
//!
//! # Example
//!
//! ```
//! use kiln_schema::Variant;
//!
//! let v: Variant = "arch=x86_64,platform=linux,cuda=12.1".parse().unwrap();
//! assert_eq!(v.canonical(), "arch=x86_64,platform=linux,cuda=12.1");
//! assert_eq!(v.dir_name(), "arch-x86_64,platform-linux,cuda-12.1");
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Accepted values for the `arch` field.
pub const ARCHITECTURES: &[&str] = &["x86_64", "arm64", "x64", "i386", "aarch64"];

/// Accepted values for the `platform` field.
pub const PLATFORMS: &[&str] = &["linux", "darwin", "windows"];

/// Accepted values for the `std` field.
pub const STANDARDS: &[&str] = &["cpp11", "cpp14", "cpp17", "cpp20", "cpp23"];

/// Accepted values for the `abi` field.
pub const ABIS: &[&str] = &["sysv", "macho", "msabi"];

/// Directory name used for build cache entries when no variant applies.
pub const DEFAULT_VARIANT_DIR: &str = "default";

/// Why a variant string or record was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VariantError {
    /// Nothing to parse.
    #[error("variant string is empty")]
    Empty,

    /// A pair without `=`.
    #[error("malformed variant pair '{0}': expected key=value")]
    MalformedPair(String),

    /// A key outside the known field set.
    #[error("unknown variant key '{0}'")]
    UnknownKey(String),

    /// A GPU key naming no known backend.
    #[error("unsupported GPU backend '{0}'")]
    UnknownGpuBackend(String),

    /// A value outside the accepted list for its field.
    #[error("unsupported {field} '{value}'")]
    Unsupported {
        /// Variant key the value was given for.
        field: &'static str,
        /// The rejected value.
        value: String,
    },

    /// A GPU backend given without a version.
    #[error("GPU backend {0} requires a version")]
    MissingGpuVersion(GpuBackend),
}

/// GPU compute backend. At most one is active per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuBackend {
    /// NVIDIA CUDA.
    Cuda,
    /// AMD `ROCm`.
    Rocm,
    /// `OpenCL`.
    OpenCl,
}

impl GpuBackend {
    /// Key used for this backend in the canonical string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cuda => "cuda",
            Self::Rocm => "rocm",
            Self::OpenCl => "opencl",
        }
    }

    /// Whether the backend accepts a hardware architecture list.
    pub fn has_arch_list(&self) -> bool {
        !matches!(self, Self::OpenCl)
    }
}

impl fmt::Display for GpuBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GpuBackend {
    type Err = VariantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cuda" => Ok(Self::Cuda),
            "rocm" => Ok(Self::Rocm),
            "opencl" => Ok(Self::OpenCl),
            _ => Err(VariantError::UnknownGpuBackend(s.to_string())),
        }
    }
}

/// The GPU sub-record. Its `backend` is the only populated sub-record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gpu {
    /// Which backend is active.
    pub backend: GpuBackend,
    /// Backend toolkit version, e.g. `12.1`.
    pub version: String,
    /// Hardware architecture codes (e.g. `sm_80`), `|`-separated on the wire.
    pub archs: Vec<String>,
    /// Cleared records are ignored by the canonical form.
    pub enabled: bool,
}

impl Gpu {
    fn new(backend: GpuBackend) -> Self {
        Self {
            backend,
            version: String::new(),
            archs: Vec::new(),
            enabled: false,
        }
    }
}

/// Toolchain fingerprint used to scope build cache entries.
///
/// Equality and hashing are defined over the [canonical string](Self::canonical),
/// so a disabled GPU record does not make two otherwise identical variants differ.
#[derive(Debug, Clone, Default)]
pub struct Variant {
    /// CPU architecture, one of [`ARCHITECTURES`].
    pub arch: Option<String>,
    /// Operating system, one of [`PLATFORMS`].
    pub platform: Option<String>,
    /// C runtime, e.g. `glibc` or `musl`.
    pub runtime: Option<String>,
    /// Compiler and version, e.g. `gcc-12`.
    pub compiler: Option<String>,
    /// Language standard, one of [`STANDARDS`].
    pub std: Option<String>,
    /// Binary ABI, one of [`ABIS`].
    pub abi: Option<String>,
    /// Cross-compilation target triple.
    pub target: Option<String>,
    /// GPU backend, if any.
    pub gpu: Option<Gpu>,
}

impl Variant {
    /// Parse a `key=value,...` string.
    ///
    /// Pairs are trimmed and empty pairs skipped. GPU keys come in three forms:
    /// `cuda=12.1` sets the version and enables the backend, `cuda_version=12.1`
    /// sets the version only, and `cuda_arch=sm_80|sm_86` sets the architecture
    /// list. `gpu_backend=` and `gpu_enabled=` address the record directly.
    pub fn parse(s: &str) -> Result<Self, VariantError> {
        if s.trim().is_empty() {
            return Err(VariantError::Empty);
        }

        let mut variant = Self::default();
        for pair in s.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| VariantError::MalformedPair(pair.to_string()))?;
            variant.apply(key.trim(), value.trim())?;
        }
        Ok(variant)
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<(), VariantError> {
        let text = (!value.is_empty()).then(|| value.to_string());
        match key {
            "arch" => self.arch = text,
            "platform" => self.platform = text,
            "runtime" => self.runtime = text,
            "compiler" => self.compiler = text,
            "std" => self.std = text,
            "abi" => self.abi = text,
            "target" => self.target = text,
            "cuda" | "rocm" | "opencl" => {
                let gpu = self.gpu_for(key.parse()?);
                gpu.version = value.to_string();
                gpu.enabled = true;
            }
            "cuda_version" | "rocm_version" | "opencl_version" => {
                let backend = key.trim_end_matches("_version").parse()?;
                self.gpu_for(backend).version = value.to_string();
            }
            "cuda_arch" | "rocm_arch" => {
                let backend: GpuBackend = key.trim_end_matches("_arch").parse()?;
                let fresh = self.gpu.as_ref().is_none_or(|g| g.backend != backend);
                let gpu = self.gpu_for(backend);
                gpu.archs = value
                    .split('|')
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
                    .map(String::from)
                    .collect();
                if fresh {
                    gpu.enabled = true;
                }
            }
            "gpu_backend" => {
                if value.is_empty() || value.eq_ignore_ascii_case("none") {
                    self.gpu = None;
                } else {
                    self.gpu_for(value.parse()?);
                }
            }
            "gpu_enabled" => {
                if let Some(gpu) = self.gpu.as_mut() {
                    gpu.enabled = matches!(value, "true" | "1");
                }
            }
            _ => return Err(VariantError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    /// The GPU record for `backend`, replacing a record of any other backend.
    fn gpu_for(&mut self, backend: GpuBackend) -> &mut Gpu {
        if self.gpu.as_ref().is_some_and(|g| g.backend != backend) {
            self.gpu = None;
        }
        self.gpu.get_or_insert_with(|| Gpu::new(backend))
    }

    fn fields(&self) -> [(&'static str, Option<&str>); 7] {
        [
            ("arch", self.arch.as_deref()),
            ("platform", self.platform.as_deref()),
            ("runtime", self.runtime.as_deref()),
            ("compiler", self.compiler.as_deref()),
            ("std", self.std.as_deref()),
            ("abi", self.abi.as_deref()),
            ("target", self.target.as_deref()),
        ]
    }

    /// Deterministic `key=value,...` rendering in fixed field order.
    pub fn canonical(&self) -> String {
        let mut parts: Vec<String> = self
            .fields()
            .into_iter()
            .filter_map(|(key, value)| value.map(|v| format!("{key}={v}")))
            .collect();

        if let Some(gpu) = self.gpu.as_ref().filter(|g| g.enabled) {
            if !gpu.version.is_empty() {
                parts.push(format!("{}={}", gpu.backend, gpu.version));
            }
            if gpu.backend.has_arch_list() && !gpu.archs.is_empty() {
                parts.push(format!("{}_arch={}", gpu.backend, gpu.archs.join("|")));
            }
        }

        parts.join(",")
    }

    /// Filesystem-safe encoding of the canonical string.
    ///
    /// `=` becomes `-`, `+` becomes `plus`, `|` becomes `or`, path separators
    /// become `_`, and a leading `.` becomes `_`. An empty variant maps to
    /// [`DEFAULT_VARIANT_DIR`].
    pub fn dir_name(&self) -> String {
        let canonical = self.canonical();
        if canonical.is_empty() {
            return DEFAULT_VARIANT_DIR.to_string();
        }

        let encoded = canonical
            .replace('=', "-")
            .replace('+', "plus")
            .replace('|', "or")
            .replace(['/', '\\'], "_");

        match encoded.strip_prefix('.') {
            Some(rest) => format!("_{rest}"),
            None => encoded,
        }
    }

    /// True when no field is set and no GPU record is present.
    pub fn is_empty(&self) -> bool {
        self.fields().iter().all(|(_, v)| v.is_none()) && self.gpu.is_none()
    }

    /// Check every set field against its closed set of accepted values.
    pub fn validate(&self) -> Result<(), VariantError> {
        check_member("architecture", self.arch.as_deref(), ARCHITECTURES)?;
        check_member("platform", self.platform.as_deref(), PLATFORMS)?;
        check_member("language standard", self.std.as_deref(), STANDARDS)?;
        check_member("ABI", self.abi.as_deref(), ABIS)?;

        match &self.gpu {
            Some(gpu) if gpu.version.is_empty() => {
                Err(VariantError::MissingGpuVersion(gpu.backend))
            }
            _ => Ok(()),
        }
    }

    /// Fill the fields left empty in `self` from `detected`.
    ///
    /// Set fields are never overwritten. The GPU record is taken from
    /// `detected` only when `self` has none.
    pub fn merge_detected(&self, detected: &Variant) -> Variant {
        fn pick(own: &Option<String>, other: &Option<String>) -> Option<String> {
            own.clone().or_else(|| other.clone())
        }

        Variant {
            arch: pick(&self.arch, &detected.arch),
            platform: pick(&self.platform, &detected.platform),
            runtime: pick(&self.runtime, &detected.runtime),
            compiler: pick(&self.compiler, &detected.compiler),
            std: pick(&self.std, &detected.std),
            abi: pick(&self.abi, &detected.abi),
            target: pick(&self.target, &detected.target),
            gpu: self.gpu.clone().or_else(|| detected.gpu.clone()),
        }
    }
}

fn check_member(
    field: &'static str,
    value: Option<&str>,
    allowed: &[&str],
) -> Result<(), VariantError> {
    match value {
        Some(v) if !allowed.contains(&v) => Err(VariantError::Unsupported {
            field,
            value: v.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Directory name for an optional variant (`"default"` when absent).
pub fn variant_dir(variant: Option<&Variant>) -> String {
    variant.map_or_else(|| DEFAULT_VARIANT_DIR.to_string(), Variant::dir_name)
}

impl PartialEq for Variant {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for Variant {}

impl Hash for Variant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl FromStr for Variant {
    type Err = VariantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Variant {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical())
    }
}

impl<'de> Deserialize<'de> for Variant {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
