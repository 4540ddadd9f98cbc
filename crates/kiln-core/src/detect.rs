//! Host detection and variant resolution.

use kiln_schema::{Gpu, GpuBackend, Variant, VariantError};
use thiserror::Error;

/// Environment variable holding an explicit variant string.
pub const VARIANT_ENV: &str = "KILN_VARIANT";

/// Host properties kiln cannot express as a variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DetectError {
    /// `std::env::consts::ARCH` has no variant spelling.
    #[error("unsupported architecture: {0}")]
    UnsupportedArch(String),

    /// `std::env::consts::OS` has no variant spelling.
    #[error("unsupported operating system: {0}")]
    UnsupportedOs(String),
}

/// Best-effort description of the machine kiln runs on.
pub trait SystemDetector: Send + Sync {
    /// Describe the current host.
    fn detect(&self) -> Result<Variant, DetectError>;
}

/// Detects from compile-time target constants, `PATH` and a few well-known
/// environment variables.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostDetector;

impl HostDetector {
    fn arch() -> Result<&'static str, DetectError> {
        match std::env::consts::ARCH {
            "x86_64" => Ok("x86_64"),
            "aarch64" if cfg!(target_os = "macos") => Ok("arm64"),
            "aarch64" => Ok("aarch64"),
            "x86" => Ok("i386"),
            other => Err(DetectError::UnsupportedArch(other.to_string())),
        }
    }

    fn platform() -> Result<(&'static str, &'static str), DetectError> {
        match std::env::consts::OS {
            "linux" => Ok(("linux", "sysv")),
            "macos" => Ok(("darwin", "macho")),
            "windows" => Ok(("windows", "msabi")),
            other => Err(DetectError::UnsupportedOs(other.to_string())),
        }
    }

    fn runtime(platform: &str) -> Option<&'static str> {
        match platform {
            "linux" if cfg!(target_env = "musl") => Some("musl"),
            "linux" => Some("glibc"),
            "windows" => Some("msvcrt"),
            _ => None,
        }
    }

    fn compiler() -> Option<String> {
        if let Some(cxx) = std::env::var_os("CXX").filter(|v| !v.is_empty()) {
            let path = std::path::PathBuf::from(cxx);
            return path
                .file_name()
                .map(|n| normalize_compiler(&n.to_string_lossy()));
        }
        ["g++", "clang++", "cl"]
            .into_iter()
            .find(|tool| which::which(tool).is_ok())
            .map(normalize_compiler)
    }

    fn gpu() -> Option<Gpu> {
        let version = std::env::var("CUDA_VERSION").ok().filter(|v| !v.is_empty())?;
        Some(Gpu {
            backend: GpuBackend::Cuda,
            version,
            archs: Vec::new(),
            enabled: true,
        })
    }
}

fn normalize_compiler(name: &str) -> String {
    let name = name.trim_end_matches(".exe");
    if name.contains("clang") {
        "clang".to_string()
    } else if name == "cl" {
        "msvc".to_string()
    } else if name.contains("g++") || name.contains("gcc") || name == "c++" {
        "gcc".to_string()
    } else {
        name.to_string()
    }
}

impl SystemDetector for HostDetector {
    fn detect(&self) -> Result<Variant, DetectError> {
        let (platform, abi) = Self::platform()?;
        Ok(Variant {
            arch: Some(Self::arch()?.to_string()),
            platform: Some(platform.to_string()),
            runtime: Self::runtime(platform).map(str::to_string),
            compiler: Self::compiler(),
            abi: Some(abi.to_string()),
            gpu: Self::gpu(),
            ..Variant::default()
        })
    }
}

/// Pick the active variant.
///
/// Precedence: `cli`, then `env`, then `config`, then detection. Blank strings
/// count as absent. A detection failure yields no variant and a warning.
pub fn resolve_variant(
    cli: Option<&str>,
    env: Option<&str>,
    config: Option<&Variant>,
    detector: &dyn SystemDetector,
) -> Result<Option<Variant>, VariantError> {
    if let Some(text) = cli.map(str::trim).filter(|s| !s.is_empty()) {
        return Variant::parse(text).map(Some);
    }
    if let Some(text) = env.map(str::trim).filter(|s| !s.is_empty()) {
        return Variant::parse(text).map(Some);
    }
    if let Some(variant) = config.filter(|v| !v.is_empty()) {
        return Ok(Some(variant.clone()));
    }

    match detector.detect() {
        Ok(detected) => {
            let merged = Variant::default().merge_detected(&detected);
            Ok((!merged.is_empty()).then_some(merged))
        }
        Err(e) => {
            tracing::warn!(error = %e, "system detection failed, using the default variant");
            Ok(None)
        }
    }
}

/// [`resolve_variant`] with `env` read from `KILN_VARIANT`.
pub fn resolve_variant_from_env(
    cli: Option<&str>,
    config: Option<&Variant>,
    detector: &dyn SystemDetector,
) -> Result<Option<Variant>, VariantError> {
    let env = std::env::var(VARIANT_ENV).ok();
    resolve_variant(cli, env.as_deref(), config, detector)
}
