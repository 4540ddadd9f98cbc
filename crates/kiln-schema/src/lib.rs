//! Shared types for kiln.
//!
//! Everything here is plain data: the build [`Variant`] descriptor, the
//! [`Dependency`] record and its [`Source`], and the [`ProjectConfig`] shape
//! the engine consumes. No I/O happens in this crate.

pub mod config;
pub mod dependency;
pub mod variant;

pub use config::*;
pub use dependency::*;
pub use variant::*;

use thiserror::Error;

/// Validation errors for dependency records and project configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// A dependency without a version.
    #[error("version is required for dependency {0}")]
    MissingVersion(String),

    /// A non-index source with no URLs.
    #[error("source URLs are required for dependency {0}")]
    MissingUrls(String),

    /// A custom build with nothing to run.
    #[error("custom_script or build_commands.configure is required for custom build of {0}")]
    MissingScript(String),

    /// A profile names a dependency that is not declared.
    #[error("dependency not found: {0}")]
    UnknownDependency(String),

    /// No profile with that name.
    #[error("build profile not found: {0}")]
    UnknownProfile(String),

    /// A profile lists an empty dependency name.
    #[error("empty dependency name in build profile {0}")]
    EmptyProfileEntry(String),

    /// Checksum algorithm outside md5/sha1/sha256/sha512.
    #[error("unsupported checksum algorithm: {0}")]
    UnsupportedChecksum(String),

    /// The variant descriptor did not parse.
    #[error("invalid variant: {0}")]
    Variant(#[from] VariantError),
}
