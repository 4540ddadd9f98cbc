//! Domain-specific errors for install operations

use std::fmt;

use kiln_schema::{SchemaError, VariantError};
use thiserror::Error;

use crate::build::BuildError;
use crate::cache::CacheError;
use crate::detect::DetectError;
use crate::fetch::FetchError;
use crate::link::LinkError;

/// Coarse classification used for reporting and exit handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad project or variant configuration.
    Configuration,
    /// A dependency is unknown or unsupported.
    Dependency,
    /// Fetching sources failed.
    Download,
    /// Building failed.
    Build,
    /// The cache could not be read or written.
    Cache,
    /// The host environment is missing something.
    System,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Configuration => "configuration",
            Self::Dependency => "dependency",
            Self::Download => "download",
            Self::Build => "build",
            Self::Cache => "cache",
            Self::System => "system",
        })
    }
}

/// Step of the per-dependency install flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Checking the dependency record.
    Validate,
    /// Restoring from the download or build cache.
    Cache,
    /// Fetching sources.
    Fetch,
    /// Running the build executor.
    Build,
    /// Publishing links into the project.
    Link,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Validate => "validate",
            Self::Cache => "cache",
            Self::Fetch => "fetch",
            Self::Build => "build",
            Self::Link => "link",
        })
    }
}

/// Everything an install run can fail with.
#[derive(Error, Debug)]
pub enum InstallError {
    /// Dependency or project record rejected.
    #[error("invalid configuration: {0}")]
    Schema(#[from] SchemaError),

    /// Variant string rejected.
    #[error("invalid variant: {0}")]
    Variant(#[from] VariantError),

    /// Host detection failed.
    #[error("system detection failed: {0}")]
    Detect(#[from] DetectError),

    /// Cache store failure.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Fetch failure.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Build failure.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// Link or manifest failure.
    #[error(transparent)]
    Link(#[from] LinkError),

    /// Filesystem failure outside the other layers.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Wraps a failure with the dependency and phase it happened in.
    #[error("failed to install {dependency} ({phase}): {source}")]
    Failed {
        /// Dependency name.
        dependency: String,
        /// Phase that failed.
        phase: Phase,
        /// The wrapped failure.
        #[source]
        source: Box<InstallError>,
    },

    /// A failure described by a short context label.
    #[error("{context}: {message}")]
    Context {
        /// What was being attempted.
        context: &'static str,
        /// Rendered cause.
        message: String,
    },
}

impl InstallError {
    /// Create an error with context for better debugging.
    pub fn context(ctx: &'static str, msg: impl fmt::Display) -> Self {
        Self::Context {
            context: ctx,
            message: msg.to_string(),
        }
    }

    /// Attach the dependency name and the phase that failed.
    pub fn during(self, dependency: &str, phase: Phase) -> Self {
        match self {
            already @ Self::Failed { .. } => already,
            other => Self::Failed {
                dependency: dependency.to_string(),
                phase,
                source: Box::new(other),
            },
        }
    }

    /// Coarse category, looking through [`Failed`](Self::Failed) wrappers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Schema(SchemaError::UnknownDependency(_)) => ErrorKind::Dependency,
            Self::Schema(_) | Self::Variant(_) => ErrorKind::Configuration,
            Self::Cache(_) => ErrorKind::Cache,
            Self::Fetch(e) => match e.root() {
                FetchError::UnsupportedSource(_) => ErrorKind::Dependency,
                FetchError::ToolMissing(_) => ErrorKind::System,
                _ => ErrorKind::Download,
            },
            Self::Build(_) => ErrorKind::Build,
            Self::Detect(_) | Self::Link(_) | Self::Io(_) | Self::Context { .. } => ErrorKind::System,
            Self::Failed { source, .. } => source.kind(),
        }
    }

    /// Phase the error was raised in, when known.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::Failed { phase, .. } => Some(*phase),
            Self::Cache(_) => Some(Phase::Cache),
            Self::Fetch(_) => Some(Phase::Fetch),
            Self::Build(_) => Some(Phase::Build),
            Self::Link(_) => Some(Phase::Link),
            _ => None,
        }
    }

    /// Name of the dependency this error belongs to, if recorded.
    pub fn dependency(&self) -> Option<&str> {
        match self {
            Self::Failed { dependency, .. } => Some(dependency),
            _ => None,
        }
    }
}
