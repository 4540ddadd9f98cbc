//! Shared installation context.
//!
//! [`Context`] groups the collaborators every install operation needs so they
//! are constructed once per run and passed by reference.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiln_schema::{Dependency, DirsConfig, ProjectConfig, Variant, variant_dir};
use tokio_util::sync::CancellationToken;

use super::InstallError;
use crate::Reporter;
use crate::build::{BuildExecutor, CommandRunner, VariableContext};
use crate::cache::CacheStore;
use crate::fetch::{FetchConfig, FetchManager};
use crate::link::LinkManager;
use crate::paths;
use crate::toolchain::ToolchainHandle;

/// Filesystem roots used by one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dirs {
    /// Download and build cache root.
    pub cache: PathBuf,
    /// Per-dependency source and build trees.
    pub build: PathBuf,
    /// Per-variant install prefixes.
    pub install: PathBuf,
    /// Scratch space for in-flight fetches.
    pub tmp: PathBuf,
    /// Build logs.
    pub logs: PathBuf,
    /// Raw archives kept by the archive downloader.
    pub archives: PathBuf,
}

impl Default for Dirs {
    fn default() -> Self {
        Self {
            cache: paths::cache_path(),
            build: paths::build_path(),
            install: paths::install_path(),
            tmp: paths::tmp_path(),
            logs: paths::log_dir(),
            archives: paths::archive_cache_path(),
        }
    }
}

impl Dirs {
    /// Everything under one root. Used for isolated runs and tests.
    pub fn under(root: &Path) -> Self {
        Self {
            cache: root.join("cache"),
            build: root.join("build"),
            install: root.join("install"),
            tmp: root.join("tmp"),
            logs: root.join("logs"),
            archives: root.join("archives"),
        }
    }

    /// Defaults with the project's directory overrides applied.
    pub fn with_overrides(mut self, overrides: &DirsConfig) -> Self {
        if let Some(dir) = &overrides.cache_dir {
            self.cache.clone_from(dir);
        }
        if let Some(dir) = &overrides.build_dir {
            self.build.clone_from(dir);
        }
        if let Some(dir) = &overrides.install_dir {
            self.install.clone_from(dir);
        }
        self
    }
}

/// Knobs for building a [`Context`].
#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory holding `.kiln/`.
    pub project_root: PathBuf,
    /// Filesystem roots.
    pub dirs: Dirs,
    /// Build profile whose variables and selection apply.
    pub profile: Option<String>,
    /// Variant that scopes build cache entries and install prefixes.
    pub variant: Option<Variant>,
    /// Fetch layer tunables.
    pub fetch: FetchConfig,
    /// Toolchain build processes run under.
    pub toolchain: ToolchainHandle,
}

impl Settings {
    /// Settings with default directories and no profile, variant or toolchain.
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        let dirs = Dirs::default();
        let fetch = FetchConfig {
            archive_cache: dirs.archives.clone(),
            ..FetchConfig::default()
        };
        Self {
            project_root: project_root.into(),
            dirs,
            profile: None,
            variant: None,
            fetch,
            toolchain: ToolchainHandle::inactive(),
        }
    }

    /// Use `dirs`, pointing the archive cache at `dirs.archives`.
    pub fn with_dirs(mut self, dirs: Dirs) -> Self {
        self.fetch.archive_cache.clone_from(&dirs.archives);
        self.dirs = dirs;
        self
    }
}

/// Groups common state used during installation operations.
#[derive(Clone)]
pub struct Context {
    /// Filesystem roots.
    pub dirs: Dirs,
    /// Active variant, if any.
    pub variant: Option<Variant>,
    /// Project-level variables every build starts from.
    pub variables: VariableContext,
    /// Download and build caches.
    pub cache: Arc<CacheStore>,
    /// Source downloaders.
    pub fetcher: Arc<FetchManager>,
    /// Build executor.
    pub builder: Arc<BuildExecutor>,
    /// Project link tree and manifest.
    pub links: Arc<LinkManager>,
    /// Progress sink.
    pub reporter: Arc<dyn Reporter>,
    /// Fired to abort in-flight fetches and builds.
    pub cancel: CancellationToken,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("dirs", &self.dirs)
            .field("variant", &self.variant)
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Wire up the cache, fetcher, builder and link manager for one run. Initializes the cache directories.
    pub fn new(
        config: &ProjectConfig,
        settings: Settings,
        runner: Arc<dyn CommandRunner>,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Self, InstallError> {
        let Settings {
            project_root,
            dirs,
            profile,
            variant,
            mut fetch,
            toolchain,
        } = settings;

        if fetch.proxy.is_none() {
            fetch.proxy.clone_from(&config.proxy);
        }

        let cache = CacheStore::new(&dirs.cache);
        cache.init()?;

        let variables = VariableContext::new(&config.project.name, &config.project.version)
            .with_custom(config.variables(profile.as_deref())?)
            .with_variant(variant.clone());

        let fetcher = FetchManager::new(&fetch, Arc::clone(&reporter))?;
        let builder = BuildExecutor::new(runner, toolchain)
            .with_log_dir(&dirs.logs)
            .with_reporter(Arc::clone(&reporter));

        Ok(Self {
            variant,
            variables,
            cache: Arc::new(cache),
            fetcher: Arc::new(fetcher),
            builder: Arc::new(builder),
            links: Arc::new(LinkManager::for_project(&project_root)),
            reporter,
            cancel: CancellationToken::new(),
            dirs,
        })
    }

    /// `<build_root>/<name>/<version>/<variant_dir>`
    pub fn build_root(&self, dep: &Dependency) -> PathBuf {
        self.dirs
            .build
            .join(&dep.name)
            .join(&dep.version)
            .join(variant_dir(self.variant.as_ref()))
    }

    /// Where the dependency's sources are staged for building.
    pub fn source_dir(&self, dep: &Dependency) -> PathBuf {
        self.build_root(dep).join("source")
    }

    /// Out-of-tree build directory.
    pub fn build_dir(&self, dep: &Dependency) -> PathBuf {
        self.build_root(dep).join("build")
    }

    /// `<install_root>/<name>/<version>/<variant_dir>`
    pub fn install_dir(&self, dep: &Dependency) -> PathBuf {
        self.dirs
            .install
            .join(&dep.name)
            .join(&dep.version)
            .join(variant_dir(self.variant.as_ref()))
    }
}
