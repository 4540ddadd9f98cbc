//! Per-dependency install flow.
//!
//! ```text
//! download cache hit ──┬─ no build needed ──────────────> link(download entry)
//!                      ├─ build cache hit ─> retrieve ──> link(install dir)
//!                      └─ build cache miss ─> build ────> link(install dir)
//! otherwise ─> fetch (scratch) ─> store ─> stage ─> build ─> store_build ─> link
//! ```
//!
//! A failure while reading from the cache falls back to a fresh fetch. Fetch,
//! build and link failures abort the dependency.

use std::path::{Path, PathBuf};
use std::time::Instant;

use kiln_schema::Dependency;

use super::{Context, InstallError, Phase};
use crate::build::BuildOptions;
use crate::fsutil::{copy_path, remove_path};

/// Switches for [`install`] and [`install_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallOptions {
    /// Skip every cache lookup.
    pub force: bool,
    /// Neither read from nor write to the cache.
    pub no_cache: bool,
    /// Run the dependency's test command between build and install.
    pub run_tests: bool,
}

/// Where the installed content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Header-only dependency linked straight from the download cache.
    DownloadCache,
    /// Install prefix restored from the build cache for the active variant.
    BuildCache,
    /// Sources came from the download cache but had to be built.
    BuiltFromCache,
    /// Fetched fresh; nothing to build.
    Fetched,
    /// Fetched fresh and built.
    Built,
}

impl Origin {
    /// Short phrase for progress output.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::DownloadCache => "linked from download cache",
            Self::BuildCache => "restored from build cache",
            Self::BuiltFromCache => "built from cached sources",
            Self::Fetched => "fetched",
            Self::Built => "fetched and built",
        }
    }
}

/// One successfully installed dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installed {
    /// Dependency name.
    pub name: String,
    /// Dependency version.
    pub version: String,
    /// Which path produced the installed content.
    pub origin: Origin,
    /// Symlinks published into the project.
    pub links: Vec<PathBuf>,
}

/// Outcome of a batch install.
#[derive(Debug, Default)]
pub struct InstallSummary {
    /// Dependencies installed, in order.
    pub installed: Vec<Installed>,
    /// One error per failed dependency.
    pub failed: Vec<InstallError>,
}

impl InstallSummary {
    /// Whether every dependency installed.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Process exit status: non-zero when anything failed.
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.is_success())
    }
}

/// Install every dependency in order. A failure does not stop the batch.
pub async fn install_all(
    ctx: &Context,
    deps: &[Dependency],
    options: InstallOptions,
) -> InstallSummary {
    let started = Instant::now();
    let mut summary = InstallSummary::default();
    ctx.reporter.section("Installing");

    for dep in deps {
        match install(ctx, dep, options).await {
            Ok(installed) => {
                ctx.reporter
                    .done(&dep.name, &dep.version, installed.origin.describe());
                summary.installed.push(installed);
            }
            Err(e) => {
                tracing::error!(dependency = %dep.label(), error = %e, "install failed");
                ctx.reporter.failed(&dep.name, &dep.version, &e.to_string());
                summary.failed.push(e);
            }
        }
    }

    ctx.reporter.summary(
        summary.installed.len(),
        summary.failed.len(),
        started.elapsed().as_secs_f64(),
    );
    summary
}

/// Install one dependency.
pub async fn install(
    ctx: &Context,
    dep: &Dependency,
    options: InstallOptions,
) -> Result<Installed, InstallError> {
    dep.validate()
        .map_err(|e| InstallError::from(e).during(&dep.name, Phase::Validate))?;

    if !options.force && !options.no_cache && ctx.cache.is_download_cached(dep) {
        match install_from_cache(ctx, dep, options).await {
            Ok(installed) => return Ok(installed),
            Err(e) if e.phase() == Some(Phase::Cache) => {
                tracing::warn!(
                    dependency = %dep.label(),
                    error = %e,
                    "cache retrieval failed, fetching fresh"
                );
                ctx.reporter
                    .warning(&format!("{}: cache unusable, fetching fresh", dep.label()));
            }
            Err(e) => return Err(e),
        }
    }

    install_fresh(ctx, dep, options).await
}

async fn install_from_cache(
    ctx: &Context,
    dep: &Dependency,
    options: InstallOptions,
) -> Result<Installed, InstallError> {
    let variant = ctx.variant.as_ref();

    if !dep.build_system.requires_build() {
        tracing::info!(dependency = %dep.label(), "download cache hit");
        let cached = ctx.cache.download_path(dep);
        return link(ctx, dep, &cached, Origin::DownloadCache);
    }

    let install_dir = ctx.install_dir(dep);
    if ctx.cache.is_build_cached(dep, variant) {
        tracing::info!(
            dependency = %dep.label(),
            variant = %ctx.variables.variant_dir(),
            "build cache hit"
        );
        remove_path(&install_dir).map_err(|e| cache_err(dep, e))?;
        ctx.cache
            .retrieve_build(dep, &install_dir, variant)
            .map_err(|e| InstallError::from(e).during(&dep.name, Phase::Cache))?;
        return link(ctx, dep, &install_dir, Origin::BuildCache);
    }

    let source_dir = ctx.source_dir(dep);
    remove_path(&source_dir).map_err(|e| cache_err(dep, e))?;
    ctx.cache
        .retrieve(dep, &source_dir)
        .map_err(|e| InstallError::from(e).during(&dep.name, Phase::Cache))?;

    build(ctx, dep, &source_dir, &install_dir, options).await?;
    store_build(ctx, dep, &install_dir, options);
    link(ctx, dep, &install_dir, Origin::BuiltFromCache)
}

async fn install_fresh(
    ctx: &Context,
    dep: &Dependency,
    options: InstallOptions,
) -> Result<Installed, InstallError> {
    let scratch_err = |e: std::io::Error| {
        InstallError::context("scratch directory", e).during(&dep.name, Phase::Fetch)
    };
    std::fs::create_dir_all(&ctx.dirs.tmp).map_err(scratch_err)?;
    let scratch = tempfile::Builder::new()
        .prefix(&format!("{}-", dep.name))
        .tempdir_in(&ctx.dirs.tmp)
        .map_err(scratch_err)?;

    ctx.fetcher
        .fetch(dep, scratch.path(), &ctx.cancel)
        .await
        .map_err(|e| InstallError::from(e).during(&dep.name, Phase::Fetch))?;

    if !options.no_cache {
        if let Err(e) = ctx.cache.store(dep, scratch.path()) {
            tracing::warn!(dependency = %dep.label(), error = %e, "could not store download");
        }
    }

    let source_dir = ctx.source_dir(dep);
    remove_path(&source_dir)
        .and_then(|()| copy_path(scratch.path(), &source_dir))
        .map_err(|e| InstallError::from(e).during(&dep.name, Phase::Fetch))?;

    if !dep.build_system.requires_build() {
        return link(ctx, dep, &source_dir, Origin::Fetched);
    }

    let install_dir = ctx.install_dir(dep);
    remove_path(&install_dir)
        .map_err(|e| InstallError::from(e).during(&dep.name, Phase::Build))?;
    build(ctx, dep, &source_dir, &install_dir, options).await?;
    store_build(ctx, dep, &install_dir, options);
    link(ctx, dep, &install_dir, Origin::Built)
}

async fn build(
    ctx: &Context,
    dep: &Dependency,
    source_dir: &Path,
    install_dir: &Path,
    options: InstallOptions,
) -> Result<(), InstallError> {
    let variables = ctx
        .variables
        .for_dependency(dep, source_dir, &ctx.build_dir(dep), install_dir);
    ctx.builder
        .build(
            &variables,
            dep,
            BuildOptions {
                run_tests: options.run_tests,
            },
            &ctx.cancel,
        )
        .await
        .map_err(|e| InstallError::from(e).during(&dep.name, Phase::Build))
}

fn store_build(ctx: &Context, dep: &Dependency, install_dir: &Path, options: InstallOptions) {
    if options.no_cache {
        return;
    }
    if let Err(e) = ctx.cache.store_build(dep, install_dir, ctx.variant.as_ref()) {
        tracing::warn!(dependency = %dep.label(), error = %e, "could not store build output");
    }
}

fn link(
    ctx: &Context,
    dep: &Dependency,
    from: &Path,
    origin: Origin,
) -> Result<Installed, InstallError> {
    let links = ctx
        .links
        .install(dep, ctx.variant.as_ref(), from)
        .map_err(|e| InstallError::from(e).during(&dep.name, Phase::Link))?;
    ctx.reporter.linking(&dep.name, &dep.version, links.len());
    Ok(Installed {
        name: dep.name.clone(),
        version: dep.version.clone(),
        origin,
        links,
    })
}

fn cache_err(dep: &Dependency, e: std::io::Error) -> InstallError {
    InstallError::from(e).during(&dep.name, Phase::Cache)
}
