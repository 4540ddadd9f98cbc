//! Subcommand implementations.

pub mod cache;
pub mod install;
pub mod uninstall;
pub mod verify;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use kiln_core::detect::{HostDetector, resolve_variant_from_env};
use kiln_core::ops::{Context, Dirs, Settings};
use kiln_core::{PrefixToolchain, SystemRunner, ToolchainHandle};
use kiln_schema::ProjectConfig;

use crate::project;
use crate::ui::ConsoleReporter;

/// What a subcommand needs to open a project.
#[derive(Debug, Default)]
pub struct OpenOptions<'a> {
    pub project: Option<&'a Path>,
    pub profile: Option<&'a str>,
    pub variant: Option<&'a str>,
    pub toolchain: Option<PathBuf>,
    pub jobs: Option<usize>,
}

/// A loaded project and the engine context built from it.
#[derive(Debug)]
pub struct Session {
    pub config: ProjectConfig,
    pub ctx: Context,
}

pub fn open(options: &OpenOptions<'_>) -> Result<Session> {
    let root = project::resolve_root(options.project)?;
    let config = project::load(&root)?;

    let configured = config.configured_variant(options.profile)?;
    let variant = resolve_variant_from_env(options.variant, configured.as_ref(), &HostDetector)?;
    if let Some(v) = &variant {
        tracing::debug!(variant = %v, "resolved variant");
    }

    let mut settings =
        Settings::new(&root).with_dirs(Dirs::default().with_overrides(&config.dirs));
    settings.profile = options.profile.map(str::to_string);
    settings.variant = variant;
    if let Some(jobs) = options.jobs {
        settings.fetch.max_concurrent = jobs.max(1);
    }
    if let Some(prefix) = &options.toolchain {
        settings.toolchain = ToolchainHandle::activate(Arc::new(PrefixToolchain::new(prefix)));
    }

    let ctx = Context::new(
        &config,
        settings,
        Arc::new(SystemRunner),
        Arc::new(ConsoleReporter::new()),
    )?;
    Ok(Session { config, ctx })
}
